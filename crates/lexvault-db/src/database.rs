//! Database connection and table management.

use crate::error::Result;
use crate::schema;
use crate::schema_arrow::document_schema;
use arrow_array::RecordBatchIterator;
use lancedb::connection::Connection;
use std::path::Path;
use tracing::info;

/// Main database handle.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
    path: String,
}

impl Database {
    /// Open or create a database at the specified path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        if !path.as_ref().exists() {
            std::fs::create_dir_all(path.as_ref())?;
        }

        let conn = lancedb::connect(&path_str)
            .execute()
            .await?;

        Ok(Self {
            conn,
            path: path_str,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Create the document table if it does not exist yet.
    pub async fn initialize(&self) -> Result<()> {
        if !self.table_exists(schema::TABLE_DOCUMENTS).await? {
            self.create_documents_table().await?;
            info!(path = %self.path, table = schema::TABLE_DOCUMENTS, "Created mirror table");
        }
        Ok(())
    }

    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let tables = self.conn.table_names().execute().await?;
        Ok(tables.iter().any(|t| t == name))
    }

    async fn create_documents_table(&self) -> Result<()> {
        let schema = document_schema();
        // LanceDB creates the table from an (empty) batch stream.
        let empty_iter = RecordBatchIterator::new(vec![], schema);

        self.conn
            .create_table(schema::TABLE_DOCUMENTS, empty_iter)
            .execute()
            .await?;

        Ok(())
    }
}
