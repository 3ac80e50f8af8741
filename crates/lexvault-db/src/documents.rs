//! Document repository.
//!
//! Append-only access to the mirror table. Writes go through `merge_insert`
//! keyed on `id` so that replaying the same document never yields a second row.

use crate::database::Database;
use crate::error::Result;
use crate::schema::{MirrorDocument, MirrorKeys, TABLE_DOCUMENTS};
use crate::schema_arrow::{
    documents_to_record, record_to_document, record_to_id, record_to_keys, record_to_string,
};
use futures::StreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::Table;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Repository for mirrored documents.
#[derive(Clone)]
pub struct DocumentRepository {
    db: Arc<Database>,
}

impl DocumentRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn table(&self) -> Result<Table> {
        Ok(self.db.connection()
            .open_table(TABLE_DOCUMENTS)
            .execute()
            .await?)
    }

    /// Insert a document unless a row with the same id already exists.
    pub async fn insert(&self, doc: &MirrorDocument) -> Result<()> {
        self.insert_batch(std::slice::from_ref(doc)).await
    }

    /// Insert several documents; ids already present are left untouched.
    pub async fn insert_batch(&self, docs: &[MirrorDocument]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        let table = self.table().await?;
        let record = documents_to_record(docs)?;
        let schema = record.schema();
        let iter = arrow_array::RecordBatchIterator::new(vec![Ok(record)], schema);

        let mut builder = table.merge_insert(&["id"]);
        builder.when_not_matched_insert_all();
        builder.execute(Box::new(iter)).await?;

        Ok(())
    }

    /// Find a document by id.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<MirrorDocument>> {
        let table = self.table().await?;
        let escaped = id.replace('\'', "''");

        let mut stream = table
            .query()
            .only_if(format!("id = '{}'", escaped))
            .limit(1)
            .execute()
            .await?;

        while let Some(batch) = stream.next().await {
            let batch = batch?;
            if batch.num_rows() > 0 {
                return Ok(Some(record_to_document(&batch, 0)?));
            }
        }

        Ok(None)
    }

    /// All mirrored ids. Only the id column is read.
    pub async fn ids(&self) -> Result<Vec<String>> {
        let table = self.table().await?;

        let mut stream = table
            .query()
            .select(Select::columns(&["id"]))
            .execute()
            .await?;

        let mut ids = Vec::new();
        while let Some(batch) = stream.next().await {
            let batch = batch?;
            for row in 0..batch.num_rows() {
                ids.push(record_to_id(&batch, row)?);
            }
        }
        Ok(ids)
    }

    /// Dedup keys of every mirrored row, without document bodies.
    pub async fn dedup_keys(&self) -> Result<Vec<MirrorKeys>> {
        let table = self.table().await?;

        let mut stream = table
            .query()
            .select(Select::columns(&["id", "content_hash", "citation"]))
            .execute()
            .await?;

        let mut keys = Vec::new();
        while let Some(batch) = stream.next().await {
            let batch = batch?;
            for row in 0..batch.num_rows() {
                keys.push(record_to_keys(&batch, row)?);
            }
        }
        Ok(keys)
    }

    pub async fn count(&self) -> Result<u64> {
        let table = self.table().await?;
        Ok(table.count_rows(None).await? as u64)
    }

    /// Row counts per distinct value of a string column such as `category`
    /// or `source`. Only that column is read.
    pub async fn count_by(&self, column: &str) -> Result<BTreeMap<String, u64>> {
        let table = self.table().await?;

        let mut stream = table
            .query()
            .select(Select::columns(&[column]))
            .execute()
            .await?;

        let mut counts = BTreeMap::new();
        while let Some(batch) = stream.next().await {
            let batch = batch?;
            for row in 0..batch.num_rows() {
                *counts.entry(record_to_string(&batch, column, row)?).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}
