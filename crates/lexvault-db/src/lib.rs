//! Lexvault Database Layer
//!
//! Embedded LanceDB store backing the queryable mirror of the document
//! corpus. The file tree written by the ingestion crate is the primary
//! copy; this table is kept eventually consistent with it.
//!
//! # Example
//!
//! ```rust,no_run
//! use lexvault_db::{Database, DocumentRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::open("./data/mirror.lance").await?;
//!     db.initialize().await?;
//!
//!     let documents = DocumentRepository::new(std::sync::Arc::new(db));
//!     println!("{} mirrored documents", documents.count().await?);
//!     Ok(())
//! }
//! ```

pub mod database;
pub mod documents;
pub mod error;
pub mod schema;
pub mod schema_arrow;

pub use database::Database;
pub use documents::DocumentRepository;
pub use error::{DbError, Result};
pub use schema::{MirrorDocument, MirrorKeys, SyncStatus, TABLE_DOCUMENTS};
