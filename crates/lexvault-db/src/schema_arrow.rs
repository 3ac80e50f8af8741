//! Arrow schema and conversion utilities for LanceDB.
//!
//! Rows are read back by column name so that projected queries (which only
//! carry a subset of columns) can share the same accessors.

use crate::error::{DbError, Result};
use crate::schema::*;
use arrow_array::{Array, Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

const DATE_FORMAT: &str = "%Y-%m-%d";

// =============================================================================
// Document Arrow Conversion
// =============================================================================

pub fn document_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("category", DataType::Utf8, false),
        Field::new("date_filed", DataType::Utf8, false),
        Field::new("citation", DataType::Utf8, true),
        Field::new("source", DataType::Utf8, false),
        Field::new("source_metadata", DataType::Utf8, false),
        Field::new("content_hash", DataType::Utf8, false),
        Field::new("quality_score", DataType::Float64, false),
        Field::new("admitted_at", DataType::Utf8, false),
        Field::new("bucket_path", DataType::Utf8, false),
        Field::new("sync_status", DataType::Utf8, false),
        Field::new("mirrored_at", DataType::Utf8, false),
    ]))
}

/// Convert a slice of documents into a single record batch.
pub fn documents_to_record(docs: &[MirrorDocument]) -> Result<RecordBatch> {
    let metadata = docs
        .iter()
        .map(|d| serde_json::to_string(&d.source_metadata))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let id = StringArray::from(docs.iter().map(|d| d.id.as_str()).collect::<Vec<_>>());
    let content = StringArray::from(docs.iter().map(|d| d.content.as_str()).collect::<Vec<_>>());
    let category = StringArray::from(docs.iter().map(|d| d.category.as_str()).collect::<Vec<_>>());
    let date_filed = StringArray::from(
        docs.iter().map(|d| d.date_filed.format(DATE_FORMAT).to_string()).collect::<Vec<_>>(),
    );
    let citation = StringArray::from(docs.iter().map(|d| d.citation.as_deref()).collect::<Vec<_>>());
    let source = StringArray::from(docs.iter().map(|d| d.source.as_str()).collect::<Vec<_>>());
    let source_metadata = StringArray::from(metadata);
    let content_hash = StringArray::from(docs.iter().map(|d| d.content_hash.as_str()).collect::<Vec<_>>());
    let quality_score = Float64Array::from(docs.iter().map(|d| d.quality_score).collect::<Vec<_>>());
    let admitted_at = StringArray::from(docs.iter().map(|d| d.admitted_at.to_rfc3339()).collect::<Vec<_>>());
    let bucket_path = StringArray::from(docs.iter().map(|d| d.bucket_path.as_str()).collect::<Vec<_>>());
    let sync_status = StringArray::from(docs.iter().map(|d| d.sync_status.as_str()).collect::<Vec<_>>());
    let mirrored_at = StringArray::from(docs.iter().map(|d| d.mirrored_at.to_rfc3339()).collect::<Vec<_>>());

    RecordBatch::try_new(
        document_schema(),
        vec![
            Arc::new(id) as Arc<dyn Array>,
            Arc::new(content),
            Arc::new(category),
            Arc::new(date_filed),
            Arc::new(citation),
            Arc::new(source),
            Arc::new(source_metadata),
            Arc::new(content_hash),
            Arc::new(quality_score),
            Arc::new(admitted_at),
            Arc::new(bucket_path),
            Arc::new(sync_status),
            Arc::new(mirrored_at),
        ],
    ).map_err(|e| DbError::Arrow(e.to_string()))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| DbError::Schema(format!("missing or non-string column `{}`", name)))
}

fn get_string(batch: &RecordBatch, name: &str, row: usize) -> Result<String> {
    Ok(string_column(batch, name)?.value(row).to_string())
}

fn get_opt_string(batch: &RecordBatch, name: &str, row: usize) -> Result<Option<String>> {
    let arr = string_column(batch, name)?;
    Ok(if arr.is_null(row) { None } else { Some(arr.value(row).to_string()) })
}

fn get_timestamp(batch: &RecordBatch, name: &str, row: usize) -> Result<DateTime<Utc>> {
    let raw = get_string(batch, name, row)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Schema(format!("bad timestamp in `{}`: {}", name, e)))
}

pub fn record_to_document(batch: &RecordBatch, row: usize) -> Result<MirrorDocument> {
    let date_raw = get_string(batch, "date_filed", row)?;
    let date_filed = NaiveDate::parse_from_str(&date_raw, DATE_FORMAT)
        .map_err(|e| DbError::Schema(format!("bad date_filed `{}`: {}", date_raw, e)))?;

    let quality_score = batch
        .column_by_name("quality_score")
        .and_then(|col| col.as_any().downcast_ref::<Float64Array>())
        .map(|arr| arr.value(row))
        .ok_or_else(|| DbError::Schema("missing column `quality_score`".to_string()))?;

    let status_raw = get_string(batch, "sync_status", row)?;
    let sync_status = SyncStatus::parse(&status_raw)
        .ok_or_else(|| DbError::Schema(format!("unknown sync_status `{}`", status_raw)))?;

    Ok(MirrorDocument {
        id: get_string(batch, "id", row)?,
        content: get_string(batch, "content", row)?,
        category: get_string(batch, "category", row)?,
        date_filed,
        citation: get_opt_string(batch, "citation", row)?,
        source: get_string(batch, "source", row)?,
        source_metadata: serde_json::from_str(&get_string(batch, "source_metadata", row)?)?,
        content_hash: get_string(batch, "content_hash", row)?,
        quality_score,
        admitted_at: get_timestamp(batch, "admitted_at", row)?,
        bucket_path: get_string(batch, "bucket_path", row)?,
        sync_status,
        mirrored_at: get_timestamp(batch, "mirrored_at", row)?,
    })
}

/// Read only the dedup key columns of a row (works on projected batches).
pub fn record_to_keys(batch: &RecordBatch, row: usize) -> Result<MirrorKeys> {
    Ok(MirrorKeys {
        id: get_string(batch, "id", row)?,
        content_hash: get_string(batch, "content_hash", row)?,
        citation: get_opt_string(batch, "citation", row)?,
    })
}

pub fn record_to_id(batch: &RecordBatch, row: usize) -> Result<String> {
    get_string(batch, "id", row)
}

/// One non-null string cell of a (possibly projected) batch.
pub fn record_to_string(batch: &RecordBatch, column: &str, row: usize) -> Result<String> {
    get_string(batch, column, row)
}
