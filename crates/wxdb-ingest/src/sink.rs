//! Persistence of decoded records
//!
//! Every batch goes to two places:
//!
//! 1. The feed's table, inserted in chunks inside one transaction
//! 2. A `;`-delimited audit file that is only ever appended to. The first
//!    write fixes its header; later writes must use the same field names
//!
//! The audit header is checked before the transaction starts, and the
//! transaction commits only after the audit rows are appended. A failed
//! write leaves no rows in the table. If the commit itself fails the audit
//! file may hold rows that a retry appends again.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::decoder::{Decoded, FieldValue, Record};
use crate::feed::{ColumnKind, Feed, TableSpec};

/// Rows per INSERT statement
pub const BATCH_SIZE: usize = 500;

pub const AUDIT_DELIMITER: u8 = b';';

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{path} has header {found:?}, refusing to append records with fields {expected:?}")]
    SchemaMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("audit task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Where decoded batches go
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist `decoded`; returns the number of records written
    async fn write(&self, decoded: &Decoded, feed: Feed) -> Result<usize, SinkError>;
}

/// Append-only audit file
#[derive(Debug, Clone)]
pub struct CsvAuditWriter {
    path: PathBuf,
}

impl CsvAuditWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header of the existing file, or `None` when the file is missing or empty
    fn existing_header(&self) -> Result<Option<Vec<String>>, SinkError> {
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.len() > 0 => {},
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(AUDIT_DELIMITER)
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)?;

        match reader.records().next() {
            Some(header) => Ok(Some(header?.iter().map(str::to_string).collect())),
            None => Ok(None),
        }
    }

    /// Fails when the file already has a different header; returns whether
    /// it has one at all
    pub fn check_header(&self, field_names: &[String]) -> Result<bool, SinkError> {
        match self.existing_header()? {
            Some(found) if found.as_slice() != field_names => Err(SinkError::SchemaMismatch {
                path: self.path.clone(),
                expected: field_names.to_vec(),
                found,
            }),
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    pub fn append(&self, records: &[Record], field_names: &[String]) -> Result<usize, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        let has_header = self.check_header(field_names)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(AUDIT_DELIMITER)
            .from_writer(file);

        if !has_header {
            writer.write_record(field_names)?;
        }
        for record in records {
            writer.write_record(field_names.iter().map(|name| {
                record.get(name).map(FieldValue::to_string).unwrap_or_default()
            }))?;
        }
        writer.flush()?;

        debug!(path = %self.path.display(), count = records.len(), "Appended audit rows");
        Ok(records.len())
    }
}

/// Batch inserts into a feed table
#[derive(Clone)]
pub struct PgTableWriter {
    pool: PgPool,
}

impl PgTableWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, SinkError> {
        Ok(self.pool.begin().await?)
    }

    /// Insert all records inside `tx`; the caller decides when to commit
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        records: &[Record],
        table: &TableSpec,
    ) -> Result<usize, SinkError> {
        for chunk in records.chunks(BATCH_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", table.table, table.column_list()));

            query_builder.push_values(chunk, |mut b, record| {
                for column in table.columns {
                    let value = record.get(column.field);
                    match column.kind {
                        ColumnKind::Text => {
                            b.push_bind(value.and_then(FieldValue::as_text));
                        },
                        ColumnKind::Float => {
                            b.push_bind(value.and_then(FieldValue::as_f64));
                        },
                        ColumnKind::Date => {
                            b.push_bind(value.and_then(FieldValue::as_date));
                        },
                        ColumnKind::Timestamp => {
                            b.push_bind(value.and_then(FieldValue::as_timestamp));
                        },
                    }
                }
            });

            query_builder.build().execute(&mut **tx).await?;
        }

        Ok(records.len())
    }
}

/// Database table plus audit file for one feed
#[derive(Clone)]
pub struct SinkWriter {
    table: PgTableWriter,
    audit: CsvAuditWriter,
}

impl SinkWriter {
    pub fn new(pool: PgPool, audit_path: impl Into<PathBuf>) -> Self {
        Self {
            table: PgTableWriter::new(pool),
            audit: CsvAuditWriter::new(audit_path),
        }
    }
}

#[async_trait]
impl RecordSink for SinkWriter {
    async fn write(&self, decoded: &Decoded, feed: Feed) -> Result<usize, SinkError> {
        if decoded.records.is_empty() {
            info!(feed = %feed, "No records to write");
            return Ok(0);
        }

        let audit = self.audit.clone();
        let field_names = decoded.field_names.clone();
        tokio::task::spawn_blocking(move || audit.check_header(&field_names)).await??;

        let table = feed.table();
        let mut tx = self.table.begin().await?;
        let inserted = self.table.insert(&mut tx, &decoded.records, table).await?;

        let audit = self.audit.clone();
        let records = decoded.records.clone();
        let field_names = decoded.field_names.clone();
        tokio::task::spawn_blocking(move || audit.append(&records, &field_names)).await??;

        tx.commit().await?;

        info!(
            feed = %feed,
            table = table.table,
            audit = %self.audit.path().display(),
            "Wrote {} records",
            inserted
        );
        Ok(inserted)
    }
}
