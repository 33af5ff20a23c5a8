//! Staging table lifecycle: create, bulk load, count, drop.
//!
//! Every business column is staged as unbounded text so conversion problems
//! surface in validation instead of during the load.

use chrono::{Local, NaiveDateTime};
use duckdb::ToSql;
use itertools::Itertools;
use uuid::Uuid;

use crate::{
    dataset::Dataset,
    db::Session,
    error::{LoadError, Result},
    report::Reporter,
    sql::{QualifiedName, quote_ident, quote_literal},
    types::{BATCH_ID, CREATED_AT, LOADED_AT, METADATA_COLUMNS, RequiredColumns, SOURCE_FILE},
};

pub const DEFAULT_BATCH_SIZE: usize = 5000;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Provenance shared by every row written in one upload call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchInfo {
    pub batch_id: Uuid,
    pub loaded_at: NaiveDateTime,
    pub source_file: String,
}

impl BatchInfo {
    pub fn new(source_file: impl Into<String>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            loaded_at: Local::now().naive_local(),
            source_file: source_file.into(),
        }
    }
}

fn timestamp_literal(value: &NaiveDateTime) -> String {
    format!(
        "CAST({} AS TIMESTAMP)",
        quote_literal(&value.format(TIMESTAMP_FORMAT).to_string())
    )
}

pub struct StagingTableManager<'a> {
    session: &'a Session,
    reporter: &'a Reporter,
}

impl<'a> StagingTableManager<'a> {
    pub fn new(session: &'a Session, reporter: &'a Reporter) -> Self {
        Self { session, reporter }
    }

    /// Drops any previous staging table of the same name and creates a fresh
    /// one.
    pub fn create(&self, staging: &QualifiedName, columns: &RequiredColumns) -> Result<()> {
        let business = columns
            .iter()
            .map(|column| format!("{} VARCHAR", quote_ident(&column.name)));
        let metadata = METADATA_COLUMNS
            .iter()
            .map(|column| format!("{} {}", quote_ident(column.name), column.sql_type));
        let definitions = business.chain(metadata).join(", ");
        self.session.execute_batch(&format!(
            "CREATE SCHEMA IF NOT EXISTS {schema}; \
             DROP TABLE IF EXISTS {table}; \
             CREATE TABLE {table} ({definitions});",
            schema = quote_ident(&staging.schema),
            table = staging.quoted(),
        ))?;
        self.reporter
            .info(&format!("Created staging table {staging} with {} column(s)", columns.len()));
        Ok(())
    }

    /// Inserts the dataset in chunks of `batch_size` rows. Chunks commit
    /// independently; a failure leaves the rows loaded so far in place.
    pub fn bulk_load(
        &self,
        staging: &QualifiedName,
        columns: &RequiredColumns,
        dataset: &Dataset,
        batch: &BatchInfo,
        batch_size: usize,
    ) -> Result<usize> {
        if batch_size == 0 {
            return Err(LoadError::config("batch_size must be positive"));
        }
        let missing = dataset.missing_columns(columns);
        if !missing.is_empty() {
            return Err(LoadError::MissingColumns(missing));
        }
        let positions = columns
            .iter()
            .filter_map(|column| dataset.column_index(&column.name))
            .collect::<Vec<_>>();

        let target_columns = columns
            .iter()
            .map(|column| quote_ident(&column.name))
            .chain(
                [LOADED_AT, CREATED_AT, SOURCE_FILE, BATCH_ID]
                    .into_iter()
                    .map(quote_ident),
            )
            .join(", ");
        let metadata_values = format!(
            "{}, {}, {}, {}",
            timestamp_literal(&batch.loaded_at),
            timestamp_literal(&Local::now().naive_local()),
            quote_literal(&batch.source_file),
            quote_literal(&batch.batch_id.to_string()),
        );
        let placeholders = positions.iter().map(|_| "?").join(", ");
        let row_values = if placeholders.is_empty() {
            format!("({metadata_values})")
        } else {
            format!("({placeholders}, {metadata_values})")
        };

        let total = dataset.row_count();
        let mut loaded = 0usize;
        for chunk in dataset.rows.chunks(batch_size) {
            self.session.cancel_token().check()?;
            let values = std::iter::repeat_n(row_values.as_str(), chunk.len()).join(", ");
            let sql = format!(
                "INSERT INTO {} ({target_columns}) VALUES {values}",
                staging.quoted()
            );
            let params = chunk
                .iter()
                .flat_map(|row| positions.iter().map(move |&idx| &row[idx] as &dyn ToSql))
                .collect::<Vec<_>>();
            loaded += self.session.execute(&sql, &params)?;
            self.reporter
                .info(&format!("Staged {loaded} of {total} row(s) into {staging}"));
        }
        Ok(loaded)
    }

    pub fn row_count(&self, staging: &QualifiedName) -> Result<i64> {
        self.session
            .query_count(&format!("SELECT COUNT(*) FROM {}", staging.quoted()), &[])
    }

    pub fn drop_table(&self, staging: &QualifiedName) -> Result<()> {
        self.session
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", staging.quoted()))?;
        self.reporter.info(&format!("Dropped staging table {staging}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{CancelToken, Database},
        introspect::SchemaIntrospector,
        types::{ColumnSpec, TypeKind},
    };

    fn columns() -> RequiredColumns {
        RequiredColumns::new(vec![
            ColumnSpec::new("id", TypeKind::Integer),
            ColumnSpec::new("amount", TypeKind::Float),
        ])
        .unwrap()
    }

    #[test]
    fn create_stages_business_columns_as_text_plus_metadata() {
        let db = Database::open_in_memory().unwrap();
        let session = db.connect(&CancelToken::new()).unwrap();
        let reporter = Reporter::new();
        let staging = QualifiedName::new("bronze", "sales__stg").unwrap();
        StagingTableManager::new(&session, &reporter)
            .create(&staging, &columns())
            .expect("create staging");

        let live = SchemaIntrospector::new(&session).columns(&staging).unwrap();
        let names: Vec<_> = live.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            ["id", "amount", "loaded_at", "created_at", "source_file", "batch_id", "upsert_hash"]
        );
        assert_eq!(live[1].data_type, "VARCHAR");
        assert_eq!(live[6].data_type, "BLOB");
    }

    #[test]
    fn bulk_load_chunks_rows_and_stamps_one_batch() {
        let db = Database::open_in_memory().unwrap();
        let session = db.connect(&CancelToken::new()).unwrap();
        let reporter = Reporter::new();
        let staging = QualifiedName::new("main", "t__stg").unwrap();
        let manager = StagingTableManager::new(&session, &reporter);
        manager.create(&staging, &columns()).unwrap();

        let dataset = Dataset::from_strings(
            "input.csv",
            &["amount", "extra", "id"],
            &[&["1.5", "x", "1"], &["", "y", "2"], &["3", "z", "3"]],
        )
        .unwrap();
        let batch = BatchInfo::new("input.csv");
        let loaded = manager
            .bulk_load(&staging, &columns(), &dataset, &batch, 2)
            .expect("bulk load");
        assert_eq!(loaded, 3);
        assert_eq!(manager.row_count(&staging).unwrap(), 3);

        let batches = session
            .query_count("SELECT COUNT(DISTINCT batch_id) FROM main.t__stg", &[])
            .unwrap();
        assert_eq!(batches, 1);
        let nulls = session
            .query_count("SELECT COUNT(*) FROM main.t__stg WHERE amount IS NULL", &[])
            .unwrap();
        assert_eq!(nulls, 1);
        let hashes = session
            .query_count("SELECT COUNT(upsert_hash) FROM main.t__stg", &[])
            .unwrap();
        assert_eq!(hashes, 0);

        manager.drop_table(&staging).unwrap();
        assert!(!SchemaIntrospector::new(&session).table_exists(&staging).unwrap());
    }

    #[test]
    fn bulk_load_rejects_missing_columns() {
        let db = Database::open_in_memory().unwrap();
        let session = db.connect(&CancelToken::new()).unwrap();
        let reporter = Reporter::new();
        let staging = QualifiedName::new("main", "t__stg").unwrap();
        let manager = StagingTableManager::new(&session, &reporter);
        manager.create(&staging, &columns()).unwrap();
        let dataset = Dataset::from_strings("input.csv", &["id"], &[&["1"]]).unwrap();
        let err = manager
            .bulk_load(&staging, &columns(), &dataset, &BatchInfo::new("input.csv"), 10)
            .unwrap_err();
        assert!(matches!(err, LoadError::MissingColumns(ref cols) if cols == &["amount"]));
    }
}
