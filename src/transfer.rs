//! Final-table management and the typed staging → final transfer.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    cleaning,
    dates::DateFormatPolicy,
    db::Session,
    error::Result,
    introspect::{LiveColumn, SchemaIntrospector},
    report::Reporter,
    sql::{QualifiedName, quote_ident},
    types::{ColumnSpec, LOADED_AT, METADATA_COLUMNS, RequiredColumns, TypeKind, UPSERT_HASH},
    upsert::UpsertHasher,
    validate::BooleanVocabulary,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStrategy {
    #[default]
    Replace,
    Upsert,
    Append,
}

impl fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpdateStrategy::Replace => "replace",
            UpdateStrategy::Upsert => "upsert",
            UpdateStrategy::Append => "append",
        };
        f.write_str(label)
    }
}

/// What [`TransferEngine::ensure_final_table`] did to the final table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableAction {
    Created,
    Recreated,
    Altered,
    Unchanged,
}

impl fmt::Display for TableAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TableAction::Created => "created",
            TableAction::Recreated => "recreated",
            TableAction::Altered => "altered",
            TableAction::Unchanged => "unchanged",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    pub rows_inserted: u64,
    pub duplicates_removed: u64,
}

/// Options controlling the typed conversion of staged text.
#[derive(Debug, Clone, Copy)]
pub struct ConversionOptions<'a> {
    pub date_policy: DateFormatPolicy,
    pub vocabulary: Option<&'a BooleanVocabulary>,
    pub deduplicate: bool,
}

/// Differences between the live final table and the configured columns.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Drift {
    None,
    Alter(Vec<String>),
    Recreate(String),
}

pub struct TransferEngine<'a> {
    session: &'a Session,
    reporter: &'a Reporter,
}

impl<'a> TransferEngine<'a> {
    pub fn new(session: &'a Session, reporter: &'a Reporter) -> Self {
        Self { session, reporter }
    }

    /// Creates the final table when absent, recreates it when the column set
    /// or a column's type category changed, and alters column types or
    /// nullability in place otherwise. A failed alteration falls back to a
    /// full recreation.
    pub fn ensure_final_table(
        &self,
        table: &QualifiedName,
        columns: &RequiredColumns,
        force_recreate: bool,
    ) -> Result<TableAction> {
        let live = SchemaIntrospector::new(self.session).columns(table)?;
        if live.is_empty() {
            self.create_table(table, columns)?;
            self.reporter.info(&format!("Created final table {table}"));
            return Ok(TableAction::Created);
        }
        if force_recreate {
            self.create_table(table, columns)?;
            self.reporter
                .info(&format!("Recreated final table {table} on request"));
            return Ok(TableAction::Recreated);
        }
        match detect_drift(&live, columns, table) {
            Drift::None => Ok(TableAction::Unchanged),
            Drift::Recreate(reason) => {
                self.reporter
                    .warn(&format!("Recreating final table {table}: {reason}"));
                self.create_table(table, columns)?;
                Ok(TableAction::Recreated)
            }
            Drift::Alter(statements) => {
                self.drop_support_indexes(table)?;
                for statement in &statements {
                    if let Err(err) = self.session.execute_batch(statement) {
                        if err.is_cancellation() {
                            return Err(err);
                        }
                        self.reporter.warn(&format!(
                            "Altering {table} failed ({err}); recreating the table instead"
                        ));
                        self.create_table(table, columns)?;
                        return Ok(TableAction::Recreated);
                    }
                }
                self.reporter.info(&format!(
                    "Altered {} column definition(s) on {table}",
                    statements.len()
                ));
                Ok(TableAction::Altered)
            }
        }
    }

    fn create_table(&self, table: &QualifiedName, columns: &RequiredColumns) -> Result<()> {
        let business = columns.iter().map(|column| {
            let constraint = if column.nullable { "" } else { " NOT NULL" };
            format!(
                "{} {}{constraint}",
                quote_ident(&column.name),
                column.kind.sql_type()
            )
        });
        let metadata = METADATA_COLUMNS
            .iter()
            .map(|column| format!("{} {}", quote_ident(column.name), column.sql_type));
        let definitions = business.chain(metadata).join(", ");
        self.session.execute_batch(&format!(
            "CREATE SCHEMA IF NOT EXISTS {schema}; \
             DROP TABLE IF EXISTS {table_q}; \
             CREATE TABLE {table_q} ({definitions});",
            schema = quote_ident(&table.schema),
            table_q = table.quoted(),
        ))
    }

    /// Prepares the final table for the incoming batch. Returns the number of
    /// rows removed. Upsert hashes the staged keys after the same conversion
    /// [`Self::transfer`] applies.
    pub fn apply_strategy(
        &self,
        strategy: UpdateStrategy,
        final_table: &QualifiedName,
        staging: &QualifiedName,
        columns: &RequiredColumns,
        keys: &[String],
        options: &ConversionOptions<'_>,
    ) -> Result<u64> {
        match strategy {
            UpdateStrategy::Replace => {
                let existing = self
                    .session
                    .query_count(&format!("SELECT COUNT(*) FROM {}", final_table.quoted()), &[])?;
                self.session
                    .execute_batch(&format!("TRUNCATE {}", final_table.quoted()))?;
                self.reporter.info(&format!(
                    "Replace strategy: cleared {existing} row(s) from {final_table}"
                ));
                Ok(u64::try_from(existing).unwrap_or(0))
            }
            UpdateStrategy::Upsert => {
                let hasher = UpsertHasher::new(self.session);
                hasher.compute_hash(staging, keys, |key| match columns.get(key) {
                    Some(column) => {
                        conversion_expression(column, options.date_policy, options.vocabulary)
                    }
                    None => quote_ident(key),
                })?;
                let backfilled = hasher.backfill(final_table, keys)?;
                if backfilled > 0 {
                    self.reporter.info(&format!(
                        "Backfilled upsert hashes for {backfilled} existing row(s)"
                    ));
                }
                let deleted = hasher.delete_matching(final_table, staging)?;
                self.reporter.info(&format!(
                    "Upsert strategy: removed {deleted} matching row(s) from {final_table}"
                ));
                Ok(deleted as u64)
            }
            UpdateStrategy::Append => Ok(0),
        }
    }

    /// One `INSERT … SELECT` converting every business column; metadata
    /// columns pass through unchanged.
    pub fn transfer(
        &self,
        staging: &QualifiedName,
        final_table: &QualifiedName,
        columns: &RequiredColumns,
        options: &ConversionOptions<'_>,
    ) -> Result<TransferOutcome> {
        let targets = columns
            .iter()
            .map(|column| quote_ident(&column.name))
            .chain(METADATA_COLUMNS.iter().map(|column| quote_ident(column.name)))
            .join(", ");
        let expressions = columns
            .iter()
            .map(|column| {
                format!(
                    "{} AS {}",
                    conversion_expression(column, options.date_policy, options.vocabulary),
                    quote_ident(&column.name)
                )
            })
            .chain(METADATA_COLUMNS.iter().map(|column| quote_ident(column.name)))
            .join(", ");
        let distinct = if options.deduplicate { "DISTINCT " } else { "" };
        let staged = if options.deduplicate {
            self.session
                .query_count(&format!("SELECT COUNT(*) FROM {}", staging.quoted()), &[])?
        } else {
            0
        };
        let inserted = self.session.execute(
            &format!(
                "INSERT INTO {} ({targets}) SELECT {distinct}{expressions} FROM {}",
                final_table.quoted(),
                staging.quoted()
            ),
            &[],
        )? as u64;
        let duplicates_removed = if options.deduplicate {
            u64::try_from(staged).unwrap_or(0).saturating_sub(inserted)
        } else {
            0
        };
        if duplicates_removed > 0 {
            self.reporter
                .info(&format!("Removed {duplicates_removed} duplicate row(s)"));
        }
        self.reporter
            .info(&format!("Inserted {inserted} row(s) into {final_table}"));
        Ok(TransferOutcome {
            rows_inserted: inserted,
            duplicates_removed,
        })
    }

    /// Index on the hash column and on the load timestamp. Failures are
    /// logged and skipped. Returns the names of the indexes now present.
    pub fn build_support_indexes(&self, table: &QualifiedName) -> Vec<String> {
        let mut built = Vec::new();
        for column in [UPSERT_HASH, LOADED_AT] {
            let name = table.index_name(column);
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&name),
                table.quoted(),
                quote_ident(column)
            );
            match self.session.execute_batch(&sql) {
                Ok(()) => built.push(name),
                Err(err) => self
                    .reporter
                    .warn(&format!("Could not build index {name}: {err}")),
            }
        }
        built
    }

    /// Removes the support indexes so the table can be altered or rewritten.
    pub fn drop_support_indexes(&self, table: &QualifiedName) -> Result<()> {
        for column in [UPSERT_HASH, LOADED_AT] {
            let name = table.index_name(column);
            self.session
                .execute_batch(&format!("DROP INDEX IF EXISTS {}", table.quoted_index(&name)))?;
        }
        Ok(())
    }
}

/// Cleaning plus tolerant conversion for one business column. Values that
/// do not convert become NULL.
pub fn conversion_expression(
    column: &ColumnSpec,
    policy: DateFormatPolicy,
    vocabulary: Option<&BooleanVocabulary>,
) -> String {
    let col = quote_ident(&column.name);
    match column.kind {
        TypeKind::Integer | TypeKind::SmallInteger | TypeKind::Float | TypeKind::Decimal(_) => {
            cleaning::numeric_conversion(&cleaning::numeric(&col), &column.kind)
        }
        TypeKind::Date => format!(
            "CAST({} AS DATE)",
            cleaning::timestamp_conversion(&cleaning::date(&col), policy)
        ),
        TypeKind::DateTime => cleaning::timestamp_conversion(&cleaning::date(&col), policy),
        TypeKind::Boolean => match vocabulary {
            Some(vocabulary) => vocabulary.case_expression(&col),
            None => BooleanVocabulary::default().case_expression(&col),
        },
        TypeKind::Text => cleaning::basic(&col),
        TypeKind::Binary => cleaning::try_cast(&col, "BLOB"),
    }
}

fn same_sql_type(live: &LiveColumn, kind: &TypeKind) -> bool {
    let live_type = live.data_type.trim().to_ascii_uppercase();
    match kind {
        TypeKind::Decimal(spec) => {
            live_type.starts_with("DECIMAL")
                && live.precision == Some(i64::from(spec.precision))
                && live.scale == Some(i64::from(spec.scale))
        }
        TypeKind::Text => live_type.starts_with("VARCHAR"),
        other => live_type == other.sql_type(),
    }
}

fn detect_drift(live: &[LiveColumn], columns: &RequiredColumns, table: &QualifiedName) -> Drift {
    let expected = columns
        .names()
        .into_iter()
        .chain(METADATA_COLUMNS.iter().map(|column| column.name))
        .map(str::to_string)
        .sorted()
        .collect::<Vec<_>>();
    let actual = live
        .iter()
        .map(|column| column.name.clone())
        .sorted()
        .collect::<Vec<_>>();
    if expected != actual {
        return Drift::Recreate("column set differs from the configured columns".to_string());
    }

    let mut statements = Vec::new();
    for column in columns {
        let Some(existing) = live.iter().find(|c| c.name == column.name) else {
            continue;
        };
        if existing.category() != column.category() {
            return Drift::Recreate(format!(
                "column '{}' changed from {} to {}",
                column.name,
                existing.category(),
                column.category()
            ));
        }
        let col = quote_ident(&column.name);
        if !same_sql_type(existing, &column.kind) {
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {col} TYPE {}",
                table.quoted(),
                column.kind.sql_type()
            ));
        }
        if existing.nullable != column.nullable {
            let change = if column.nullable { "DROP" } else { "SET" };
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {col} {change} NOT NULL",
                table.quoted()
            ));
        }
    }
    if statements.is_empty() {
        Drift::None
    } else {
        Drift::Alter(statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CancelToken, Database};

    fn columns(amount: &str) -> RequiredColumns {
        RequiredColumns::new(vec![
            ColumnSpec::new("id", TypeKind::Integer).not_null(),
            ColumnSpec::new("amount", amount.parse().unwrap()),
        ])
        .unwrap()
    }

    #[test]
    fn ensure_final_table_walks_create_unchanged_alter_recreate() {
        let db = Database::open_in_memory().unwrap();
        let session = db.connect(&CancelToken::new()).unwrap();
        let reporter = Reporter::new();
        let engine = TransferEngine::new(&session, &reporter);
        let table = QualifiedName::new("bronze", "sales").unwrap();

        assert_eq!(
            engine.ensure_final_table(&table, &columns("decimal(10,2)"), false).unwrap(),
            TableAction::Created
        );
        assert_eq!(
            engine.ensure_final_table(&table, &columns("decimal(10,2)"), false).unwrap(),
            TableAction::Unchanged
        );
        assert_eq!(
            engine.ensure_final_table(&table, &columns("decimal(12,2)"), false).unwrap(),
            TableAction::Altered
        );
        let live = SchemaIntrospector::new(&session).columns(&table).unwrap();
        assert_eq!(live[1].precision, Some(12));

        assert_eq!(
            engine.ensure_final_table(&table, &columns("date"), false).unwrap(),
            TableAction::Recreated
        );
        assert_eq!(
            engine.ensure_final_table(&table, &columns("date"), true).unwrap(),
            TableAction::Recreated
        );
        let renamed = RequiredColumns::new(vec![ColumnSpec::new("code", TypeKind::Text)]).unwrap();
        assert_eq!(
            engine.ensure_final_table(&table, &renamed, false).unwrap(),
            TableAction::Recreated
        );
    }

    #[test]
    fn transfer_converts_staged_text() {
        let db = Database::open_in_memory().unwrap();
        let session = db.connect(&CancelToken::new()).unwrap();
        let reporter = Reporter::new();
        let engine = TransferEngine::new(&session, &reporter);
        let staging = QualifiedName::new("main", "t__stg").unwrap();
        let table = QualifiedName::new("main", "t").unwrap();
        let required = RequiredColumns::new(vec![
            ColumnSpec::new("amount", "decimal(10,2)".parse().unwrap()),
            ColumnSpec::new("created", TypeKind::Date),
            ColumnSpec::new("active", TypeKind::Boolean),
            ColumnSpec::new("note", TypeKind::Text),
        ])
        .unwrap();
        crate::staging::StagingTableManager::new(&session, &reporter)
            .create(&staging, &required)
            .unwrap();
        session
            .execute_batch(
                "INSERT INTO main.t__stg (amount, created, active, note) VALUES \
                 ('1,234.50', '01/02/2024', 'yes', ' hi '), \
                 ('-', 'junk', 'maybe', NULL), \
                 ('1,234.50', '01/02/2024', 'yes', ' hi ');",
            )
            .unwrap();
        engine.ensure_final_table(&table, &required, false).unwrap();
        let options = ConversionOptions {
            date_policy: DateFormatPolicy::UK,
            vocabulary: None,
            deduplicate: true,
        };
        let outcome = engine.transfer(&staging, &table, &required, &options).unwrap();
        assert_eq!(outcome.rows_inserted, 2);
        assert_eq!(outcome.duplicates_removed, 1);

        let rows = session
            .query_rows(
                "SELECT CAST(amount AS VARCHAR), CAST(created AS VARCHAR), CAST(active AS VARCHAR), note \
                 FROM main.t ORDER BY amount NULLS LAST",
                &[],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .unwrap();
        assert_eq!(
            rows[0],
            (
                Some("1234.50".to_string()),
                Some("2024-02-01".to_string()),
                Some("true".to_string()),
                Some("hi".to_string())
            )
        );
        assert_eq!(rows[1], (None, None, None, None));
    }

    #[test]
    fn replace_strategy_truncates_and_reports_count() {
        let db = Database::open_in_memory().unwrap();
        let session = db.connect(&CancelToken::new()).unwrap();
        let reporter = Reporter::new();
        let engine = TransferEngine::new(&session, &reporter);
        session
            .execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (1), (2);")
            .unwrap();
        let table = QualifiedName::new("main", "t").unwrap();
        let staging = table.staging();
        let required =
            RequiredColumns::new(vec![ColumnSpec::new("v", TypeKind::Integer)]).unwrap();
        let options = ConversionOptions {
            date_policy: DateFormatPolicy::UK,
            vocabulary: None,
            deduplicate: false,
        };
        assert_eq!(
            engine
                .apply_strategy(
                    UpdateStrategy::Replace,
                    &table,
                    &staging,
                    &required,
                    &[],
                    &options
                )
                .unwrap(),
            2
        );
        assert_eq!(
            engine
                .apply_strategy(
                    UpdateStrategy::Append,
                    &table,
                    &staging,
                    &required,
                    &[],
                    &options
                )
                .unwrap(),
            0
        );
        assert_eq!(session.query_count("SELECT COUNT(*) FROM t", &[]).unwrap(), 0);
    }

    #[test]
    fn support_indexes_are_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let session = db.connect(&CancelToken::new()).unwrap();
        let reporter = Reporter::new();
        let engine = TransferEngine::new(&session, &reporter);
        let table = QualifiedName::new("main", "t").unwrap();
        engine
            .ensure_final_table(&table, &columns("float"), false)
            .unwrap();
        let first = engine.build_support_indexes(&table);
        let second = engine.build_support_indexes(&table);
        assert_eq!(first, ["ix_t_upsert_hash", "ix_t_loaded_at"]);
        assert_eq!(first, second);
        engine.drop_support_indexes(&table).unwrap();
        engine.drop_support_indexes(&table).unwrap();
        assert!(SchemaIntrospector::new(&session).indexes(&table).unwrap().is_empty());
    }
}
