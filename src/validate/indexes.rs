//! Temporary validation indexes with guaranteed cleanup.

use log::{debug, warn};

use crate::{
    db::{CancelToken, Database},
    report::Reporter,
    sql::{QualifiedName, quote_ident},
    types::ColumnSpec,
};

/// Owns the temporary indexes built on a staging table and drops them when
/// it goes out of scope, whatever the outcome of validation. Creation and
/// cleanup failures are logged, never returned.
pub struct TempIndexGuard<'a> {
    db: &'a Database,
    staging: QualifiedName,
    created: Vec<String>,
}

impl<'a> TempIndexGuard<'a> {
    /// Indexes every non-text column of `columns`. Unbounded text columns
    /// are skipped.
    pub fn create(
        db: &'a Database,
        cancel: &CancelToken,
        staging: &QualifiedName,
        columns: &[&ColumnSpec],
        reporter: &Reporter,
    ) -> Self {
        let mut guard = Self {
            db,
            staging: staging.clone(),
            created: Vec::new(),
        };
        let session = match db.connect(cancel) {
            Ok(session) => session,
            Err(err) => {
                reporter.warn(&format!("Skipping temporary indexes: {err}"));
                return guard;
            }
        };
        for (ordinal, column) in columns
            .iter()
            .filter(|column| !column.kind.is_text())
            .enumerate()
        {
            let name = temp_index_name(staging, ordinal + 1);
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&name),
                staging.quoted(),
                quote_ident(&column.name)
            );
            match session.execute_batch(&sql) {
                Ok(()) => guard.created.push(name),
                Err(err) => reporter.warn(&format!(
                    "Could not create temporary index on {}: {err}",
                    column.name
                )),
            }
        }
        debug!(
            "Created {} temporary index(es) on {}",
            guard.created.len(),
            guard.staging
        );
        guard
    }

    pub fn created(&self) -> &[String] {
        &self.created
    }

    /// Drops every index this guard created. Safe to call more than once.
    pub fn cleanup(&mut self) -> usize {
        if self.created.is_empty() {
            return 0;
        }
        // A fresh token: cleanup must run even when the load was cancelled.
        let session = match self.db.connect(&CancelToken::new()) {
            Ok(session) => session,
            Err(err) => {
                warn!("Could not open a session to drop temporary indexes: {err}");
                return 0;
            }
        };
        let mut dropped = 0;
        for name in self.created.drain(..) {
            let sql = format!("DROP INDEX IF EXISTS {}", self.staging.quoted_index(&name));
            match session.execute_batch(&sql) {
                Ok(()) => dropped += 1,
                Err(err) => warn!("Could not drop temporary index {name}: {err}"),
            }
        }
        debug!("Dropped {dropped} temporary index(es) on {}", self.staging);
        dropped
    }
}

impl Drop for TempIndexGuard<'_> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

pub fn temp_index_name(staging: &QualifiedName, ordinal: usize) -> String {
    format!("tmp_ix_{}_{ordinal}", staging.table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{introspect::SchemaIntrospector, types::TypeKind};

    #[test]
    fn guard_indexes_non_text_columns_and_drops_them_on_scope_exit() {
        let db = Database::open_in_memory().unwrap();
        let cancel = CancelToken::new();
        let session = db.connect(&cancel).unwrap();
        session
            .execute_batch("CREATE TABLE stg (id VARCHAR, note VARCHAR, created VARCHAR)")
            .unwrap();
        let staging = QualifiedName::new("main", "stg").unwrap();
        let id = ColumnSpec::new("id", TypeKind::Integer);
        let note = ColumnSpec::new("note", TypeKind::Text);
        let created = ColumnSpec::new("created", TypeKind::Date);
        let reporter = Reporter::new();
        {
            let guard =
                TempIndexGuard::create(&db, &cancel, &staging, &[&id, &note, &created], &reporter);
            assert_eq!(guard.created(), ["tmp_ix_stg_1", "tmp_ix_stg_2"]);
            let indexes = SchemaIntrospector::new(&session).indexes(&staging).unwrap();
            assert_eq!(indexes.len(), 2);
        }
        assert!(SchemaIntrospector::new(&session).indexes(&staging).unwrap().is_empty());
    }

    #[test]
    fn cleanup_runs_after_cancellation() {
        let db = Database::open_in_memory().unwrap();
        let cancel = CancelToken::new();
        let session = db.connect(&CancelToken::new()).unwrap();
        session.execute_batch("CREATE TABLE stg (id VARCHAR)").unwrap();
        let staging = QualifiedName::new("main", "stg").unwrap();
        let id = ColumnSpec::new("id", TypeKind::Integer);
        let mut guard = TempIndexGuard::create(&db, &cancel, &staging, &[&id], &Reporter::new());
        cancel.cancel();
        assert_eq!(guard.cleanup(), 1);
        assert_eq!(guard.cleanup(), 0);
    }
}
