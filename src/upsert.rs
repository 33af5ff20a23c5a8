//! Content hashes over upsert keys and hash-matched deletes.
//!
//! The hash is `md5` over the key values rendered as text, trimmed and joined
//! with the ASCII unit separator (`chr(31)`), stored as 16 raw bytes. Staged
//! keys are hashed after conversion to their column type, and final rows from
//! their typed values, so `1,000` and `1000` hash alike. Matching is a single
//! equi-join on the hash column, so key columns never need an index.

use itertools::Itertools;

use crate::{
    db::Session,
    error::{LoadError, Result},
    introspect::SchemaIntrospector,
    sql::{QualifiedName, quote_ident},
    types::UPSERT_HASH,
};

pub struct UpsertHasher<'a> {
    session: &'a Session,
}

/// SQL producing the 16-byte hash of `values`, one SQL expression per key.
pub fn hash_expression(values: &[String]) -> String {
    let parts = values
        .iter()
        .map(|value| format!("COALESCE(TRIM(CAST({value} AS VARCHAR)), '')"))
        .join(", ");
    format!("unhex(md5(concat_ws(chr(31), {parts})))")
}

impl<'a> UpsertHasher<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Fails unless every key exists in `table` and holds no null or blank
    /// values. Runs before anything is hashed or deleted.
    pub fn check_keys(&self, table: &QualifiedName, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Err(LoadError::UpsertPrecondition(
                "no upsert key columns configured".to_string(),
            ));
        }
        let live = SchemaIntrospector::new(self.session).columns(table)?;
        let missing = keys
            .iter()
            .filter(|key| !live.iter().any(|column| &column.name == *key))
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(LoadError::UpsertPrecondition(format!(
                "key column(s) not found in {table}: {}",
                missing.join(", ")
            )));
        }
        for key in keys {
            let nulls = self.session.query_count(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE NULLIF(TRIM(CAST({} AS VARCHAR)), '') IS NULL",
                    table.quoted(),
                    quote_ident(key)
                ),
                &[],
            )?;
            if nulls > 0 {
                return Err(LoadError::UpsertPrecondition(format!(
                    "key column '{key}' has {nulls} null or empty value(s) in {table}"
                )));
            }
        }
        Ok(())
    }

    /// Validates the keys, then writes the hash into every staging row.
    /// `typed_value` renders the SQL converting a staged key column to its
    /// final type.
    pub fn compute_hash(
        &self,
        staging: &QualifiedName,
        keys: &[String],
        typed_value: impl Fn(&str) -> String,
    ) -> Result<usize> {
        self.check_keys(staging, keys)?;
        let values = keys.iter().map(|key| typed_value(key)).collect::<Vec<_>>();
        self.session.execute(
            &format!(
                "UPDATE {} SET {} = {}",
                staging.quoted(),
                quote_ident(UPSERT_HASH),
                hash_expression(&values)
            ),
            &[],
        )
    }

    /// Fills in hashes for final-table rows written without one, e.g. by an
    /// earlier replace or append load.
    pub fn backfill(&self, final_table: &QualifiedName, keys: &[String]) -> Result<usize> {
        let values = keys.iter().map(|key| quote_ident(key)).collect::<Vec<_>>();
        self.session.execute(
            &format!(
                "UPDATE {table} SET {hash} = {expr} WHERE {hash} IS NULL",
                table = final_table.quoted(),
                hash = quote_ident(UPSERT_HASH),
                expr = hash_expression(&values)
            ),
            &[],
        )
    }

    /// Deletes final rows whose hash appears in staging.
    pub fn delete_matching(
        &self,
        final_table: &QualifiedName,
        staging: &QualifiedName,
    ) -> Result<usize> {
        let hash = quote_ident(UPSERT_HASH);
        self.session.execute(
            &format!(
                "DELETE FROM {final_q} AS f USING (SELECT DISTINCT {hash} FROM {staging_q} \
                 WHERE {hash} IS NOT NULL) AS s WHERE f.{hash} = s.{hash}",
                final_q = final_table.quoted(),
                staging_q = staging.quoted(),
            ),
            &[],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CancelToken, Database};

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn setup() -> (Database, QualifiedName) {
        let db = Database::open_in_memory().unwrap();
        let session = db.connect(&CancelToken::new()).unwrap();
        session
            .execute_batch(
                "CREATE TABLE stg (id VARCHAR, region VARCHAR, upsert_hash BLOB); \
                 INSERT INTO stg VALUES ('1', 'N', NULL), (' 1 ', 'N', NULL), ('2', 'S', NULL);",
            )
            .unwrap();
        (db, QualifiedName::new("main", "stg").unwrap())
    }

    #[test]
    fn hashes_are_sixteen_bytes_and_ignore_surrounding_whitespace() {
        let (db, staging) = setup();
        let session = db.connect(&CancelToken::new()).unwrap();
        let hasher = UpsertHasher::new(&session);
        let hashed = hasher
            .compute_hash(&staging, &keys(&["id", "region"]), quote_ident)
            .unwrap();
        assert_eq!(hashed, 3);

        let lengths = session
            .query_count("SELECT COUNT(*) FROM stg WHERE octet_length(upsert_hash) = 16", &[])
            .unwrap();
        assert_eq!(lengths, 3);
        let distinct = session
            .query_count("SELECT COUNT(DISTINCT upsert_hash) FROM stg", &[])
            .unwrap();
        assert_eq!(distinct, 2);

        let first = session
            .query_column("SELECT hex(upsert_hash) FROM stg ORDER BY id LIMIT 1", &[])
            .unwrap();
        hasher
            .compute_hash(&staging, &keys(&["id", "region"]), quote_ident)
            .unwrap();
        let again = session
            .query_column("SELECT hex(upsert_hash) FROM stg ORDER BY id LIMIT 1", &[])
            .unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn separator_keeps_key_boundaries_distinct() {
        let db = Database::open_in_memory().unwrap();
        let session = db.connect(&CancelToken::new()).unwrap();
        session
            .execute_batch(
                "CREATE TABLE stg (a VARCHAR, b VARCHAR, upsert_hash BLOB); \
                 INSERT INTO stg VALUES ('ab', 'c', NULL), ('a', 'bc', NULL);",
            )
            .unwrap();
        let staging = QualifiedName::new("main", "stg").unwrap();
        UpsertHasher::new(&session)
            .compute_hash(&staging, &keys(&["a", "b"]), quote_ident)
            .unwrap();
        let distinct = session
            .query_count("SELECT COUNT(DISTINCT upsert_hash) FROM stg", &[])
            .unwrap();
        assert_eq!(distinct, 2);
    }

    #[test]
    fn null_or_missing_keys_fail_before_hashing() {
        let (db, staging) = setup();
        let session = db.connect(&CancelToken::new()).unwrap();
        session
            .execute_batch("INSERT INTO stg VALUES (NULL, 'N', NULL)")
            .unwrap();
        let hasher = UpsertHasher::new(&session);
        let err = hasher
            .compute_hash(&staging, &keys(&["id"]), quote_ident)
            .unwrap_err();
        assert!(matches!(err, LoadError::UpsertPrecondition(ref msg) if msg.contains("'id'")));
        let err = hasher
            .compute_hash(&staging, &keys(&["nope"]), quote_ident)
            .unwrap_err();
        assert!(matches!(err, LoadError::UpsertPrecondition(ref msg) if msg.contains("nope")));
        let hashed = session
            .query_count("SELECT COUNT(upsert_hash) FROM stg", &[])
            .unwrap();
        assert_eq!(hashed, 0);
    }

    #[test]
    fn delete_matching_removes_only_shared_hashes() {
        let (db, staging) = setup();
        let session = db.connect(&CancelToken::new()).unwrap();
        session
            .execute_batch(
                "CREATE TABLE target (id INTEGER, region VARCHAR, upsert_hash BLOB); \
                 INSERT INTO target VALUES (1, 'N', NULL), (3, 'E', NULL);",
            )
            .unwrap();
        let target = QualifiedName::new("main", "target").unwrap();
        let hasher = UpsertHasher::new(&session);
        hasher
            .compute_hash(&staging, &keys(&["id", "region"]), quote_ident)
            .unwrap();
        assert_eq!(hasher.backfill(&target, &keys(&["id", "region"])).unwrap(), 2);
        assert_eq!(hasher.delete_matching(&target, &staging).unwrap(), 1);
        let remaining = session
            .query_column("SELECT CAST(id AS VARCHAR) FROM target", &[])
            .unwrap();
        assert_eq!(remaining, [Some("3".to_string())]);
    }
}
