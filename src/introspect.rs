//! Live table metadata read from the database catalogue.

use serde::Serialize;

use crate::{
    db::Session,
    error::Result,
    sql::QualifiedName,
    types::TypeCategory,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveColumn {
    pub name: String,
    pub data_type: String,
    pub max_length: Option<i64>,
    pub precision: Option<i64>,
    pub scale: Option<i64>,
    pub nullable: bool,
    pub ordinal: i64,
}

impl LiveColumn {
    pub fn category(&self) -> TypeCategory {
        TypeCategory::from_sql_type(&self.data_type)
    }

    /// Text column with a declared maximum length.
    pub fn is_bounded_text(&self) -> bool {
        self.category() == TypeCategory::String && self.max_length.is_some_and(|len| len > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub is_unique: bool,
    pub sql: Option<String>,
}

pub struct SchemaIntrospector<'a> {
    session: &'a Session,
}

impl<'a> SchemaIntrospector<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub fn table_exists(&self, table: &QualifiedName) -> Result<bool> {
        let count = self.session.query_count(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
            &[&table.schema, &table.table],
        )?;
        Ok(count > 0)
    }

    /// Columns of `table` in ordinal order; empty when the table is absent.
    pub fn columns(&self, table: &QualifiedName) -> Result<Vec<LiveColumn>> {
        self.session.query_rows(
            "SELECT column_name, data_type, \
                    CAST(character_maximum_length AS BIGINT), \
                    CAST(numeric_precision AS BIGINT), \
                    CAST(numeric_scale AS BIGINT), \
                    is_nullable, \
                    CAST(ordinal_position AS BIGINT) \
             FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? \
             ORDER BY ordinal_position",
            &[&table.schema, &table.table],
            |row| {
                let nullable: String = row.get(5)?;
                Ok(LiveColumn {
                    name: row.get(0)?,
                    data_type: row.get(1)?,
                    max_length: row.get(2)?,
                    precision: row.get(3)?,
                    scale: row.get(4)?,
                    nullable: nullable.eq_ignore_ascii_case("YES"),
                    ordinal: row.get(6)?,
                })
            },
        )
    }

    pub fn indexes(&self, table: &QualifiedName) -> Result<Vec<IndexInfo>> {
        self.session.query_rows(
            "SELECT index_name, is_unique, sql FROM duckdb_indexes() \
             WHERE schema_name = ? AND table_name = ? ORDER BY index_name",
            &[&table.schema, &table.table],
            |row| {
                Ok(IndexInfo {
                    name: row.get(0)?,
                    is_unique: row.get(1)?,
                    sql: row.get(2)?,
                })
            },
        )
    }

    pub fn index_exists(&self, schema: &str, index_name: &str) -> Result<bool> {
        let count = self.session.query_count(
            "SELECT COUNT(*) FROM duckdb_indexes() WHERE schema_name = ? AND index_name = ?",
            &[&schema, &index_name],
        )?;
        Ok(count > 0)
    }
}
