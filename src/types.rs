//! Target column types and the column specification supplied per dataset.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::{
    error::{LoadError, Result},
    sql::validate_column_name,
};

pub const DECIMAL_MAX_PRECISION: u32 = 38;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DecimalSpec {
    pub precision: u32,
    pub scale: u32,
}

impl DecimalSpec {
    pub fn new(precision: u32, scale: u32) -> Result<Self> {
        let spec = Self { precision, scale };
        spec.ensure_valid()?;
        Ok(spec)
    }

    pub fn ensure_valid(&self) -> Result<()> {
        if self.precision == 0 {
            return Err(LoadError::config("Decimal precision must be positive"));
        }
        if self.precision > DECIMAL_MAX_PRECISION {
            return Err(LoadError::config(format!(
                "Decimal precision must be <= {DECIMAL_MAX_PRECISION}"
            )));
        }
        if self.scale > self.precision {
            return Err(LoadError::config(format!(
                "Decimal scale ({}) cannot exceed precision ({})",
                self.scale, self.precision
            )));
        }
        Ok(())
    }

    pub fn signature(&self) -> String {
        format!("decimal({},{})", self.precision, self.scale)
    }

    /// Number of digits allowed before the decimal point.
    pub fn integer_digits(&self) -> u32 {
        self.precision - self.scale
    }
}

/// The storage type a business column is converted to in the final table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Integer,
    SmallInteger,
    Float,
    Decimal(DecimalSpec),
    Date,
    DateTime,
    Boolean,
    Text,
    Binary,
}

/// Coarse grouping used for drift decisions and validation phases. Types
/// within one category can be altered in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeCategory {
    Numeric,
    DateTime,
    Boolean,
    String,
    Binary,
    Other,
}

impl TypeCategory {
    /// Classifies a live SQL type name as reported by the database, by its
    /// leading type-name token.
    pub fn from_sql_type(data_type: &str) -> Self {
        let upper = data_type.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or_default();
        let token = base.split_whitespace().next().unwrap_or_default();
        match token {
            "BOOLEAN" | "BOOL" | "LOGICAL" => TypeCategory::Boolean,
            "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "HUGEINT" | "UTINYINT"
            | "USMALLINT" | "UINTEGER" | "UBIGINT" | "UHUGEINT" | "INT1" | "INT2" | "INT4"
            | "INT8" | "SHORT" | "LONG" | "SIGNED" | "FLOAT" | "FLOAT4" | "FLOAT8" | "REAL"
            | "DOUBLE" | "DECIMAL" | "NUMERIC" => TypeCategory::Numeric,
            "DATE" | "DATETIME" | "TIME" | "TIMETZ" => TypeCategory::DateTime,
            other if other.starts_with("TIMESTAMP") => TypeCategory::DateTime,
            "VARCHAR" | "CHAR" | "BPCHAR" | "CHARACTER" | "NVARCHAR" | "TEXT" | "STRING" => {
                TypeCategory::String
            }
            "BLOB" | "BYTEA" | "BINARY" | "VARBINARY" => TypeCategory::Binary,
            _ => TypeCategory::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeCategory::Numeric => "numeric",
            TypeCategory::DateTime => "datetime",
            TypeCategory::Boolean => "boolean",
            TypeCategory::String => "string",
            TypeCategory::Binary => "binary",
            TypeCategory::Other => "other",
        }
    }
}

impl fmt::Display for TypeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TypeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeKind::Integer => "integer",
            TypeKind::SmallInteger => "smallint",
            TypeKind::Float => "float",
            TypeKind::Decimal(_) => "decimal",
            TypeKind::Date => "date",
            TypeKind::DateTime => "datetime",
            TypeKind::Boolean => "boolean",
            TypeKind::Text => "text",
            TypeKind::Binary => "binary",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "integer",
            "smallint",
            "float",
            "decimal(precision,scale)",
            "date",
            "datetime",
            "boolean",
            "text",
            "binary",
        ]
    }

    pub fn signature_token(&self) -> String {
        match self {
            TypeKind::Decimal(spec) => spec.signature(),
            _ => self.as_str().to_string(),
        }
    }

    /// SQL type used for the column in the final table.
    pub fn sql_type(&self) -> String {
        match self {
            TypeKind::Integer => "INTEGER".to_string(),
            TypeKind::SmallInteger => "SMALLINT".to_string(),
            TypeKind::Float => "DOUBLE".to_string(),
            TypeKind::Decimal(spec) => format!("DECIMAL({},{})", spec.precision, spec.scale),
            TypeKind::Date => "DATE".to_string(),
            TypeKind::DateTime => "TIMESTAMP".to_string(),
            TypeKind::Boolean => "BOOLEAN".to_string(),
            TypeKind::Text => "VARCHAR".to_string(),
            TypeKind::Binary => "BLOB".to_string(),
        }
    }

    pub fn category(&self) -> TypeCategory {
        match self {
            TypeKind::Integer | TypeKind::SmallInteger | TypeKind::Float | TypeKind::Decimal(_) => {
                TypeCategory::Numeric
            }
            TypeKind::Date | TypeKind::DateTime => TypeCategory::DateTime,
            TypeKind::Boolean => TypeCategory::Boolean,
            TypeKind::Text => TypeCategory::String,
            TypeKind::Binary => TypeCategory::Binary,
        }
    }

    /// Whole-number kinds. The database rounds fractional text when casting
    /// to these, so conversions check the text first.
    pub fn is_integral(&self) -> bool {
        matches!(self, TypeKind::Integer | TypeKind::SmallInteger)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, TypeKind::Text)
    }

    pub fn decimal_spec(&self) -> Option<&DecimalSpec> {
        match self {
            TypeKind::Decimal(spec) => Some(spec),
            _ => None,
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature_token())
    }
}

impl FromStr for TypeKind {
    type Err = LoadError;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "integer" | "int" => Ok(TypeKind::Integer),
            "smallint" | "smallinteger" => Ok(TypeKind::SmallInteger),
            "float" | "double" => Ok(TypeKind::Float),
            "date" => Ok(TypeKind::Date),
            "datetime" | "date-time" | "timestamp" => Ok(TypeKind::DateTime),
            "boolean" | "bool" => Ok(TypeKind::Boolean),
            "text" | "string" | "varchar" => Ok(TypeKind::Text),
            "binary" | "blob" => Ok(TypeKind::Binary),
            other if other.starts_with("decimal") => parse_decimal_type(value),
            _ => Err(LoadError::config(format!(
                "Unknown column type '{value}'. Supported types: {}",
                TypeKind::variants().join(", ")
            ))),
        }
    }
}

impl Serialize for TypeKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.signature_token())
    }
}

impl<'de> Deserialize<'de> for TypeKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        parse_type_value(value).map_err(de::Error::custom)
    }
}

fn parse_type_value(value: serde_yaml::Value) -> Result<TypeKind> {
    if let Some(token) = value.as_str() {
        return TypeKind::from_str(token);
    }

    if let Some(mapping) = value.as_mapping()
        && mapping.len() == 1
        && let Some((key, val)) = mapping.iter().next()
        && key.as_str().map(|k| k.trim().eq_ignore_ascii_case("decimal")) == Some(true)
    {
        let field = |name: &str| -> Result<u32> {
            val.get(name)
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| LoadError::config(format!("Decimal mapping requires {name}")))
        };
        let spec = DecimalSpec::new(field("precision")?, field("scale")?)?;
        return Ok(TypeKind::Decimal(spec));
    }

    Err(LoadError::config(format!(
        "Unsupported column type representation: {value:?}"
    )))
}

fn parse_decimal_type(value: &str) -> Result<TypeKind> {
    let trimmed = value.trim();
    let start = trimmed.find('(').ok_or_else(|| {
        LoadError::config("Decimal type must specify precision and scale, e.g. decimal(18,4)")
    })?;
    if !trimmed.ends_with(')') {
        return Err(LoadError::config(
            "Decimal type must close with ')', e.g. decimal(18,4)",
        ));
    }
    let inner = &trimmed[start + 1..trimmed.len() - 1];
    let mut precision: Option<u32> = None;
    let mut scale: Option<u32> = None;
    let mut positional = Vec::new();

    for part in inner.split(',') {
        let token = part.trim();
        if token.is_empty() {
            continue;
        }
        if let Some((key, raw)) = token
            .split_once(['=', ':'])
            .map(|(k, v)| (k.trim(), v.trim()))
        {
            let parsed = parse_u32(raw, token)?;
            match key.to_ascii_lowercase().as_str() {
                "precision" => precision = Some(parsed),
                "scale" => scale = Some(parsed),
                other => {
                    return Err(LoadError::config(format!(
                        "Unknown decimal option '{other}' in '{token}'"
                    )));
                }
            }
        } else {
            positional.push(token);
        }
    }

    if positional.len() > 2 {
        return Err(LoadError::config(
            "Decimal type accepts at most two positional arguments",
        ));
    }
    if let Some(first) = positional.first()
        && precision.is_none()
    {
        precision = Some(parse_u32(first, value)?);
    }
    if let Some(second) = positional.get(1)
        && scale.is_none()
    {
        scale = Some(parse_u32(second, value)?);
    }

    let precision = precision.ok_or_else(|| {
        LoadError::config("Decimal type requires a precision value, e.g. decimal(18,4)")
    })?;
    let scale = scale.ok_or_else(|| {
        LoadError::config("Decimal type requires a scale value, e.g. decimal(18,4)")
    })?;
    Ok(TypeKind::Decimal(DecimalSpec::new(precision, scale)?))
}

fn parse_u32(raw: &str, context: &str) -> Result<u32> {
    raw.parse()
        .map_err(|_| LoadError::config(format!("Invalid number '{raw}' in '{context}'")))
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TypeKind,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn category(&self) -> TypeCategory {
        self.kind.category()
    }
}

/// A column that the pipeline appends to every staging and final table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataColumn {
    pub name: &'static str,
    pub sql_type: &'static str,
}

pub const LOADED_AT: &str = "loaded_at";
pub const CREATED_AT: &str = "created_at";
pub const SOURCE_FILE: &str = "source_file";
pub const BATCH_ID: &str = "batch_id";
pub const UPSERT_HASH: &str = "upsert_hash";

pub const METADATA_COLUMNS: [MetadataColumn; 5] = [
    MetadataColumn { name: LOADED_AT, sql_type: "TIMESTAMP" },
    MetadataColumn { name: CREATED_AT, sql_type: "TIMESTAMP" },
    MetadataColumn { name: SOURCE_FILE, sql_type: "VARCHAR(500)" },
    MetadataColumn { name: BATCH_ID, sql_type: "VARCHAR(36)" },
    MetadataColumn { name: UPSERT_HASH, sql_type: "BLOB" },
];

pub fn is_metadata_column(name: &str) -> bool {
    METADATA_COLUMNS
        .iter()
        .any(|column| column.name.eq_ignore_ascii_case(name))
}

/// Ordered, name-unique set of business columns for one dataset. The order
/// is the column order of the final table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RequiredColumns(Vec<ColumnSpec>);

impl RequiredColumns {
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for column in &columns {
            validate_column_name(&column.name)?;
            if is_metadata_column(&column.name) {
                return Err(LoadError::config(format!(
                    "Column '{}' collides with a metadata column",
                    column.name
                )));
            }
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(LoadError::config(format!(
                    "Duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(Self(columns))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnSpec> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ColumnSpec> {
        self.0.iter().find(|column| column.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|column| column.name.as_str()).collect()
    }

    pub fn in_category(&self, category: TypeCategory) -> Vec<&ColumnSpec> {
        self.0
            .iter()
            .filter(|column| column.category() == category)
            .collect()
    }
}

impl<'de> Deserialize<'de> for RequiredColumns {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let columns = Vec::<ColumnSpec>::deserialize(deserializer)?;
        RequiredColumns::new(columns).map_err(de::Error::custom)
    }
}

impl<'a> IntoIterator for &'a RequiredColumns {
    type Item = &'a ColumnSpec;
    type IntoIter = std::slice::Iter<'a, ColumnSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
