//! Pipeline configuration loaded from YAML or JSON.
//!
//! A [`PipelineConfig`] is built once and passed into the coordinator; nothing
//! here is cached globally or reloaded behind the caller's back.

use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    dates::DateFormatPolicy,
    error::{LoadError, Result},
    sql::{QualifiedName, validate_identifier},
    staging::DEFAULT_BATCH_SIZE,
    transfer::UpdateStrategy,
    types::RequiredColumns,
    validate::{BooleanVocabulary, ValidationRules, orchestrator::DEFAULT_WORKERS},
};

pub const DEFAULT_SCHEMA: &str = "bronze";

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub validation_workers: usize,
    #[serde(default = "default_true")]
    pub create_temp_indexes: bool,
    #[serde(default = "default_true")]
    pub build_support_indexes: bool,
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            batch_size: DEFAULT_BATCH_SIZE,
            validation_workers: DEFAULT_WORKERS,
            create_temp_indexes: true,
            build_support_indexes: true,
            datasets: BTreeMap::new(),
        }
    }
}

/// Per-dataset settings: target table, write strategy, and column types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upsert_keys: Vec<String>,
    #[serde(default)]
    pub date_format: DateFormatPolicy,
    #[serde(default)]
    pub deduplicate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean_values: Option<BooleanVocabulary>,
    pub columns: RequiredColumns,
    #[serde(default, skip_serializing_if = "ValidationRules::is_empty")]
    pub rules: ValidationRules,
}

impl PipelineConfig {
    /// Reads a config file; `.json` files are parsed as JSON, anything else
    /// as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config: PipelineConfig = if is_json {
            serde_json::from_reader(reader)?
        } else {
            serde_yaml::from_reader(reader)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.schema)?;
        if self.batch_size == 0 {
            return Err(LoadError::config("batch_size must be positive"));
        }
        if self.validation_workers == 0 {
            return Err(LoadError::config("validation_workers must be positive"));
        }
        for (name, dataset) in &self.datasets {
            dataset
                .validate(name, &self.schema)
                .map_err(|err| LoadError::config(format!("dataset '{name}': {err}")))?;
        }
        Ok(())
    }

    pub fn dataset(&self, name: &str) -> Result<&DatasetConfig> {
        self.datasets.get(name).ok_or_else(|| {
            let known = self.datasets.keys().cloned().collect::<Vec<_>>().join(", ");
            LoadError::config(format!("Unknown dataset '{name}' (configured: {known})"))
        })
    }
}

impl DatasetConfig {
    pub fn new(columns: RequiredColumns) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    /// Final table for this dataset. The dataset name is used when no
    /// override is configured; a `schema.table` override wins over `schema`.
    pub fn table(&self, dataset_name: &str, schema: &str) -> Result<QualifiedName> {
        QualifiedName::parse(self.table_name.as_deref().unwrap_or(dataset_name), schema)
    }

    pub fn validate(&self, dataset_name: &str, schema: &str) -> Result<()> {
        self.table(dataset_name, schema)?;
        if self.columns.is_empty() {
            return Err(LoadError::config("at least one column is required"));
        }
        if self.update_strategy == UpdateStrategy::Upsert && self.upsert_keys.is_empty() {
            return Err(LoadError::config("upsert strategy requires upsert_keys"));
        }
        if let Some(key) = self
            .upsert_keys
            .iter()
            .find(|key| self.columns.get(key).is_none())
        {
            return Err(LoadError::config(format!(
                "upsert key '{key}' is not a configured column"
            )));
        }
        if let Some(vocabulary) = &self.boolean_values {
            vocabulary.ensure_valid()?;
        }
        self.rules.ensure_valid(&self.columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeKind;
    use std::io::Write;

    const SAMPLE: &str = r#"
schema: bronze
batch_size: 100
datasets:
  sales:
    table_name: sales_fact
    update_strategy: upsert
    upsert_keys: [id]
    date_format: US
    boolean_values:
      true_values: [Active]
      false_values: [Inactive]
    columns:
      - { name: id, type: integer, nullable: false }
      - { name: amount, type: "decimal(10,2)" }
      - { name: created, type: date }
      - { name: status, type: bool }
    rules:
      numeric_ranges:
        amount: { min: 0 }
"#;

    #[test]
    fn parses_full_yaml_with_defaults() {
        let config = PipelineConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.validation_workers, DEFAULT_WORKERS);
        assert!(config.create_temp_indexes);
        let sales = config.dataset("sales").unwrap();
        assert_eq!(sales.update_strategy, UpdateStrategy::Upsert);
        assert_eq!(sales.date_format, DateFormatPolicy::US);
        assert_eq!(sales.columns.len(), 4);
        assert!(!sales.columns.get("id").unwrap().nullable);
        assert_eq!(sales.columns.get("status").unwrap().kind, TypeKind::Boolean);
        assert_eq!(
            sales.table("sales", &config.schema).unwrap().to_string(),
            "bronze.sales_fact"
        );
        assert_eq!(sales.rules.numeric_ranges["amount"].min, Some(0.0));
    }

    #[test]
    fn rejects_inconsistent_datasets() {
        let cases = [
            ("update_strategy: upsert", "requires upsert_keys"),
            ("upsert_keys: [nope]", "not a configured column"),
            ("table_name: drop", "Invalid identifier"),
            (
                "boolean_values: { true_values: [Y], false_values: [y] }",
                "both true and false",
            ),
        ];
        for (extra, expected) in cases {
            let yaml = format!(
                "datasets:\n  d:\n    {extra}\n    columns:\n      - {{ name: id, type: integer }}\n"
            );
            let err = PipelineConfig::from_yaml_str(&yaml).unwrap_err();
            assert!(err.to_string().contains(expected), "{extra}: {err}");
        }
    }

    #[test]
    fn rejects_metadata_column_names_and_zero_batches() {
        let yaml = "datasets:\n  d:\n    columns:\n      - { name: batch_id, type: text }\n";
        assert!(PipelineConfig::from_yaml_str(yaml).is_err());
        assert!(PipelineConfig::from_yaml_str("batch_size: 0").is_err());
    }

    #[test]
    fn loads_json_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"datasets": {{"d": {{"columns": [{{"name": "id", "type": "int"}}]}}}}}}"#
        )
        .unwrap();
        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.schema, DEFAULT_SCHEMA);
        assert_eq!(
            config.dataset("d").unwrap().columns.get("id").unwrap().kind,
            TypeKind::Integer
        );
        assert!(config.dataset("missing").is_err());
    }
}
