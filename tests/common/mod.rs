#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tabload::{
    config::PipelineConfig,
    dataset::Dataset,
    db::{CancelToken, Database},
    report::Reporter,
    upload::{UploadCoordinator, UploadOptions, UploadResult},
};
use tempfile::{TempDir, tempdir};

pub const PEOPLE_YAML: &str = r#"
schema: bronze
batch_size: 2
datasets:
  people:
    update_strategy: replace
    upsert_keys: [id]
    columns:
      - { name: id, type: integer, nullable: false }
      - { name: name, type: text }
      - { name: joined, type: date }
      - { name: active, type: boolean }
"#;

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Parses `yaml` after replacing the `update_strategy` line of the first
/// dataset.
pub fn config_with_strategy(yaml: &str, strategy: &str) -> PipelineConfig {
    let yaml = yaml.replace(
        "update_strategy: replace",
        &format!("update_strategy: {strategy}"),
    );
    PipelineConfig::from_yaml_str(&yaml).expect("valid config")
}

pub fn dataset(columns: &[&str], rows: &[&[&str]]) -> Dataset {
    Dataset::from_strings("people.csv", columns, rows).expect("dataset")
}

pub fn upload(db: &Database, config: &PipelineConfig, name: &str, data: &Dataset) -> UploadResult {
    let reporter = Reporter::new();
    UploadCoordinator::new(db, config, &reporter)
        .upload(name, data, &UploadOptions::default(), &CancelToken::new())
        .expect("upload runs")
}

/// Every row of `sql` with each column cast to optional text.
pub fn rows(db: &Database, sql: &str, width: usize) -> Vec<Vec<Option<String>>> {
    let session = db.connect(&CancelToken::new()).expect("session");
    session
        .query_rows(sql, &[], |row| {
            (0..width)
                .map(|idx| row.get::<_, Option<String>>(idx))
                .collect()
        })
        .expect("query")
}

pub fn count(db: &Database, sql: &str) -> i64 {
    let session = db.connect(&CancelToken::new()).expect("session");
    session.query_count(sql, &[]).expect("count")
}

pub fn text(values: &[&str]) -> Vec<Option<String>> {
    values
        .iter()
        .map(|value| {
            if *value == "NULL" {
                None
            } else {
                Some(value.to_string())
            }
        })
        .collect()
}
