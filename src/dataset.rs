//! In-memory tabular dataset consumed by the pipeline.

use std::{io::Read, path::Path};

use encoding_rs::Encoding;
use log::info;

use crate::{
    error::{LoadError, Result},
    io_utils,
    types::RequiredColumns,
};

/// Ordered rows of named text columns plus their provenance. Empty cells are
/// `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    pub source_file: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Dataset {
    pub fn new(
        source_file: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<Option<String>>>,
    ) -> Result<Self> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(LoadError::config(format!(
                "Row {} has {} value(s) but the dataset has {} column(s)",
                idx + 1,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self {
            source_file: source_file.into(),
            columns,
            rows,
        })
    }

    /// Builds a dataset from string literals; empty strings become `None`.
    pub fn from_strings(source_file: &str, columns: &[&str], rows: &[&[&str]]) -> Result<Self> {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|value| cell(value)).collect())
            .collect();
        Self::new(
            source_file,
            columns.iter().map(|c| c.to_string()).collect(),
            rows,
        )
    }

    pub fn from_csv_path(
        path: &Path,
        delimiter: Option<u8>,
        encoding: &'static Encoding,
    ) -> Result<Self> {
        let delimiter = io_utils::resolve_input_delimiter(path, delimiter);
        let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
        let source = match path.file_name() {
            Some(name) if !io_utils::is_dash(path) => name.to_string_lossy().into_owned(),
            _ => "stdin".to_string(),
        };
        let dataset = Self::from_csv_reader(&mut reader, &source, encoding)?;
        info!(
            "Read {} row(s) across {} column(s) from {:?}",
            dataset.row_count(),
            dataset.columns.len(),
            path
        );
        Ok(dataset)
    }

    pub fn from_csv_reader<R: Read>(
        reader: &mut csv::Reader<R>,
        source_file: &str,
        encoding: &'static Encoding,
    ) -> Result<Self> {
        let columns = io_utils::reader_headers(reader, encoding)?
            .into_iter()
            .map(|header| header.trim_start_matches('\u{feff}').trim().to_string())
            .collect::<Vec<_>>();
        let mut rows = Vec::new();
        let mut record = csv::ByteRecord::new();
        while reader.read_byte_record(&mut record)? {
            let decoded = io_utils::decode_record(&record, encoding)?;
            rows.push(decoded.iter().map(|value| cell(value)).collect());
        }
        Self::new(source_file, columns, rows)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn values<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = Option<&'a str>> + 'a> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| row[idx].as_deref()))
    }

    /// Required columns that have no counterpart in this dataset.
    pub fn missing_columns(&self, required: &RequiredColumns) -> Vec<String> {
        required
            .iter()
            .filter(|column| self.column_index(&column.name).is_none())
            .map(|column| column.name.clone())
            .collect()
    }
}

fn cell(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
