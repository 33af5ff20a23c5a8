use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::dates::DateFormatPolicy;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Stage, validate and load tabular files into DuckDB tables",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Stage, validate and write a file into its configured table
    Load(LoadArgs),
    /// Stage and validate a file without touching the final table
    Check(CheckArgs),
    /// Print the live column definitions and indexes of a table
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Pipeline configuration file (.yaml, .yml or .json)
    #[arg(short, long)]
    pub config: PathBuf,
    /// Dataset name from the configuration's `datasets` section
    #[arg(short = 's', long)]
    pub dataset: String,
    /// Input CSV file (`-` reads stdin)
    #[arg(short, long)]
    pub input: PathBuf,
    /// DuckDB database file (created when missing)
    #[arg(short, long)]
    pub database: PathBuf,
    /// Override the dataset's date format (UK or US)
    #[arg(long = "date-format", value_parser = parse_date_format)]
    pub date_format: Option<DateFormatPolicy>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Abort the run after this many seconds
    #[arg(long = "timeout-secs")]
    pub timeout_secs: Option<u64>,
    /// Print the result as JSON instead of tables
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Drop and recreate the final table even when its definition matches
    #[arg(long = "force-recreate")]
    pub force_recreate: bool,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub input: InputArgs,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// DuckDB database file
    #[arg(short, long)]
    pub database: PathBuf,
    /// Table as `schema.table`; a bare name uses --schema
    #[arg(short, long)]
    pub table: String,
    /// Schema used when --table has no schema part
    #[arg(long, default_value = crate::config::DEFAULT_SCHEMA)]
    pub schema: String,
    /// Print the result as JSON instead of tables
    #[arg(long)]
    pub json: bool,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

pub fn parse_date_format(value: &str) -> Result<DateFormatPolicy, String> {
    value.parse().map_err(|err| format!("{err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiters_accept_names_and_single_ascii_characters() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter(";"), Ok(b';'));
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("§").is_err());
    }

    #[test]
    fn date_format_is_case_insensitive() {
        assert_eq!(parse_date_format("us"), Ok(DateFormatPolicy::US));
        assert_eq!(parse_date_format("UK"), Ok(DateFormatPolicy::UK));
        assert!(parse_date_format("ISO").is_err());
    }

    #[test]
    fn load_command_parses_flattened_input_args() {
        let cli = Cli::try_parse_from([
            "tabload",
            "load",
            "-c",
            "cfg.yaml",
            "-s",
            "sales",
            "-i",
            "sales.csv",
            "-d",
            "db.duckdb",
            "--date-format",
            "US",
            "--force-recreate",
        ])
        .unwrap();
        let Commands::Load(args) = cli.command else {
            panic!("expected load");
        };
        assert!(args.force_recreate);
        assert_eq!(args.input.dataset, "sales");
        assert_eq!(args.input.date_format, Some(DateFormatPolicy::US));
    }
}
