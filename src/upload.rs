//! Top-level upload: stage, validate, then write the final table.
//!
//! Flow for one call:
//!
//! 1. recreate the staging table and bulk load the dataset into it;
//! 2. validate the staged rows; on blocking issues drop staging and return a
//!    failure result carrying the issue payload;
//! 3. for upserts, check the key columns of the staged rows; a violation is
//!    returned as an error before the final table is touched;
//! 4. create, alter or recreate the final table;
//! 5. inside one transaction, apply the write strategy and run the typed
//!    `INSERT … SELECT`;
//! 6. rebuild the support indexes.
//!
//! The staging table is kept after a successful load and overwritten by the
//! next call for the same table.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{DatasetConfig, PipelineConfig},
    dataset::Dataset,
    dates::DateFormatPolicy,
    db::{CancelToken, Database, Session},
    diagnostics::{self, ProblemColumn},
    error::{LoadError, Result},
    report::Reporter,
    sql::QualifiedName,
    staging::{BatchInfo, StagingTableManager},
    transfer::{ConversionOptions, TableAction, TransferEngine, TransferOutcome, UpdateStrategy},
    upsert::UpsertHasher,
    validate::{
        ValidationContext, ValidationIssue, ValidationOptions, ValidationOrchestrator,
        ValidationReport,
    },
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub force_recreate: bool,
    /// Overrides the dataset's configured date format for this call.
    pub date_format: Option<DateFormatPolicy>,
}

/// Blocking issues kept apart from advisory ones, as rendered to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePayload {
    pub summary: String,
    pub issues: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    pub success: bool,
    pub table: QualifiedName,
    pub rows_inserted: u64,
    pub message: String,
    pub issues: Vec<ValidationIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailurePayload>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problem_columns: Vec<ProblemColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<TableAction>,
    pub deleted_rows: u64,
    pub duplicates_removed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
}

impl UploadResult {
    fn failed(table: &QualifiedName, message: impl Into<String>) -> Self {
        Self {
            success: false,
            table: table.clone(),
            rows_inserted: 0,
            message: message.into(),
            issues: Vec::new(),
            failure: None,
            problem_columns: Vec::new(),
            action: None,
            deleted_rows: 0,
            duplicates_removed: 0,
            batch_id: None,
        }
    }
}

/// Everything resolved for one dataset before any SQL runs.
struct Plan<'c> {
    settings: &'c DatasetConfig,
    table: QualifiedName,
    staging: QualifiedName,
    date_policy: DateFormatPolicy,
}

pub struct UploadCoordinator<'a> {
    db: &'a Database,
    config: &'a PipelineConfig,
    reporter: &'a Reporter,
}

impl<'a> UploadCoordinator<'a> {
    pub fn new(db: &'a Database, config: &'a PipelineConfig, reporter: &'a Reporter) -> Self {
        Self {
            db,
            config,
            reporter,
        }
    }

    /// Loads `dataset` into the table configured for `dataset_name`.
    ///
    /// Data-quality and unexpected transfer failures come back as an
    /// unsuccessful [`UploadResult`]. Connectivity failures, upsert
    /// precondition violations and cancellation come back as `Err`.
    pub fn upload(
        &self,
        dataset_name: &str,
        dataset: &Dataset,
        options: &UploadOptions,
        cancel: &CancelToken,
    ) -> Result<UploadResult> {
        let plan = self.plan(dataset_name, options)?;
        if dataset.is_empty() {
            self.reporter
                .warn(&format!("No rows to load for {}", plan.table));
            return Ok(UploadResult::failed(&plan.table, "Empty data"));
        }
        let missing = dataset.missing_columns(&plan.settings.columns);
        if !missing.is_empty() {
            return Err(LoadError::MissingColumns(missing));
        }

        let session = self.db.connect(cancel)?;
        let batch = BatchInfo::new(dataset.source_file.clone());
        self.reporter.info(&format!(
            "Loading {} row(s) from '{}' into {} (batch {}, strategy {})",
            dataset.row_count(),
            dataset.source_file,
            plan.table,
            batch.batch_id,
            plan.settings.update_strategy
        ));

        let report = self.stage_and_validate(&session, &plan, dataset, &batch, cancel)?;
        if !report.is_valid {
            StagingTableManager::new(&session, self.reporter).drop_table(&plan.staging)?;
            let mut result = UploadResult::failed(
                &plan.table,
                format!("Validation failed: {}", report.summary),
            );
            result.issues = report.all_issues().cloned().collect();
            result.failure = Some(FailurePayload {
                summary: report.summary.clone(),
                issues: report.issues.clone(),
                warnings: report.advisory(),
            });
            result.batch_id = Some(batch.batch_id);
            return Ok(result);
        }

        if plan.settings.update_strategy == UpdateStrategy::Upsert {
            UpsertHasher::new(&session).check_keys(&plan.staging, &plan.settings.upsert_keys)?;
        }
        let engine = TransferEngine::new(&session, self.reporter);
        let written = engine
            .ensure_final_table(&plan.table, &plan.settings.columns, options.force_recreate)
            .and_then(|action| {
                engine.drop_support_indexes(&plan.table)?;
                let (deleted, outcome) = self.write(&session, &plan)?;
                Ok((action, deleted, outcome))
            });
        let (action, deleted_rows, outcome) = match written {
            Ok(written) => written,
            Err(err) if err.is_cancellation() || matches!(err, LoadError::UpsertPrecondition(_)) => {
                return Err(err);
            }
            Err(err) => {
                let short = diagnostics::short_error_message(&err.to_string());
                self.reporter
                    .warn(&format!("Transfer into {} failed: {short}", plan.table));
                let mut result = UploadResult::failed(&plan.table, short);
                result.problem_columns = diagnostics::detect_problem_columns(
                    dataset,
                    &plan.settings.columns,
                    plan.date_policy,
                    plan.settings.boolean_values.as_ref(),
                );
                result.issues = report.advisory();
                result.batch_id = Some(batch.batch_id);
                return Ok(result);
            }
        };

        if self.config.build_support_indexes {
            engine.build_support_indexes(&plan.table);
        }
        let message = format!(
            "Loaded {} row(s) into {}",
            outcome.rows_inserted, plan.table
        );
        self.reporter.info(&message);
        Ok(UploadResult {
            success: true,
            table: plan.table,
            rows_inserted: outcome.rows_inserted,
            message,
            issues: report.advisory(),
            failure: None,
            problem_columns: Vec::new(),
            action: Some(action),
            deleted_rows,
            duplicates_removed: outcome.duplicates_removed,
            batch_id: Some(batch.batch_id),
        })
    }

    /// Stages and validates without touching the final table. Staging is
    /// dropped when validation blocks, as in [`Self::upload`].
    pub fn validate_only(
        &self,
        dataset_name: &str,
        dataset: &Dataset,
        options: &UploadOptions,
        cancel: &CancelToken,
    ) -> Result<ValidationReport> {
        let plan = self.plan(dataset_name, options)?;
        let missing = dataset.missing_columns(&plan.settings.columns);
        if !missing.is_empty() {
            return Err(LoadError::MissingColumns(missing));
        }
        let session = self.db.connect(cancel)?;
        let batch = BatchInfo::new(dataset.source_file.clone());
        let report = self.stage_and_validate(&session, &plan, dataset, &batch, cancel)?;
        if !report.is_valid {
            StagingTableManager::new(&session, self.reporter).drop_table(&plan.staging)?;
        }
        Ok(report)
    }

    fn plan(&self, dataset_name: &str, options: &UploadOptions) -> Result<Plan<'a>> {
        let settings = self.config.dataset(dataset_name)?;
        let table = settings.table(dataset_name, &self.config.schema)?;
        let staging = table.staging();
        Ok(Plan {
            settings,
            table,
            staging,
            date_policy: options.date_format.unwrap_or(settings.date_format),
        })
    }

    fn stage_and_validate(
        &self,
        session: &Session,
        plan: &Plan<'_>,
        dataset: &Dataset,
        batch: &BatchInfo,
        cancel: &CancelToken,
    ) -> Result<ValidationReport> {
        let stager = StagingTableManager::new(session, self.reporter);
        stager.create(&plan.staging, &plan.settings.columns)?;
        let staged = stager.bulk_load(
            &plan.staging,
            &plan.settings.columns,
            dataset,
            batch,
            self.config.batch_size,
        )?;

        let upsert_keys: &[String] = if plan.settings.update_strategy == UpdateStrategy::Upsert {
            &plan.settings.upsert_keys
        } else {
            &[]
        };
        let ctx = ValidationContext {
            staging: &plan.staging,
            final_table: &plan.table,
            required: &plan.settings.columns,
            date_policy: plan.date_policy,
            vocabulary: plan.settings.boolean_values.as_ref(),
            rules: &plan.settings.rules,
            upsert_keys,
            total_rows: staged as u64,
        };
        let options = ValidationOptions {
            workers: self.config.validation_workers,
            create_temp_indexes: self.config.create_temp_indexes,
        };
        ValidationOrchestrator::new(self.db, cancel, self.reporter, options).run(&ctx)
    }

    /// Strategy and transfer in one transaction; any error rolls both back.
    fn write(&self, session: &Session, plan: &Plan<'_>) -> Result<(u64, TransferOutcome)> {
        let tx = session.begin()?;
        let engine = TransferEngine::new(tx.session(), self.reporter);
        let options = ConversionOptions {
            date_policy: plan.date_policy,
            vocabulary: plan.settings.boolean_values.as_ref(),
            deduplicate: plan.settings.deduplicate,
        };
        let deleted = engine.apply_strategy(
            plan.settings.update_strategy,
            &plan.table,
            &plan.staging,
            &plan.settings.columns,
            &plan.settings.upsert_keys,
            &options,
        )?;
        let outcome =
            engine.transfer(&plan.staging, &plan.table, &plan.settings.columns, &options)?;
        tx.commit()?;
        Ok((deleted, outcome))
    }
}
