//! Process-level run lifecycle
//!
//! Connect (with retry) → migrate → run → close. The pool is closed on every
//! path, including failures.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use enroll_common::EtlError;
use tracing::info;

use crate::config::EtlConfig;
use crate::datasets::{Dataset, DatasetName, SourceKind};
use crate::db::{health_check, Database, DbError};
use crate::extract::{
    CsvSource, HttpSheetClient, JsonSource, RowCache, RowSource, SheetRange, SheetSource,
};
use crate::load::PgLoader;
use crate::pipeline::{Pipeline, PipelineError, RunSummary};
use crate::quality::{PgAuditStore, QualityAuditor, QualityReport, RowCountRule};

/// Build the row source a dataset reads from
pub fn build_source(
    config: &EtlConfig,
    dataset: &Dataset,
    file: Option<&Path>,
) -> Result<Box<dyn RowSource>, PipelineError> {
    let mapping = dataset.mapping.clone();

    let source: Box<dyn RowSource> = match dataset.source {
        SourceKind::Sheet => {
            let spreadsheet_id = config.sheets.spreadsheet_id.clone().ok_or_else(|| {
                EtlError::config(format!(
                    "SHEETS_SPREADSHEET_ID must be set for the {} dataset",
                    dataset.name
                ))
            })?;

            let client = HttpSheetClient::new(
                &config.sheets.api_base,
                &spreadsheet_id,
                config.sheets.access_token.clone(),
                config.sheets.timeout(),
                config.retry.clone(),
            )?;
            let range = SheetRange::parse(&config.sheets.range)?;

            let mut source = SheetSource::new(Arc::new(client), spreadsheet_id, range, mapping)
                .with_feedback(config.sheets.feedback());
            if config.pipeline.cache_enabled {
                let ttl = Duration::from_secs(config.pipeline.cache_ttl_secs);
                source = source.with_cache(Arc::new(RowCache::new(ttl)));
            }
            Box::new(source)
        },
        SourceKind::Csv => Box::new(CsvSource::new(require_file(dataset, file)?, mapping)),
        SourceKind::Json => Box::new(JsonSource::new(require_file(dataset, file)?, mapping)),
    };

    Ok(source)
}

fn require_file<'p>(dataset: &Dataset, file: Option<&'p Path>) -> Result<&'p Path, EtlError> {
    file.ok_or_else(|| {
        EtlError::config(format!("the {} dataset needs an input file", dataset.name))
    })
}

async fn open_database(config: &EtlConfig) -> Result<Database, PipelineError> {
    let db = Database::connect(&config.database, &config.retry).await?;
    let ready: Result<(), DbError> = async {
        health_check(db.pool()).await?;
        db.migrate().await
    }
    .await;

    if let Err(e) = ready {
        db.close().await;
        return Err(e.into());
    }
    Ok(db)
}

/// Extract, validate, load and audit one dataset
pub async fn run_dataset(
    config: &EtlConfig,
    name: DatasetName,
    file: Option<&Path>,
    row_count: Option<RowCountRule>,
) -> Result<RunSummary, PipelineError> {
    let dataset = Dataset::get(name);
    let source = build_source(config, &dataset, file)?;
    let quality = dataset.quality_with(row_count.or_else(|| config.quality.row_count()));

    let db = open_database(config).await?;

    let loader = PgLoader::new(db.pool().clone(), dataset.table.clone())
        .with_batch_size(config.pipeline.batch_size);
    let store = PgAuditStore::new(db.pool().clone());

    let result = Pipeline::new(name.as_str(), source.as_ref(), &dataset.rules, &loader)
        .with_audit(&store, &quality)
        .run()
        .await;

    db.close().await;
    result
}

/// Audit an already loaded dataset table
pub async fn run_audit(
    config: &EtlConfig,
    name: DatasetName,
    row_count: Option<RowCountRule>,
) -> Result<QualityReport, PipelineError> {
    let dataset = Dataset::get(name);
    let quality = dataset.quality_with(row_count.or_else(|| config.quality.row_count()));

    let db = open_database(config).await?;
    let store = PgAuditStore::new(db.pool().clone());

    info!(dataset = %name, table = %quality.table, "Running standalone audit");
    let report = QualityAuditor::new(&store).audit(&quality).await;

    db.close().await;
    Ok(report)
}
