//! Enroll ETL Library
//!
//! Moves tabular records from a spreadsheet, CSV or JSON source into
//! Postgres, then audits the loaded table.
//!
//! - **validation**: pure per-field sanitizers and row validators
//! - **extract**: source adapters producing [`extract::RawRow`]s
//! - **transform**: pending-row selection and accept/reject split
//! - **load**: single-transaction, chunked, conflict-tolerant inserts
//! - **quality**: row count, duplicate, null and range/format audits
//! - **pipeline**: the run state machine tying the stages together
//! - **runner**: pool lifecycle around one run
//!
//! # Example
//!
//! ```no_run
//! use enroll_etl::{config::EtlConfig, datasets::DatasetName, runner};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EtlConfig::load()?;
//! let summary = runner::run_dataset(&config, DatasetName::Students, None, None).await?;
//! println!("inserted {} rows", summary.rows_inserted);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod datasets;
pub mod db;
pub mod extract;
pub mod load;
pub mod pipeline;
pub mod quality;
pub mod retry;
pub mod runner;
pub mod transform;
pub mod validation;

pub use config::EtlConfig;
pub use datasets::{Dataset, DatasetName};
pub use pipeline::{Pipeline, PipelineError, RunState, RunSummary};
pub use validation::{validate_row, Validation};
