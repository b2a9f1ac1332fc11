//! Harvest pipeline.
//!
//! - Reconcile: one candidate against the catalog (create / update / skip)
//! - Run: one audited pass over one source
//! - Dispatch: retries, batch runs of eligible sources, run retention
//! - Ingest: operator uploads through the reconcile path

pub mod dispatch;
pub mod ingest;
pub mod reconcile;
pub mod run;

pub use dispatch::{BatchSummary, Dispatcher, PurgeSummary, RunSummary};
pub use ingest::Upload;
pub use reconcile::{Decision, Reconciler};
pub use run::RunController;
