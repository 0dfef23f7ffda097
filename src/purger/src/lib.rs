//! Purge side of the pipeline: report generation for approval, shared
//! object redaction and execution of approved reports.

pub mod executor;
pub mod metrics;
pub mod redaction;
pub mod report;

pub use executor::PurgeExecutor;
pub use metrics::{MetricsSummary, PurgeMetrics};
pub use redaction::{RedactionEngine, RedactionError, RedactionOutcome};
pub use report::{PublishedReport, ReportError, ReportGenerator, parse_subject_list, render_text};
