//! Location tracking: the subject location index, its reconciliation from
//! storage change notifications, and line-level ownership of shared objects.

pub mod ingest;
pub mod location_index;
pub mod offsets;
pub mod reconciler;

pub use ingest::{IngestError, IngestSummary, Ingestor};
pub use location_index::{InMemoryLocationIndex, IndexError, LocationIndex, SqlLocationIndex};
pub use offsets::{LineOffsetRecord, OffsetStoreError, RowOffsetStore, SqlRowOffsetStore};
pub use reconciler::{
    EventKind, EventReconciler, NamingConvention, ReconcileOutcome, ReconcileSummary,
    StorageEvent, parse_notification,
};
