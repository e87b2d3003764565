#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Marker store contract.
//!
//! The document database behind the marker feed is consumed through the
//! [`MarkerStore`] trait: geohash range queries, change-stream
//! subscriptions over a range, and all-or-nothing transactions made of
//! [`Write`] operations. [`MemoryStore`] is an in-process implementation
//! used by the CLI and by tests.

pub mod backoff;
pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use animal_watch_geohash::GeoHashRange;
use animal_watch_marker_models::{
    MarkerCounter, MarkerPatch, MarkerState, MarkerVisibility, StatsCounter, UserStats,
    WatchMarker,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use memory::MemoryStore;

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A write referenced a document that does not exist.
    #[error("Document not found: {0}")]
    NotFound(DocumentRef),

    /// An increment would have taken a counter below zero.
    #[error("Counter {field} on {doc} would drop below zero")]
    CounterUnderflow {
        /// Document holding the counter.
        doc: DocumentRef,
        /// Counter name.
        field: String,
    },

    /// The transaction was rejected and nothing was written.
    #[error("Transaction aborted: {message}")]
    Aborted {
        /// Why the transaction was rejected.
        message: String,
    },

    /// The store could not be reached.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Underlying failure.
        message: String,
    },

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Aborted { .. })
    }
}

/// Address of a document in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentRef {
    /// A watch marker, by id.
    Marker(String),
    /// A user's statistics, by user id.
    Stats(String),
    /// One user's appraisal of a marker.
    Appraisal {
        /// Appraised marker.
        marker_id: String,
        /// Appraising user.
        user_id: String,
    },
    /// One user's "seen" record on a marker.
    Seen {
        /// Seen marker.
        marker_id: String,
        /// User who saw it.
        user_id: String,
    },
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Marker(id) => write!(f, "markers/{id}"),
            Self::Stats(user_id) => write!(f, "userStats/{user_id}"),
            Self::Appraisal { marker_id, user_id } => {
                write!(f, "markers/{marker_id}/appraisals/{user_id}")
            }
            Self::Seen { marker_id, user_id } => write!(f, "markers/{marker_id}/seen/{user_id}"),
        }
    }
}

/// Full document contents for a [`Write::Set`].
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// A watch marker.
    Marker(WatchMarker),
    /// A user's statistics.
    Stats {
        /// Owner of the statistics.
        user_id: String,
        /// Counter values.
        stats: UserStats,
    },
    /// An appraisal record.
    Appraisal {
        /// Appraised marker.
        marker_id: String,
        /// Appraising user.
        user_id: String,
    },
    /// A "seen" record.
    Seen {
        /// Seen marker.
        marker_id: String,
        /// User who saw it.
        user_id: String,
    },
}

impl Document {
    /// Where this document lives.
    #[must_use]
    pub fn reference(&self) -> DocumentRef {
        match self {
            Self::Marker(marker) => DocumentRef::Marker(marker.id.clone()),
            Self::Stats { user_id, .. } => DocumentRef::Stats(user_id.clone()),
            Self::Appraisal { marker_id, user_id } => DocumentRef::Appraisal {
                marker_id: marker_id.clone(),
                user_id: user_id.clone(),
            },
            Self::Seen { marker_id, user_id } => DocumentRef::Seen {
                marker_id: marker_id.clone(),
                user_id: user_id.clone(),
            },
        }
    }
}

/// A numeric field addressed by an increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterRef {
    /// A counter on a marker document.
    Marker {
        /// Marker id.
        id: String,
        /// Which counter.
        counter: MarkerCounter,
    },
    /// A counter on a user's statistics document.
    Stats {
        /// User id.
        user_id: String,
        /// Which counter.
        counter: StatsCounter,
    },
}

impl CounterRef {
    /// Document holding the counter.
    #[must_use]
    pub fn document(&self) -> DocumentRef {
        match self {
            Self::Marker { id, .. } => DocumentRef::Marker(id.clone()),
            Self::Stats { user_id, .. } => DocumentRef::Stats(user_id.clone()),
        }
    }

    /// Field name of the counter.
    #[must_use]
    pub fn field(&self) -> String {
        match self {
            Self::Marker { counter, .. } => counter.to_string(),
            Self::Stats { counter, .. } => counter.to_string(),
        }
    }
}

/// One operation inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Creates or replaces a document.
    Set(Document),
    /// Applies a partial update to an existing marker.
    Update {
        /// Marker id.
        marker_id: String,
        /// Fields to change.
        patch: MarkerPatch,
    },
    /// Deletes a document. Deleting a missing document is a no-op.
    Delete(DocumentRef),
    /// Adds `delta` to a counter.
    Increment {
        /// Counter to change.
        target: CounterRef,
        /// Signed amount.
        delta: i64,
    },
}

impl Write {
    /// Increment of one of a user's statistics counters.
    #[must_use]
    pub fn increment_stats(user_id: impl Into<String>, counter: StatsCounter, delta: i64) -> Self {
        Self::Increment {
            target: CounterRef::Stats {
                user_id: user_id.into(),
                counter,
            },
            delta,
        }
    }

    /// Increment of one of a marker's counters.
    #[must_use]
    pub fn increment_marker(id: impl Into<String>, counter: MarkerCounter, delta: i64) -> Self {
        Self::Increment {
            target: CounterRef::Marker {
                id: id.into(),
                counter,
            },
            delta,
        }
    }
}

/// Read access to committed state from inside a transaction body.
pub trait TransactionReader {
    /// Reads a marker.
    fn marker(&self, id: &str) -> Option<WatchMarker>;

    /// Reads a user's statistics.
    fn stats(&self, user_id: &str) -> Option<UserStats>;

    /// Whether a document exists.
    fn exists(&self, doc: &DocumentRef) -> bool;
}

/// Transaction body: reads current state and returns the writes to apply.
///
/// Returning an error aborts the transaction without writing anything.
pub type TransactionBody =
    Box<dyn FnOnce(&dyn TransactionReader) -> Result<Vec<Write>, StoreError> + Send>;

/// Selects markers within a hash range, optionally by state and visibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    /// Position hash interval.
    pub range: GeoHashRange,
    /// Required state, if any.
    pub state: Option<MarkerState>,
    /// Required visibility, if any.
    pub visibility: Option<MarkerVisibility>,
}

impl RangeQuery {
    /// Active public markers in `range`.
    #[must_use]
    pub const fn discoverable(range: GeoHashRange) -> Self {
        Self {
            range,
            state: Some(MarkerState::Active),
            visibility: Some(MarkerVisibility::Public),
        }
    }

    /// Whether `marker` belongs to the result set.
    #[must_use]
    pub fn matches(&self, marker: &WatchMarker) -> bool {
        self.range.contains(marker.position_hash())
            && self.state.is_none_or(|state| marker.state == state)
            && self
                .visibility
                .is_none_or(|visibility| marker.visibility == visibility)
    }
}

/// How a marker changed relative to a subscribed result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Entered the result set.
    Added,
    /// Changed while staying in the result set.
    Modified,
    /// Left the result set.
    Removed,
}

/// A single change record with the full marker payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerChange {
    /// Kind of change.
    pub kind: ChangeKind,
    /// Marker contents after the change, or the last contents if deleted.
    pub marker: WatchMarker,
}

/// Changes produced by one committed transaction.
pub type ChangeBatch = Vec<MarkerChange>;

/// Cancels a range subscription.
///
/// Cloning yields a handle to the same subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionHandle {
    cancelled: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    /// A fresh, live handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops delivery of further batches.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether [`Self::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A live change stream over a [`RangeQuery`].
///
/// The first batch lists the current result set as [`ChangeKind::Added`].
#[derive(Debug)]
pub struct RangeSubscription {
    /// Cancels the stream.
    pub handle: SubscriptionHandle,
    /// Change batches in commit order.
    pub changes: mpsc::UnboundedReceiver<ChangeBatch>,
}

/// The document database holding markers and user statistics.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// Returns every marker matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query cannot be served.
    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<WatchMarker>, StoreError>;

    /// Opens a change stream over `query`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the subscription cannot be established.
    async fn subscribe_range(&self, query: RangeQuery) -> Result<RangeSubscription, StoreError>;

    /// Runs `body` against current state and atomically applies the writes
    /// it returns. Returns the applied writes.
    ///
    /// # Errors
    ///
    /// Returns the body's error, or [`StoreError`] if any write fails. In
    /// both cases no write is applied.
    async fn run_transaction(&self, body: TransactionBody) -> Result<Vec<Write>, StoreError>;

    /// Atomically applies a fixed list of writes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any write fails; no write is applied.
    async fn commit(&self, writes: Vec<Write>) -> Result<Vec<Write>, StoreError> {
        self.run_transaction(Box::new(move |_: &dyn TransactionReader| Ok(writes)))
            .await
    }

    /// Reads a marker by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    async fn get_marker(&self, id: &str) -> Result<Option<WatchMarker>, StoreError>;

    /// Reads a user's statistics.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    async fn get_stats(&self, user_id: &str) -> Result<Option<UserStats>, StoreError>;

    /// Statistics documents ordered by `total` descending, ties by user id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    async fn top_stats(&self, limit: usize) -> Result<Vec<(String, UserStats)>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_refs_render_as_paths() {
        assert_eq!(DocumentRef::Marker("m1".into()).to_string(), "markers/m1");
        assert_eq!(
            DocumentRef::Appraisal {
                marker_id: "m1".into(),
                user_id: "u1".into()
            }
            .to_string(),
            "markers/m1/appraisals/u1"
        );
    }

    #[test]
    fn counter_fields_use_document_names() {
        let target = CounterRef::Stats {
            user_id: "u1".into(),
            counter: StatsCounter::MarkersCreated,
        };
        assert_eq!(target.field(), "markersCreatedCount");
        assert_eq!(target.document(), DocumentRef::Stats("u1".into()));
    }

    #[test]
    fn handle_clones_share_cancellation() {
        let handle = SubscriptionHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_cancelled());
        clone.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn transient_errors() {
        assert!(
            StoreError::Unavailable {
                message: "offline".into()
            }
            .is_transient()
        );
        assert!(!StoreError::Cancelled.is_transient());
        assert!(!StoreError::NotFound(DocumentRef::Marker("x".into())).is_transient());
    }
}
