//! In-process [`MarkerStore`].
//!
//! Transactions run under a single mutex: the body reads committed state,
//! its writes are staged on an overlay, and only a fully successful
//! overlay is merged back and fanned out to subscribers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use animal_watch_marker_models::{UserStats, WatchMarker};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    ChangeBatch, ChangeKind, CounterRef, Document, DocumentRef, MarkerChange, MarkerStore,
    RangeQuery, RangeSubscription, StoreError, SubscriptionHandle, TransactionBody,
    TransactionReader, Write,
};

#[derive(Debug, Default)]
struct Data {
    markers: BTreeMap<String, WatchMarker>,
    stats: BTreeMap<String, UserStats>,
    records: BTreeSet<DocumentRef>,
}

impl TransactionReader for Data {
    fn marker(&self, id: &str) -> Option<WatchMarker> {
        self.markers.get(id).cloned()
    }

    fn stats(&self, user_id: &str) -> Option<UserStats> {
        self.stats.get(user_id).copied()
    }

    fn exists(&self, doc: &DocumentRef) -> bool {
        match doc {
            DocumentRef::Marker(id) => self.markers.contains_key(id),
            DocumentRef::Stats(user_id) => self.stats.contains_key(user_id),
            DocumentRef::Appraisal { .. } | DocumentRef::Seen { .. } => self.records.contains(doc),
        }
    }
}

struct Subscriber {
    query: RangeQuery,
    handle: SubscriptionHandle,
    tx: mpsc::UnboundedSender<ChangeBatch>,
}

#[derive(Default)]
struct Inner {
    data: Data,
    subscribers: Vec<Subscriber>,
    fail_next: Option<StoreError>,
}

impl Inner {
    fn take_failure(&mut self) -> Result<(), StoreError> {
        self.fail_next.take().map_or(Ok(()), Err)
    }
}

/// Pending writes layered over committed data.
struct Staged<'a> {
    base: &'a Data,
    markers: BTreeMap<String, Option<WatchMarker>>,
    stats: BTreeMap<String, Option<UserStats>>,
    records: BTreeMap<DocumentRef, bool>,
}

impl<'a> Staged<'a> {
    fn new(base: &'a Data) -> Self {
        Self {
            base,
            markers: BTreeMap::new(),
            stats: BTreeMap::new(),
            records: BTreeMap::new(),
        }
    }

    fn marker(&self, id: &str) -> Option<WatchMarker> {
        self.markers
            .get(id)
            .cloned()
            .unwrap_or_else(|| self.base.marker(id))
    }

    fn stats(&self, user_id: &str) -> Option<UserStats> {
        self.stats
            .get(user_id)
            .copied()
            .unwrap_or_else(|| self.base.stats(user_id))
    }

    fn apply(&mut self, write: &Write) -> Result<(), StoreError> {
        match write {
            Write::Set(Document::Marker(marker)) => {
                self.markers.insert(marker.id.clone(), Some(marker.clone()));
            }
            Write::Set(Document::Stats { user_id, stats }) => {
                self.stats.insert(user_id.clone(), Some(*stats));
            }
            Write::Set(doc @ (Document::Appraisal { .. } | Document::Seen { .. })) => {
                self.records.insert(doc.reference(), true);
            }
            Write::Update { marker_id, patch } => {
                let mut marker = self
                    .marker(marker_id)
                    .ok_or_else(|| StoreError::NotFound(DocumentRef::Marker(marker_id.clone())))?;
                patch.apply(&mut marker);
                self.markers.insert(marker_id.clone(), Some(marker));
            }
            Write::Delete(DocumentRef::Marker(id)) => {
                self.markers.insert(id.clone(), None);
            }
            Write::Delete(DocumentRef::Stats(user_id)) => {
                self.stats.insert(user_id.clone(), None);
            }
            Write::Delete(doc) => {
                self.records.insert(doc.clone(), false);
            }
            Write::Increment { target, delta } => self.increment(target, *delta)?,
        }
        Ok(())
    }

    fn increment(&mut self, target: &CounterRef, delta: i64) -> Result<(), StoreError> {
        match target {
            CounterRef::Marker { id, counter } => {
                let mut marker = self
                    .marker(id)
                    .ok_or_else(|| StoreError::NotFound(target.document()))?;
                add(marker.counter_mut(*counter), delta, target)?;
                self.markers.insert(id.clone(), Some(marker));
            }
            CounterRef::Stats { user_id, counter } => {
                let mut stats = self.stats(user_id).unwrap_or_default();
                add(stats.counter_mut(*counter), delta, target)?;
                self.stats.insert(user_id.clone(), Some(stats));
            }
        }
        Ok(())
    }
}

fn add(value: &mut u32, delta: i64, target: &CounterRef) -> Result<(), StoreError> {
    let next = i64::from(*value) + delta;
    if next < 0 {
        return Err(StoreError::CounterUnderflow {
            doc: target.document(),
            field: target.field(),
        });
    }
    *value = u32::try_from(next).map_err(|_| StoreError::Aborted {
        message: format!("counter {} on {} overflowed", target.field(), target.document()),
    })?;
    Ok(())
}

/// In-memory marker store with transactional writes and live subscriptions.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next query, subscription or transaction fail with `error`.
    pub fn fail_next(&self, error: StoreError) {
        self.lock().fail_next = Some(error);
    }

    /// Number of subscriptions that are still delivering.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        let mut inner = self.lock();
        inner
            .subscribers
            .retain(|s| !s.handle.is_cancelled() && !s.tx.is_closed());
        inner.subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn change_for(
    query: &RangeQuery,
    before: Option<&WatchMarker>,
    after: Option<&WatchMarker>,
) -> Option<MarkerChange> {
    let was_in = before.is_some_and(|m| query.matches(m));
    let is_in = after.is_some_and(|m| query.matches(m));
    let (kind, marker) = match (was_in, is_in) {
        (false, true) => (ChangeKind::Added, after?),
        (true, true) => (ChangeKind::Modified, after?),
        (true, false) => (ChangeKind::Removed, after.or(before)?),
        (false, false) => return None,
    };
    Some(MarkerChange {
        kind,
        marker: marker.clone(),
    })
}

#[async_trait]
impl MarkerStore for MemoryStore {
    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<WatchMarker>, StoreError> {
        let mut inner = self.lock();
        inner.take_failure()?;
        let mut markers: Vec<_> = inner
            .data
            .markers
            .values()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();
        markers.sort_by(|a, b| a.position_hash().cmp(b.position_hash()));
        Ok(markers)
    }

    async fn subscribe_range(&self, query: RangeQuery) -> Result<RangeSubscription, StoreError> {
        let mut inner = self.lock();
        inner.take_failure()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let initial: ChangeBatch = inner
            .data
            .markers
            .values()
            .filter(|m| query.matches(m))
            .map(|m| MarkerChange {
                kind: ChangeKind::Added,
                marker: m.clone(),
            })
            .collect();
        // The receiver is still held locally, so this cannot fail.
        let _ = tx.send(initial);

        let handle = SubscriptionHandle::new();
        log::debug!(
            "Subscribed to range [{}, {}]",
            query.range.start,
            query.range.end
        );
        inner.subscribers.push(Subscriber {
            query,
            handle: handle.clone(),
            tx,
        });

        Ok(RangeSubscription {
            handle,
            changes: rx,
        })
    }

    async fn run_transaction(&self, body: TransactionBody) -> Result<Vec<Write>, StoreError> {
        let mut inner = self.lock();
        inner.take_failure()?;

        let writes = body(&inner.data)?;

        let mut staged = Staged::new(&inner.data);
        for write in &writes {
            if let Err(e) = staged.apply(write) {
                log::warn!("Transaction aborted: {e}");
                return Err(e);
            }
        }
        let Staged {
            markers,
            stats,
            records,
            ..
        } = staged;

        let mut touched = Vec::with_capacity(markers.len());
        for (id, after) in markers {
            let before = match &after {
                Some(marker) => inner.data.markers.insert(id, marker.clone()),
                None => inner.data.markers.remove(&id),
            };
            touched.push((before, after));
        }
        for (user_id, after) in stats {
            match after {
                Some(stats) => inner.data.stats.insert(user_id, stats),
                None => inner.data.stats.remove(&user_id),
            };
        }
        for (doc, present) in records {
            if present {
                inner.data.records.insert(doc);
            } else {
                inner.data.records.remove(&doc);
            }
        }

        inner.subscribers.retain(|subscriber| {
            if subscriber.handle.is_cancelled() {
                return false;
            }
            let batch: ChangeBatch = touched
                .iter()
                .filter_map(|(before, after)| {
                    change_for(&subscriber.query, before.as_ref(), after.as_ref())
                })
                .collect();
            batch.is_empty() || subscriber.tx.send(batch).is_ok()
        });

        log::trace!("Committed {} writes", writes.len());
        Ok(writes)
    }

    async fn get_marker(&self, id: &str) -> Result<Option<WatchMarker>, StoreError> {
        Ok(self.lock().data.marker(id))
    }

    async fn get_stats(&self, user_id: &str) -> Result<Option<UserStats>, StoreError> {
        Ok(self.lock().data.stats(user_id))
    }

    async fn top_stats(&self, limit: usize) -> Result<Vec<(String, UserStats)>, StoreError> {
        let inner = self.lock();
        let mut all: Vec<_> = inner
            .data
            .stats
            .iter()
            .map(|(user_id, stats)| (user_id.clone(), *stats))
            .collect();
        all.sort_by(|(a_id, a), (b_id, b)| b.total.cmp(&a.total).then_with(|| a_id.cmp(b_id)));
        all.truncate(limit);
        Ok(all)
    }
}
