//! The live view state machine.
//!
//! `Idle` until the first position arrives, `Subscribing` while a
//! generation of range subscriptions is being opened, `Live` once a batch
//! has been reconciled, and `Stopped` after [`LiveView::stop`].
//!
//! Two counters guard against stale results. `requested` is bumped by every
//! re-subscription attempt; the installed epoch (owned by the
//! [`SubscriptionManager`]) only changes when a generation is installed.
//! Forwarding tasks and refreshes compare their epoch under the state lock
//! before touching the marker map.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use animal_watch_geohash::{GeoHashRange, GeoPoint, bounding_ranges, distance_meters};
use animal_watch_marker_models::WatchMarker;
use animal_watch_store::{MarkerChange, MarkerStore, RangeQuery, RangeSubscription};
use futures::future::join_all;
use strum_macros::{AsRefStr, Display};
use tokio::sync::watch;

use crate::area::{markers_in_area, sort_by_distance};
use crate::subscriptions::{ActiveSubscription, SubscriptionManager};
use crate::{LiveViewConfig, LiveViewError, reconcile};

/// Lifecycle of a live view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum ViewStatus {
    /// No position yet.
    Idle,
    /// Range subscriptions are being (re)established.
    Subscribing,
    /// At least one batch of the current generation was applied.
    Live,
    /// Torn down.
    Stopped,
}

/// Published state of a live view.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSnapshot {
    /// Installed subscription epoch.
    pub epoch: u64,
    /// Current status.
    pub status: ViewStatus,
    /// Observer position the markers were selected around.
    pub center: Option<GeoPoint>,
    /// Search radius in meters.
    pub radius_meters: f64,
    /// Reconciled markers, nearest first.
    pub markers: Vec<WatchMarker>,
}

struct ViewState {
    status: ViewStatus,
    center: Option<GeoPoint>,
    radius_meters: f64,
    markers: BTreeMap<String, WatchMarker>,
    requested: u64,
    subscriptions: SubscriptionManager,
}

impl ViewState {
    fn snapshot(&self) -> LiveSnapshot {
        let markers: Vec<_> = self.markers.values().cloned().collect();
        LiveSnapshot {
            epoch: self.subscriptions.epoch(),
            status: self.status,
            center: self.center,
            radius_meters: self.radius_meters,
            markers: match self.center {
                Some(center) => sort_by_distance(center, markers),
                None => markers,
            },
        }
    }
}

struct Shared {
    state: Mutex<ViewState>,
    snapshots: watch::Sender<LiveSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &ViewState) {
        self.snapshots.send_replace(state.snapshot());
    }

    /// Reconciles a batch delivered for `epoch`. Returns `false` once the
    /// epoch is no longer installed.
    fn apply(&self, epoch: u64, batch: &[MarkerChange]) -> bool {
        let mut state = self.lock();
        if state.status == ViewStatus::Stopped || state.subscriptions.epoch() != epoch {
            log::debug!(
                "Discarding {} change(s) from stale epoch {epoch}",
                batch.len()
            );
            return false;
        }
        let Some(center) = state.center else {
            return false;
        };
        let radius = state.radius_meters;
        reconcile::apply_batch(&mut state.markers, center, radius, batch);
        state.status = ViewStatus::Live;
        self.publish(&state);
        true
    }
}

/// The reconciled set of markers around one observer.
pub struct LiveView {
    store: Arc<dyn MarkerStore>,
    config: LiveViewConfig,
    shared: Arc<Shared>,
}

impl LiveView {
    /// Creates an idle view over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`LiveViewError::RadiusOutOfRange`] if the configured radius
    /// is outside the configured bounds.
    pub fn new(store: Arc<dyn MarkerStore>, config: LiveViewConfig) -> Result<Self, LiveViewError> {
        let radius_meters = config.check_radius(config.radius_meters)?;
        let state = ViewState {
            status: ViewStatus::Idle,
            center: None,
            radius_meters,
            markers: BTreeMap::new(),
            requested: 0,
            subscriptions: SubscriptionManager::default(),
        };
        let (snapshots, _) = watch::channel(state.snapshot());
        Ok(Self {
            store,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                snapshots,
            }),
        })
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &LiveViewConfig {
        &self.config
    }

    /// Latest published state.
    #[must_use]
    pub fn snapshot(&self) -> LiveSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    /// Receiver notified after every change to the published state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LiveSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ViewStatus {
        self.shared.lock().status
    }

    /// Number of open range subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.shared.lock().subscriptions.len()
    }

    /// Hash ranges currently subscribed.
    #[must_use]
    pub fn ranges(&self) -> Vec<GeoHashRange> {
        self.shared.lock().subscriptions.ranges()
    }

    /// Feeds a new observer position.
    ///
    /// Returns `false` if the position is closer than the movement
    /// threshold to the current center and was ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LiveViewError::Stopped`] after [`Self::stop`],
    /// [`LiveViewError::InvalidCoordinate`] for an invalid position, and
    /// the errors of a failed re-subscription (the previous live set stays
    /// in place).
    pub async fn update_location(&self, position: GeoPoint) -> Result<bool, LiveViewError> {
        position.validate()?;
        let radius = {
            let state = self.shared.lock();
            if state.status == ViewStatus::Stopped {
                return Err(LiveViewError::Stopped);
            }
            if let Some(center) = state.center {
                let moved = distance_meters(center, position);
                if moved < self.config.movement_threshold_meters {
                    log::trace!("Ignoring move of {moved:.1} m");
                    return Ok(false);
                }
            }
            state.radius_meters
        };
        self.resubscribe(position, radius).await?;
        Ok(true)
    }

    /// Changes the search radius, re-subscribing if a center is known.
    ///
    /// # Errors
    ///
    /// Returns [`LiveViewError::RadiusOutOfRange`] for a radius outside the
    /// configured bounds, [`LiveViewError::Stopped`] after [`Self::stop`],
    /// and the errors of a failed re-subscription.
    pub async fn set_radius(&self, radius_meters: f64) -> Result<(), LiveViewError> {
        let radius_meters = self.config.check_radius(radius_meters)?;
        let center = {
            let mut state = self.shared.lock();
            if state.status == ViewStatus::Stopped {
                return Err(LiveViewError::Stopped);
            }
            let Some(center) = state.center else {
                state.radius_meters = radius_meters;
                self.shared.publish(&state);
                return Ok(());
            };
            center
        };
        self.resubscribe(center, radius_meters).await
    }

    /// Re-queries every range around the current center and replaces the
    /// live set wholesale. Subscriptions stay as they are.
    ///
    /// # Errors
    ///
    /// Returns [`LiveViewError::LocationUnavailable`] before the first
    /// position, [`LiveViewError::Store`] if a query fails (the live set is
    /// kept), and [`LiveViewError::StaleResultDiscarded`] if the view moved
    /// while the query was in flight.
    pub async fn refresh(&self) -> Result<Vec<WatchMarker>, LiveViewError> {
        let (center, radius, epoch, requested) = {
            let state = self.shared.lock();
            if state.status == ViewStatus::Stopped {
                return Err(LiveViewError::Stopped);
            }
            let center = state
                .center
                .ok_or_else(|| LiveViewError::LocationUnavailable {
                    message: "no position fix yet".to_string(),
                })?;
            (
                center,
                state.radius_meters,
                state.subscriptions.epoch(),
                state.requested,
            )
        };

        let markers = markers_in_area(self.store.as_ref(), center, radius).await?;

        let mut state = self.shared.lock();
        if state.status == ViewStatus::Stopped
            || state.subscriptions.epoch() != epoch
            || state.requested != requested
        {
            log::debug!("Discarding refresh result of epoch {epoch}");
            return Err(LiveViewError::StaleResultDiscarded { epoch });
        }
        state.markers = markers
            .iter()
            .map(|marker| (marker.id.clone(), marker.clone()))
            .collect();
        state.status = ViewStatus::Live;
        self.shared.publish(&state);
        log::debug!("Refreshed live view: {} marker(s)", markers.len());
        Ok(markers)
    }

    /// Cancels all subscriptions. Later updates fail with
    /// [`LiveViewError::Stopped`].
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        if state.status == ViewStatus::Stopped {
            return;
        }
        state.requested += 1;
        let epoch = state.requested;
        state.subscriptions.replace(epoch, Vec::new());
        state.status = ViewStatus::Stopped;
        self.shared.publish(&state);
        log::info!("Live view stopped at epoch {epoch}");
    }

    async fn resubscribe(&self, center: GeoPoint, radius: f64) -> Result<(), LiveViewError> {
        let ranges = bounding_ranges(center, radius)?;

        let (epoch, previous_status) = {
            let mut state = self.shared.lock();
            if state.status == ViewStatus::Stopped {
                return Err(LiveViewError::Stopped);
            }
            state.requested += 1;
            let previous_status = state.status;
            state.status = ViewStatus::Subscribing;
            self.shared.publish(&state);
            (state.requested, previous_status)
        };
        log::debug!(
            "Subscribing to {} range(s) around ({}, {}) within {radius} m, epoch {epoch}",
            ranges.len(),
            center.latitude,
            center.longitude,
        );

        let results = join_all(ranges.into_iter().map(|range| async move {
            self.store
                .subscribe_range(RangeQuery::discoverable(range.clone()))
                .await
                .map(|subscription| (range, subscription))
        }))
        .await;

        let mut opened = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(pair) => opened.push(pair),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        let mut state = self.shared.lock();

        if let Some(e) = failure {
            for (_, subscription) in &opened {
                subscription.handle.cancel();
            }
            if state.requested == epoch && state.status == ViewStatus::Subscribing {
                state.status = previous_status;
                self.shared.publish(&state);
            }
            log::warn!("Subscription for epoch {epoch} failed: {e}");
            return Err(e.into());
        }

        if state.requested != epoch || state.status == ViewStatus::Stopped {
            for (_, subscription) in &opened {
                subscription.handle.cancel();
            }
            log::debug!("Discarding subscriptions of stale epoch {epoch}");
            return Err(LiveViewError::StaleResultDiscarded { epoch });
        }

        state.center = Some(center);
        state.radius_meters = radius;
        reconcile::retain_within(&mut state.markers, center, radius);
        let active = opened
            .into_iter()
            .map(|(range, subscription)| self.spawn_forwarder(epoch, range, subscription))
            .collect();
        state.subscriptions.replace(epoch, active);
        self.shared.publish(&state);
        Ok(())
    }

    fn spawn_forwarder(
        &self,
        epoch: u64,
        range: GeoHashRange,
        subscription: RangeSubscription,
    ) -> ActiveSubscription {
        let RangeSubscription {
            handle,
            mut changes,
        } = subscription;
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            while let Some(batch) = changes.recv().await {
                if !shared.apply(epoch, &batch) {
                    break;
                }
            }
        });
        ActiveSubscription {
            range,
            handle,
            task,
        }
    }
}

impl Drop for LiveView {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use animal_watch_marker_models::{MarkerPatch, MarkerSeverity, MarkerState};
    use animal_watch_store::{ChangeKind, Document, MemoryStore, StoreError, Write};
    use chrono::Utc;

    use super::*;

    fn point(latitude: f64, longitude: f64) -> GeoPoint {
        GeoPoint::new(latitude, longitude).unwrap()
    }

    fn marker(id: &str, position: GeoPoint) -> WatchMarker {
        let mut m = WatchMarker::new(id, "owner", "Owner", position, Utc::now()).unwrap();
        m.severity = MarkerSeverity::Danger;
        m.tags = vec!["Dog".to_string()];
        m
    }

    async fn store_with(markers: Vec<WatchMarker>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .commit(
                markers
                    .into_iter()
                    .map(|m| Write::Set(Document::Marker(m)))
                    .collect(),
            )
            .await
            .unwrap();
        store
    }

    fn view(store: &Arc<MemoryStore>, radius: f64) -> LiveView {
        let config = LiveViewConfig {
            radius_meters: radius,
            ..LiveViewConfig::default()
        };
        LiveView::new(Arc::clone(store) as Arc<dyn MarkerStore>, config).unwrap()
    }

    async fn wait_until(
        view: &LiveView,
        mut predicate: impl FnMut(&LiveSnapshot) -> bool,
    ) -> LiveSnapshot {
        let mut rx = view.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s)))
            .await
            .expect("timed out waiting for live view")
            .expect("live view dropped");
        LiveSnapshot::clone(&snapshot)
    }

    fn ids(snapshot: &LiveSnapshot) -> Vec<&str> {
        snapshot.markers.iter().map(|m| m.id.as_str()).collect()
    }

    #[tokio::test]
    async fn follows_observer_away_and_back() {
        let home = point(44.0, 20.0);
        let store = store_with(vec![marker("A", home)]).await;
        let view = view(&store, 500.0);
        assert_eq!(view.status(), ViewStatus::Idle);

        assert!(view.update_location(home).await.unwrap());
        let snapshot = wait_until(&view, |s| s.status == ViewStatus::Live).await;
        assert_eq!(ids(&snapshot), ["A"]);
        let first_epoch = snapshot.epoch;

        assert!(view.update_location(point(44.09, 20.0)).await.unwrap());
        let away = wait_until(&view, |s| {
            s.epoch > first_epoch && s.status == ViewStatus::Live
        })
        .await;
        assert!(away.markers.is_empty());

        assert!(view.update_location(home).await.unwrap());
        let back = wait_until(&view, |s| {
            s.epoch > away.epoch && s.status == ViewStatus::Live
        })
        .await;
        assert_eq!(ids(&back), ["A"]);
    }

    #[tokio::test]
    async fn small_moves_are_coalesced() {
        let home = point(44.0, 20.0);
        let store = store_with(Vec::new()).await;
        let view = view(&store, 500.0);

        view.update_location(home).await.unwrap();
        let epoch = wait_until(&view, |s| s.status == ViewStatus::Live).await.epoch;
        let subscriptions = store.active_subscriptions();

        assert!(!view.update_location(point(44.0005, 20.0)).await.unwrap());
        assert_eq!(view.snapshot().epoch, epoch);
        assert_eq!(store.active_subscriptions(), subscriptions);
        assert_eq!(view.subscription_count(), subscriptions);
    }

    #[tokio::test]
    async fn streams_store_changes_into_the_live_set() {
        let home = point(44.0, 20.0);
        let store = store_with(vec![marker("A", home)]).await;
        let view = view(&store, 500.0);
        view.update_location(home).await.unwrap();
        wait_until(&view, |s| s.status == ViewStatus::Live).await;

        store
            .commit(vec![Write::Set(Document::Marker(marker(
                "B",
                point(44.001, 20.0),
            )))])
            .await
            .unwrap();
        let snapshot = wait_until(&view, |s| s.markers.len() == 2).await;
        assert_eq!(ids(&snapshot), ["A", "B"]);

        store
            .commit(vec![Write::Update {
                marker_id: "A".into(),
                patch: MarkerPatch {
                    state: Some(MarkerState::Removed),
                    ..MarkerPatch::default()
                },
            }])
            .await
            .unwrap();
        let snapshot = wait_until(&view, |s| s.markers.len() == 1).await;
        assert_eq!(ids(&snapshot), ["B"]);
    }

    #[tokio::test]
    async fn stale_epoch_batches_are_discarded() {
        let home = point(44.0, 20.0);
        let store = store_with(vec![marker("A", home)]).await;
        let view = view(&store, 500.0);
        view.update_location(home).await.unwrap();
        let live = wait_until(&view, |s| s.status == ViewStatus::Live).await;

        let stale = vec![MarkerChange {
            kind: ChangeKind::Added,
            marker: marker("ghost", home),
        }];
        assert!(!view.shared.apply(live.epoch - 1, &stale));
        assert_eq!(ids(&view.snapshot()), ["A"]);

        assert!(view.shared.apply(live.epoch, &stale));
        assert_eq!(view.snapshot().markers.len(), 2);
    }

    #[tokio::test]
    async fn failed_resubscription_keeps_previous_live_set() {
        let home = point(44.0, 20.0);
        let store = store_with(vec![marker("A", home)]).await;
        let view = view(&store, 500.0);
        view.update_location(home).await.unwrap();
        let live = wait_until(&view, |s| s.status == ViewStatus::Live).await;

        store.fail_next(StoreError::Unavailable {
            message: "offline".into(),
        });
        let result = view.update_location(point(44.09, 20.0)).await;
        assert!(matches!(result, Err(LiveViewError::Store(_))));

        let after = view.snapshot();
        assert_eq!(after.status, ViewStatus::Live);
        assert_eq!(after.epoch, live.epoch);
        assert_eq!(after.center, Some(home));
        assert_eq!(ids(&after), ["A"]);

        store
            .commit(vec![Write::Set(Document::Marker(marker(
                "B",
                point(44.001, 20.0),
            )))])
            .await
            .unwrap();
        wait_until(&view, |s| s.markers.len() == 2).await;
    }

    #[tokio::test]
    async fn refresh_replaces_live_set_and_keeps_it_on_error() {
        let home = point(44.0, 20.0);
        let store = store_with(vec![marker("A", home)]).await;
        let view = view(&store, 500.0);

        assert!(matches!(
            view.refresh().await,
            Err(LiveViewError::LocationUnavailable { .. })
        ));

        view.update_location(home).await.unwrap();
        wait_until(&view, |s| s.status == ViewStatus::Live).await;

        let refreshed = view.refresh().await.unwrap();
        assert_eq!(refreshed.len(), 1);

        store.fail_next(StoreError::Unavailable {
            message: "offline".into(),
        });
        assert!(view.refresh().await.is_err());
        assert_eq!(ids(&view.snapshot()), ["A"]);
    }

    #[tokio::test]
    async fn radius_changes_are_bounded_and_resubscribe() {
        let home = point(44.0, 20.0);
        let store = store_with(vec![marker("far", point(44.008, 20.0))]).await;
        let view = view(&store, 500.0);
        view.update_location(home).await.unwrap();
        let live = wait_until(&view, |s| s.status == ViewStatus::Live).await;
        assert!(live.markers.is_empty());

        assert!(matches!(
            view.set_radius(50.0).await,
            Err(LiveViewError::RadiusOutOfRange { .. })
        ));

        view.set_radius(1000.0).await.unwrap();
        let wider = wait_until(&view, |s| {
            s.epoch > live.epoch && s.status == ViewStatus::Live
        })
        .await;
        assert!((wider.radius_meters - 1000.0).abs() < f64::EPSILON);
        assert_eq!(ids(&wider), ["far"]);
    }

    #[tokio::test]
    async fn stop_cancels_subscriptions_and_rejects_updates() {
        let home = point(44.0, 20.0);
        let store = store_with(Vec::new()).await;
        let view = view(&store, 500.0);
        view.update_location(home).await.unwrap();
        wait_until(&view, |s| s.status == ViewStatus::Live).await;
        assert!(store.active_subscriptions() > 0);

        view.stop();
        assert_eq!(view.status(), ViewStatus::Stopped);
        assert_eq!(view.subscription_count(), 0);
        assert_eq!(store.active_subscriptions(), 0);
        assert_eq!(
            view.update_location(point(45.0, 20.0)).await,
            Err(LiveViewError::Stopped)
        );
    }

    #[tokio::test]
    async fn rejects_invalid_positions() {
        let store = store_with(Vec::new()).await;
        let view = view(&store, 500.0);
        let result = view
            .update_location(GeoPoint {
                latitude: 95.0,
                longitude: 0.0,
            })
            .await;
        assert!(matches!(result, Err(LiveViewError::InvalidCoordinate(_))));
        assert_eq!(view.status(), ViewStatus::Idle);
    }
}
