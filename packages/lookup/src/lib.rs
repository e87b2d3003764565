#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Periodic lookup of watch markers near the user.
//!
//! The scheduler runs on its own task, independent of any live view. Each
//! tick fetches the current position, counts discoverable markers within
//! [`LookupConfig::proximity_meters`] and raises a
//! [`LookupEvent`](animal_watch_platform::LookupEvent) when any are found.
//! A failed location fetch raises `Degraded` instead of ending the loop.

use std::sync::Arc;
use std::time::Duration;

use animal_watch_live_view::{LiveViewError, count_in_area};
use animal_watch_platform::{LocationProvider, LookupEvent, NotificationSink};
use animal_watch_store::{MarkerStore, StoreError, backoff};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How often the scheduler ticks depends on whether the app is visible.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LookupMode {
    /// App not visible.
    #[default]
    Background,
    /// App visible but idle.
    Foreground,
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Seconds between ticks in [`LookupMode::Background`].
    pub background_interval_secs: u64,
    /// Seconds between ticks in [`LookupMode::Foreground`].
    pub foreground_interval_secs: u64,
    /// Radius around the user that counts as "nearby".
    pub proximity_meters: f64,
    /// Retries of a transiently failing store query per tick.
    pub max_retries: u32,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            background_interval_secs: 300,
            foreground_interval_secs: 120,
            proximity_meters: 200.0,
            max_retries: backoff::DEFAULT_MAX_RETRIES,
        }
    }
}

impl LookupConfig {
    /// Time between ticks in `mode`.
    #[must_use]
    pub const fn interval(&self, mode: LookupMode) -> Duration {
        match mode {
            LookupMode::Background => Duration::from_secs(self.background_interval_secs),
            LookupMode::Foreground => Duration::from_secs(self.foreground_interval_secs),
        }
    }
}

/// What one tick found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    /// `n > 0` markers nearby; a `Nearby` event was raised.
    Nearby(usize),
    /// Nothing nearby; no event.
    Empty,
    /// Position unknown; a `Degraded` event was raised.
    Degraded,
}

/// Runs a single lookup.
///
/// # Errors
///
/// Returns [`LiveViewError::Store`] once store retries are exhausted. No
/// event is raised in that case.
pub async fn lookup_once(
    store: &dyn MarkerStore,
    location: &dyn LocationProvider,
    sink: &dyn NotificationSink,
    config: &LookupConfig,
) -> Result<LookupOutcome, LiveViewError> {
    let position = match location.current_position().await {
        Ok(position) => position,
        Err(e) => {
            log::warn!("Lookup could not get a position: {e}");
            sink.notify(LookupEvent::Degraded);
            return Ok(LookupOutcome::Degraded);
        }
    };

    // Store failures are retried; anything else (bad position or radius) is
    // returned as is.
    let count = backoff::retry(config.max_retries, move || async move {
        match count_in_area(store, position, config.proximity_meters).await {
            Ok(count) => Ok(Ok(count)),
            Err(LiveViewError::Store(e)) => Err(e),
            Err(e) => Ok(Err(e)),
        }
    })
    .await
    .map_err(LiveViewError::Store)??;

    if count == 0 {
        log::debug!("Lookup found nothing nearby");
        return Ok(LookupOutcome::Empty);
    }
    log::debug!("Lookup found {count} marker(s) nearby");
    sink.notify(LookupEvent::Nearby { count });
    Ok(LookupOutcome::Nearby(count))
}

/// Background task running [`lookup_once`] on a mode-dependent timer.
pub struct LookupScheduler {
    mode: watch::Sender<LookupMode>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LookupScheduler {
    /// Starts the loop. The first lookup runs immediately.
    #[must_use]
    pub fn spawn(
        store: Arc<dyn MarkerStore>,
        location: Arc<dyn LocationProvider>,
        sink: Arc<dyn NotificationSink>,
        config: LookupConfig,
        mode: LookupMode,
    ) -> Self {
        let (mode_tx, mode_rx) = watch::channel(mode);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(
            store,
            location,
            sink,
            config,
            mode_rx,
            shutdown_rx,
        ));
        Self {
            mode: mode_tx,
            shutdown,
            task,
        }
    }

    /// Switches the tick interval. Takes effect from the current wait.
    pub fn set_mode(&self, mode: LookupMode) {
        self.mode.send_if_modified(|current| {
            let changed = *current != mode;
            *current = mode;
            changed
        });
    }

    /// Mode the scheduler is currently ticking in.
    #[must_use]
    pub fn mode(&self) -> LookupMode {
        *self.mode.borrow()
    }

    /// Whether the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop before its next lookup and waits for it to exit.
    ///
    /// A lookup already in flight is allowed to finish.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            log::warn!("Lookup scheduler task failed: {e}");
        }
    }
}

async fn run(
    store: Arc<dyn MarkerStore>,
    location: Arc<dyn LocationProvider>,
    sink: Arc<dyn NotificationSink>,
    config: LookupConfig,
    mut mode: watch::Receiver<LookupMode>,
    mut shutdown: watch::Receiver<bool>,
) {
    log::debug!("Lookup scheduler started in {} mode", *mode.borrow());
    loop {
        if *shutdown.borrow() {
            break;
        }

        match lookup_once(store.as_ref(), location.as_ref(), sink.as_ref(), &config).await {
            Ok(outcome) => log::trace!("Lookup tick: {outcome:?}"),
            Err(LiveViewError::Store(StoreError::Cancelled)) => break,
            Err(e) => log::warn!("Lookup failed: {e}"),
        }

        let mut wait = Box::pin(tokio::time::sleep(config.interval(*mode.borrow_and_update())));
        loop {
            tokio::select! {
                () = &mut wait => break,
                changed = mode.changed() => {
                    if changed.is_err() {
                        log::debug!("Lookup scheduler dropped");
                        return;
                    }
                    let next = *mode.borrow_and_update();
                    log::debug!("Lookup scheduler switched to {next} mode");
                    wait.as_mut().reset(tokio::time::Instant::now() + config.interval(next));
                }
                _ = shutdown.changed() => {
                    log::debug!("Lookup scheduler stopped");
                    return;
                }
            }
        }
    }
    log::debug!("Lookup scheduler stopped");
}

#[cfg(test)]
mod tests {
    use animal_watch_geohash::GeoPoint;
    use animal_watch_marker_models::WatchMarker;
    use animal_watch_platform::local::{ChannelNotificationSink, ManualLocation};
    use animal_watch_store::{Document, MemoryStore, Write};
    use chrono::Utc;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    use super::*;

    fn home() -> GeoPoint {
        GeoPoint::new(44.8125, 20.4612).unwrap()
    }

    async fn store_with(positions: &[GeoPoint]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let writes = positions
            .iter()
            .enumerate()
            .map(|(i, p)| {
                Write::Set(Document::Marker(
                    WatchMarker::new(format!("m{i}"), "ana", "Ana", *p, Utc::now()).unwrap(),
                ))
            })
            .collect();
        store.commit(writes).await.unwrap();
        store
    }

    fn spawn(
        store: Arc<MemoryStore>,
        location: Arc<ManualLocation>,
        mode: LookupMode,
    ) -> (LookupScheduler, mpsc::UnboundedReceiver<LookupEvent>) {
        let (sink, rx) = ChannelNotificationSink::new();
        let scheduler = LookupScheduler::spawn(
            store as Arc<dyn MarkerStore>,
            location as Arc<dyn LocationProvider>,
            Arc::new(sink),
            LookupConfig::default(),
            mode,
        );
        (scheduler, rx)
    }

    #[tokio::test]
    async fn counts_only_markers_within_proximity() {
        let near = GeoPoint::new(44.8130, 20.4612).unwrap();
        let far = GeoPoint::new(44.8300, 20.4612).unwrap();
        let store = store_with(&[home(), near, far]).await;
        let (sink, mut rx) = ChannelNotificationSink::new();

        let outcome = lookup_once(
            store.as_ref(),
            &ManualLocation::at(home()),
            &sink,
            &LookupConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, LookupOutcome::Nearby(2));
        assert_eq!(rx.try_recv().unwrap(), LookupEvent::Nearby { count: 2 });
    }

    #[tokio::test]
    async fn empty_area_raises_nothing() {
        let store = store_with(&[]).await;
        let (sink, mut rx) = ChannelNotificationSink::new();

        let outcome = lookup_once(
            store.as_ref(),
            &ManualLocation::at(home()),
            &sink,
            &LookupConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, LookupOutcome::Empty);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_position_degrades() {
        let store = store_with(&[home()]).await;
        let location = ManualLocation::at(home());
        location.set(None);
        let (sink, mut rx) = ChannelNotificationSink::new();

        let outcome = lookup_once(store.as_ref(), &location, &sink, &LookupConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome, LookupOutcome::Degraded);
        assert_eq!(rx.try_recv().unwrap(), LookupEvent::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_store_failure_is_retried() {
        let store = store_with(&[home()]).await;
        store.fail_next(StoreError::Unavailable {
            message: "offline".into(),
        });
        let (sink, _rx) = ChannelNotificationSink::new();

        let outcome = lookup_once(
            store.as_ref(),
            &ManualLocation::at(home()),
            &sink,
            &LookupConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, LookupOutcome::Nearby(1));
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_background_interval() {
        let store = store_with(&[home()]).await;
        let (scheduler, mut rx) = spawn(
            store,
            Arc::new(ManualLocation::at(home())),
            LookupMode::Background,
        );

        assert_eq!(rx.recv().await, Some(LookupEvent::Nearby { count: 1 }));
        let first = Instant::now();
        assert_eq!(rx.recv().await, Some(LookupEvent::Nearby { count: 1 }));
        assert!(first.elapsed() >= Duration::from_secs(300));

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_ticks_faster() {
        let store = store_with(&[home()]).await;
        let (scheduler, mut rx) = spawn(
            store,
            Arc::new(ManualLocation::at(home())),
            LookupMode::Background,
        );
        rx.recv().await.unwrap();

        let switched = Instant::now();
        scheduler.set_mode(LookupMode::Foreground);
        assert_eq!(scheduler.mode(), LookupMode::Foreground);
        rx.recv().await.unwrap();
        let waited = switched.elapsed();
        assert!(waited >= Duration::from_secs(120));
        assert!(waited < Duration::from_secs(300));

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_running_while_degraded() {
        let store = store_with(&[home()]).await;
        let location = Arc::new(ManualLocation::at(home()));
        location.set(None);
        let (scheduler, mut rx) = spawn(store, Arc::clone(&location), LookupMode::Foreground);

        assert_eq!(rx.recv().await, Some(LookupEvent::Degraded));
        location.set(Some(home()));
        assert_eq!(rx.recv().await, Some(LookupEvent::Nearby { count: 1 }));

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_before_next_lookup() {
        let store = store_with(&[home()]).await;
        let (scheduler, mut rx) = spawn(
            store,
            Arc::new(ManualLocation::at(home())),
            LookupMode::Foreground,
        );
        rx.recv().await.unwrap();

        scheduler.shutdown().await;
        assert_eq!(rx.recv().await, None);
    }
}
