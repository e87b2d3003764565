//! Background loop feeding device positions into a [`LiveView`].

use std::sync::Arc;
use std::time::Duration;

use animal_watch_platform::LocationProvider;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{LiveView, LiveViewError};

/// Polls the last known device position and forwards it to a live view.
///
/// Moves below the view's movement threshold are coalesced by the view
/// itself, so polling faster than the user moves is harmless.
pub struct LocationTracker {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LocationTracker {
    /// Starts polling every `location_poll_secs` of the view's config.
    #[must_use]
    pub fn spawn(view: Arc<LiveView>, location: Arc<dyn LocationProvider>) -> Self {
        let interval = Duration::from_secs(view.config().location_poll_secs);
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(run(view, location, interval, rx));
        Self { shutdown, task }
    }

    /// Stops polling and waits for the loop to exit.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            log::warn!("Location tracker task failed: {e}");
        }
    }
}

async fn run(
    view: Arc<LiveView>,
    location: Arc<dyn LocationProvider>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    log::debug!("Location tracker polling every {interval:?}");
    loop {
        match location.last_known_position() {
            Some(position) => match view.update_location(position).await {
                Ok(true) => log::debug!(
                    "Live view moved to ({}, {})",
                    position.latitude,
                    position.longitude
                ),
                Ok(false) => {}
                Err(LiveViewError::Stopped) => break,
                Err(e) => log::warn!("Location update failed: {e}"),
            },
            None => log::trace!("No location fix yet"),
        }

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }
    log::debug!("Location tracker stopped");
}

#[cfg(test)]
mod tests {
    use animal_watch_geohash::GeoPoint;
    use animal_watch_marker_models::WatchMarker;
    use animal_watch_platform::local::ManualLocation;
    use animal_watch_store::{Document, MarkerStore, MemoryStore, Write};
    use chrono::Utc;

    use super::*;
    use crate::{LiveSnapshot, LiveViewConfig, ViewStatus};

    fn point(latitude: f64, longitude: f64) -> GeoPoint {
        GeoPoint::new(latitude, longitude).unwrap()
    }

    async fn wait_until(
        view: &LiveView,
        mut predicate: impl FnMut(&LiveSnapshot) -> bool,
    ) -> LiveSnapshot {
        let mut rx = view.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| predicate(s)))
            .await
            .expect("timed out waiting for live view")
            .expect("live view dropped");
        LiveSnapshot::clone(&snapshot)
    }

    async fn setup() -> (Arc<LiveView>, Arc<ManualLocation>) {
        let home = point(44.0, 20.0);
        let store = Arc::new(MemoryStore::new());
        store
            .commit(vec![Write::Set(Document::Marker(
                WatchMarker::new("A", "owner", "Owner", home, Utc::now()).unwrap(),
            ))])
            .await
            .unwrap();
        let config = LiveViewConfig {
            radius_meters: 500.0,
            ..LiveViewConfig::default()
        };
        let view = Arc::new(LiveView::new(store as Arc<dyn MarkerStore>, config).unwrap());
        (view, Arc::new(ManualLocation::at(home)))
    }

    #[tokio::test(start_paused = true)]
    async fn follows_device_position() {
        let (view, location) = setup().await;
        let tracker = LocationTracker::spawn(
            Arc::clone(&view),
            Arc::clone(&location) as Arc<dyn LocationProvider>,
        );

        let live = wait_until(&view, |s| s.status == ViewStatus::Live).await;
        assert_eq!(live.markers.len(), 1);

        location.set(Some(point(44.09, 20.0)));
        let away = wait_until(&view, |s| {
            s.epoch > live.epoch && s.status == ViewStatus::Live
        })
        .await;
        assert!(away.markers.is_empty());

        tracker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stops_following_after_shutdown() {
        let (view, location) = setup().await;
        let tracker = LocationTracker::spawn(
            Arc::clone(&view),
            Arc::clone(&location) as Arc<dyn LocationProvider>,
        );
        let live = wait_until(&view, |s| s.status == ViewStatus::Live).await;
        tracker.shutdown().await;

        location.set(Some(point(44.09, 20.0)));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(view.snapshot().epoch, live.epoch);
    }

    #[tokio::test(start_paused = true)]
    async fn exits_when_view_is_stopped() {
        let (view, location) = setup().await;
        let tracker = LocationTracker::spawn(
            Arc::clone(&view),
            location as Arc<dyn LocationProvider>,
        );
        wait_until(&view, |s| s.status == ViewStatus::Live).await;
        view.stop();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(tracker.task.is_finished());
    }
}
