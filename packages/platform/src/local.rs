//! In-process collaborator implementations.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use animal_watch_geohash::GeoPoint;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    AuthProvider, AuthUser, LocationProvider, LookupEvent, NotificationSink, ObjectStorage,
    PlatformError,
};

/// Auth provider with a fixed, swappable user.
#[derive(Debug, Default)]
pub struct StaticAuth {
    user: Mutex<Option<AuthUser>>,
}

impl StaticAuth {
    /// Signed in as `id`.
    #[must_use]
    pub fn signed_in(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user: Mutex::new(Some(AuthUser {
                id: id.into(),
                display_name: display_name.into(),
            })),
        }
    }

    /// Signed out.
    #[must_use]
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Replaces the current user.
    pub fn set_user(&self, user: Option<AuthUser>) {
        *self.user.lock().unwrap_or_else(PoisonError::into_inner) = user;
    }
}

impl AuthProvider for StaticAuth {
    fn current_user(&self) -> Option<AuthUser> {
        self.user
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Object storage keeping uploads in memory.
#[derive(Debug, Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStorage {
    /// Empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of a stored object, if present.
    #[must_use]
    pub fn object_len(&self, destination_id: &str) -> Option<usize> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(destination_id)
            .map(Vec::len)
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(&self, bytes: Vec<u8>, destination_id: &str) -> Result<String, PlatformError> {
        if bytes.is_empty() {
            return Err(PlatformError::Upload {
                destination: destination_id.to_string(),
                message: "empty object".to_string(),
            });
        }
        log::debug!("Stored {} bytes as {destination_id}", bytes.len());
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(destination_id.to_string(), bytes);
        Ok(format!("memory://markers/{destination_id}"))
    }
}

/// Location provider driven by explicit position updates.
#[derive(Debug, Default)]
pub struct ManualLocation {
    position: Mutex<Option<GeoPoint>>,
}

impl ManualLocation {
    /// Starts with `position` as the current fix.
    #[must_use]
    pub fn at(position: GeoPoint) -> Self {
        Self {
            position: Mutex::new(Some(position)),
        }
    }

    /// Sets or clears the current fix.
    pub fn set(&self, position: Option<GeoPoint>) {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner) = position;
    }
}

#[async_trait]
impl LocationProvider for ManualLocation {
    async fn current_position(&self) -> Result<GeoPoint, PlatformError> {
        self.last_known_position()
            .ok_or_else(|| PlatformError::LocationUnavailable {
                message: "no position fix".to_string(),
            })
    }

    fn last_known_position(&self) -> Option<GeoPoint> {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Forwards events into a channel.
#[derive(Debug, Clone)]
pub struct ChannelNotificationSink {
    tx: mpsc::UnboundedSender<LookupEvent>,
}

impl ChannelNotificationSink {
    /// Sink and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LookupEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelNotificationSink {
    fn notify(&self, event: LookupEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("Notification receiver dropped, discarding {}", event.as_ref());
        }
    }
}

/// Writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, event: LookupEvent) {
        match event {
            LookupEvent::Nearby { count } => {
                log::info!("{count} watch marker(s) near your location");
            }
            LookupEvent::Degraded => log::warn!("Cannot get device location"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_reports_signed_in_user() {
        let auth = StaticAuth::signed_in("u1", "Ana");
        assert_eq!(auth.current_user_id().as_deref(), Some("u1"));
        auth.set_user(None);
        assert!(auth.current_user().is_none());
        assert!(StaticAuth::signed_out().current_user_id().is_none());
    }

    #[tokio::test]
    async fn upload_returns_url_and_keeps_bytes() {
        let storage = MemoryObjectStorage::new();
        let url = storage.upload(vec![1, 2, 3], "m1").await.unwrap();
        assert_eq!(url, "memory://markers/m1");
        assert_eq!(storage.object_len("m1"), Some(3));
        assert!(storage.upload(Vec::new(), "m2").await.is_err());
    }

    #[tokio::test]
    async fn manual_location_fails_without_fix() {
        let location = ManualLocation::default();
        assert!(matches!(
            location.current_position().await,
            Err(PlatformError::LocationUnavailable { .. })
        ));
        let point = GeoPoint::new(44.0, 20.0).unwrap();
        location.set(Some(point));
        assert_eq!(location.current_position().await.unwrap(), point);
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelNotificationSink::new();
        sink.notify(LookupEvent::Nearby { count: 2 });
        sink.notify(LookupEvent::Degraded);
        assert_eq!(rx.recv().await, Some(LookupEvent::Nearby { count: 2 }));
        assert_eq!(rx.recv().await, Some(LookupEvent::Degraded));
    }
}
