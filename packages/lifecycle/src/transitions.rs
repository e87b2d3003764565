//! Pure lifecycle transitions.
//!
//! Each function either builds a marker (or patch) from user input, or
//! expands a transition into the list of writes that must commit together.

use animal_watch_geohash::GeoPoint;
use animal_watch_marker_models::{
    MarkerCounter, MarkerDraft, MarkerPatch, MarkerSeverity, MarkerState, StatsCounter,
    WatchMarker,
};
use animal_watch_platform::AuthUser;
use animal_watch_store::{Document, DocumentRef, Write};
use chrono::{DateTime, Duration, Utc};

use crate::{LifecycleError, MarkerPolicy, ValidationError};

/// Per-user record toggled on a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Appraisal; also counts towards the owner's statistics.
    Appraisal,
    /// "Seen" mark; only counted on the marker.
    Seen,
}

impl RecordKind {
    /// Store address of `user_id`'s record on `marker_id`.
    #[must_use]
    pub fn reference(self, marker_id: &str, user_id: &str) -> DocumentRef {
        let (marker_id, user_id) = (marker_id.to_string(), user_id.to_string());
        match self {
            Self::Appraisal => DocumentRef::Appraisal { marker_id, user_id },
            Self::Seen => DocumentRef::Seen { marker_id, user_id },
        }
    }

    fn document(self, marker_id: &str, user_id: &str) -> Document {
        let (marker_id, user_id) = (marker_id.to_string(), user_id.to_string());
        match self {
            Self::Appraisal => Document::Appraisal { marker_id, user_id },
            Self::Seen => Document::Seen { marker_id, user_id },
        }
    }
}

/// Checks the title and description.
///
/// # Errors
///
/// Returns the first blank field.
pub fn validate_text(title: &str, description: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::Title);
    }
    if description.trim().is_empty() {
        return Err(ValidationError::Description);
    }
    Ok(())
}

/// Checks every required draft field and returns the image reference.
///
/// # Errors
///
/// Returns the first missing field, in the order title, description,
/// severity, image.
pub fn validate_draft(draft: &MarkerDraft) -> Result<&str, ValidationError> {
    validate_text(&draft.title, &draft.description)?;
    if draft.severity == MarkerSeverity::Undefined {
        return Err(ValidationError::Severity);
    }
    draft
        .image
        .as_deref()
        .filter(|image| !image.trim().is_empty())
        .ok_or(ValidationError::Image)
}

/// Fails unless `marker` is `Active`.
///
/// # Errors
///
/// Returns [`LifecycleError::InvalidTransition`] naming `action`.
pub fn ensure_active(marker: &WatchMarker, action: &'static str) -> Result<(), LifecycleError> {
    if marker.state == MarkerState::Active {
        Ok(())
    } else {
        Err(LifecycleError::InvalidTransition {
            marker_id: marker.id.clone(),
            state: marker.state,
            action,
        })
    }
}

fn apply_draft(
    marker: &mut WatchMarker,
    draft: &MarkerDraft,
    image: &str,
    now: DateTime<Utc>,
    policy: MarkerPolicy,
) {
    marker.title.clone_from(&draft.title);
    marker.description.clone_from(&draft.description);
    marker.tags.clone_from(&draft.tags);
    marker.severity = draft.severity;
    marker.image_uri = image.to_string();
    marker.expires_on = Some(now + Duration::days(policy.expiry_days));
}

/// Builds a new first-in-thread marker owned by `owner`.
///
/// # Errors
///
/// Returns [`LifecycleError::Validation`] for an incomplete draft and
/// [`LifecycleError::Position`] for an invalid position.
pub fn prepare_marker(
    id: String,
    draft: &MarkerDraft,
    owner: &AuthUser,
    position: GeoPoint,
    now: DateTime<Utc>,
    policy: MarkerPolicy,
) -> Result<WatchMarker, LifecycleError> {
    let image = validate_draft(draft)?;
    let mut marker = WatchMarker::new(id, &owner.id, &owner.display_name, position, now)?;
    apply_draft(&mut marker, draft, image, now, policy);
    Ok(marker)
}

/// Builds the successor of `base` and the patch superseding `base`.
///
/// The successor keeps the base's position and title and sits one step
/// further along the thread.
///
/// # Errors
///
/// Returns [`LifecycleError::InvalidTransition`] if `base` is not active
/// and [`LifecycleError::Validation`] for an incomplete draft.
pub fn prepare_update(
    base: &WatchMarker,
    id: String,
    draft: &MarkerDraft,
    author: &AuthUser,
    now: DateTime<Utc>,
    policy: MarkerPolicy,
) -> Result<(WatchMarker, MarkerPatch), LifecycleError> {
    ensure_active(base, "update")?;

    let draft = MarkerDraft {
        title: base.title.clone(),
        ..draft.clone()
    };
    let image = validate_draft(&draft)?;

    let mut successor = WatchMarker::new(
        id,
        &author.id,
        &author.display_name,
        base.position(),
        now,
    )?;
    successor.inherit_position(base);
    apply_draft(&mut successor, &draft, image, now, policy);
    successor.base_marker_id = Some(base.id.clone());
    successor.position_in_thread = base.position_in_thread + 1;

    let patch = MarkerPatch {
        state: Some(MarkerState::Updated),
        has_updates: Some(true),
        updated_on: Some(Some(now)),
        ..MarkerPatch::default()
    };

    Ok((successor, patch))
}

/// Writes publishing `marker` and crediting its owner.
#[must_use]
pub fn creation_writes(marker: &WatchMarker) -> Vec<Write> {
    vec![
        Write::Set(Document::Marker(marker.clone())),
        Write::increment_stats(&marker.owner_id, StatsCounter::MarkersCreated, 1),
        Write::increment_stats(&marker.owner_id, StatsCounter::Total, 1),
    ]
}

/// Writes superseding `base_id` with `successor` and crediting its author.
#[must_use]
pub fn update_writes(base_id: &str, successor: &WatchMarker, patch: MarkerPatch) -> Vec<Write> {
    vec![
        Write::Update {
            marker_id: base_id.to_string(),
            patch,
        },
        Write::Set(Document::Marker(successor.clone())),
        Write::increment_marker(base_id, MarkerCounter::Updates, 1),
        Write::increment_stats(&successor.owner_id, StatsCounter::MarkersUpdated, 1),
        Write::increment_stats(&successor.owner_id, StatsCounter::Total, 1),
    ]
}

/// Writes removing `marker` and reversing what publishing it counted.
///
/// Removing an update also restores its base to `Active`.
///
/// # Errors
///
/// Returns [`LifecycleError::InvalidTransition`] if `marker` is not
/// active.
pub fn removal_writes(
    marker: &WatchMarker,
    now: DateTime<Utc>,
) -> Result<Vec<Write>, LifecycleError> {
    ensure_active(marker, "remove")?;

    let mut writes = vec![Write::Update {
        marker_id: marker.id.clone(),
        patch: MarkerPatch {
            state: Some(MarkerState::Removed),
            removed_on: Some(Some(now)),
            ..MarkerPatch::default()
        },
    }];

    let counter = match &marker.base_marker_id {
        Some(base_id) => {
            writes.push(Write::Update {
                marker_id: base_id.clone(),
                patch: MarkerPatch {
                    state: Some(MarkerState::Active),
                    has_updates: Some(false),
                    updated_on: Some(None),
                    ..MarkerPatch::default()
                },
            });
            writes.push(Write::increment_marker(base_id, MarkerCounter::Updates, -1));
            StatsCounter::MarkersUpdated
        }
        None => StatsCounter::MarkersCreated,
    };
    writes.push(Write::increment_stats(&marker.owner_id, counter, -1));
    writes.push(Write::increment_stats(
        &marker.owner_id,
        StatsCounter::Total,
        -1,
    ));

    Ok(writes)
}

/// Patch replacing the text fields of a marker.
///
/// # Errors
///
/// Returns [`ValidationError`] for a blank title or description.
pub fn edit_patch(
    title: &str,
    description: &str,
    tags: Vec<String>,
) -> Result<MarkerPatch, ValidationError> {
    validate_text(title, description)?;
    Ok(MarkerPatch {
        title: Some(title.to_string()),
        description: Some(description.to_string()),
        tags: Some(tags),
        edited: Some(true),
        ..MarkerPatch::default()
    })
}

/// Writes flipping `user_id`'s record of `kind` on `marker`.
///
/// `present` is whether the record currently exists. Adding it counts +1,
/// removing it counts -1; appraisals also move the owner's statistics.
#[must_use]
pub fn toggle_writes(
    kind: RecordKind,
    marker: &WatchMarker,
    user_id: &str,
    present: bool,
) -> Vec<Write> {
    let delta = if present { -1 } else { 1 };
    let mut writes = vec![if present {
        Write::Delete(kind.reference(&marker.id, user_id))
    } else {
        Write::Set(kind.document(&marker.id, user_id))
    }];

    match kind {
        RecordKind::Appraisal => {
            writes.push(Write::increment_marker(
                &marker.id,
                MarkerCounter::Appraisals,
                delta,
            ));
            writes.push(Write::increment_stats(
                &marker.owner_id,
                StatsCounter::TotalAppraisals,
                delta,
            ));
            writes.push(Write::increment_stats(
                &marker.owner_id,
                StatsCounter::Total,
                delta,
            ));
        }
        RecordKind::Seen => {
            writes.push(Write::increment_marker(&marker.id, MarkerCounter::Seen, delta));
        }
    }

    writes
}
