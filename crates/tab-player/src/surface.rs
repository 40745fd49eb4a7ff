//! User-facing side effects: notices and login navigation.

use crate::resolver::{NotReadyKind, ResolveError};
use crate::session::LoginRedirect;

/// A toast-style message shown to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub description: String,
}

impl Notice {
    fn new(title: &str, description: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            description: description.into(),
        }
    }

    pub fn invalid_track() -> Self {
        Self::new("Invalid track", "This track id is not valid.")
    }

    pub fn output_unavailable() -> Self {
        Self::new("Playback failed", "The audio output is not available.")
    }

    /// Notice for a resolve failure. Unauthorized failures are handled by a
    /// redirect instead and get no notice here.
    pub fn for_resolve_error(err: &ResolveError) -> Option<Self> {
        match err {
            ResolveError::InvalidId(_) => Some(Self::invalid_track()),
            ResolveError::NotReady {
                kind: NotReadyKind::PlaylistMissing,
                ..
            } => Some(Self::new(
                "Track not ready",
                "The audio for this track has not been processed yet. Please try another track.",
            )),
            ResolveError::NotReady {
                kind: NotReadyKind::StreamIdMissing,
                ..
            } => Some(Self::new(
                "Track not ready",
                "This track has no audio file yet. Please try another track.",
            )),
            ResolveError::Unauthorized { .. } => None,
            ResolveError::Other(reason) => Some(Self::new("Playback failed", reason.clone())),
        }
    }
}

/// The UI surface of a tab, as seen by the coordinator.
pub trait UserSurface: Send + Sync {
    fn notify(&self, notice: Notice);
    /// Leave the current page for the login surface.
    fn redirect_to_login(&self, redirect: LoginRedirect);
}

/// Surface that only writes to the log; used by the simulation binary.
pub struct LogSurface {
    label: String,
}

impl LogSurface {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl UserSurface for LogSurface {
    fn notify(&self, notice: Notice) {
        tracing::warn!(
            tab = %self.label,
            title = %notice.title,
            description = %notice.description,
            "user notice"
        );
    }

    fn redirect_to_login(&self, redirect: LoginRedirect) {
        tracing::warn!(
            tab = %self.label,
            location = %redirect.location,
            reason = %redirect.reason,
            "redirecting to login"
        );
    }
}
