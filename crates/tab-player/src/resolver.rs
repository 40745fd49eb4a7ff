//! Playback resolution.
//!
//! Turns a track id into a playable asset via the song-resolution API and
//! classifies failures into not-ready, unauthorized and other.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use player_bus_types::{TrackId, TrackProjection};

use crate::session::SessionStore;

const PLAYLIST_MISSING_MARKER: &str = "HLS master playlist not found";
const STREAM_ID_MISSING_MARKER: &str = "missing uuid";
const DEFAULT_UNAUTHORIZED_REASON: &str = "Please sign in to keep listening.";

/// A track that is ready to hand to the playback driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSong {
    /// Canonical metadata from the resolution API.
    pub track: TrackProjection,
    /// Streaming identifier of the processed media asset.
    pub stream_id: String,
}

/// Why a media asset is not playable yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotReadyKind {
    /// The derived HLS playlist has not been produced.
    PlaylistMissing,
    /// The song has no streaming identifier.
    StreamIdMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid track id {0:?}")]
    InvalidId(TrackId),
    #[error("track {id} is not ready: {reason}")]
    NotReady {
        id: u64,
        kind: NotReadyKind,
        reason: String,
    },
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },
    #[error("{0}")]
    Other(String),
}

/// Classify a machine-readable failure reason returned by the API.
pub fn classify_reason(id: u64, reason: &str) -> ResolveError {
    if reason.contains(PLAYLIST_MISSING_MARKER) {
        ResolveError::NotReady {
            id,
            kind: NotReadyKind::PlaylistMissing,
            reason: reason.to_string(),
        }
    } else if reason.contains(STREAM_ID_MISSING_MARKER) {
        ResolveError::NotReady {
            id,
            kind: NotReadyKind::StreamIdMissing,
            reason: reason.to_string(),
        }
    } else {
        ResolveError::Other(reason.to_string())
    }
}

/// Classify a non-success HTTP status.
pub fn classify_status(id: u64, status: u16, reason: Option<String>) -> ResolveError {
    match status {
        401 | 403 => ResolveError::Unauthorized {
            reason: reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_UNAUTHORIZED_REASON.to_string()),
        },
        _ => match reason {
            Some(reason) if !reason.trim().is_empty() => classify_reason(id, &reason),
            _ => ResolveError::Other(format!("resolve request failed with status {status}")),
        },
    }
}

#[async_trait]
pub trait SongResolver: Send + Sync {
    /// Resolve an already validated numeric id.
    async fn resolve(&self, id: u64) -> Result<ResolvedSong, ResolveError>;
}

/// Validate `id` and resolve it. Malformed ids never reach the resolver.
pub async fn resolve_track(
    resolver: &dyn SongResolver,
    id: &TrackId,
) -> Result<ResolvedSong, ResolveError> {
    let Some(numeric) = id.numeric() else {
        return Err(ResolveError::InvalidId(id.clone()));
    };
    resolver.resolve(numeric).await
}

#[derive(Debug, Deserialize)]
struct PlayNowResponse {
    success: Option<bool>,
    error: Option<String>,
    message: Option<String>,
    song: Option<SongPayload>,
}

#[derive(Debug, Deserialize)]
struct SongPayload {
    id: Option<TrackId>,
    #[serde(alias = "name", alias = "songName")]
    title: Option<String>,
    artist: Option<String>,
    #[serde(alias = "coverUrl")]
    cover: Option<String>,
    uuid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Interpret a `play-now` response body.
fn interpret_play_now(id: u64, status: u16, body: &str) -> Result<ResolvedSong, ResolveError> {
    if !(200..300).contains(&status) {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        return Err(classify_status(id, status, parsed.message.or(parsed.error)));
    }

    let parsed: PlayNowResponse = serde_json::from_str(body)
        .map_err(|err| ResolveError::Other(format!("invalid play-now response: {err}")))?;
    if parsed.success == Some(false) {
        let reason = parsed
            .error
            .or(parsed.message)
            .unwrap_or_else(|| "playback failed".to_string());
        return Err(classify_reason(id, &reason));
    }

    let Some(song) = parsed.song else {
        return Err(ResolveError::NotReady {
            id,
            kind: NotReadyKind::StreamIdMissing,
            reason: "response did not include a song".to_string(),
        });
    };
    let stream_id = song
        .uuid
        .map(|uuid| uuid.trim().to_string())
        .filter(|uuid| !uuid.is_empty())
        .ok_or_else(|| ResolveError::NotReady {
            id,
            kind: NotReadyKind::StreamIdMissing,
            reason: STREAM_ID_MISSING_MARKER.to_string(),
        })?;
    let track = TrackProjection::new(
        song.id.unwrap_or_else(|| TrackId::from(id)),
        song.title.unwrap_or_default(),
        song.artist.unwrap_or_default(),
        song.cover,
    );
    Ok(ResolvedSong { track, stream_id })
}

/// Resolver backed by the remote `POST /songs/{id}/play-now` endpoint.
pub struct HttpSongResolver {
    client: Client,
    base_url: String,
    session: SessionStore,
}

impl HttpSongResolver {
    pub fn new(base_url: &str, timeout: Duration, session: SessionStore) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build resolver http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    fn play_now_url(&self, id: u64) -> String {
        format!("{}/songs/{id}/play-now", self.base_url)
    }
}

#[async_trait]
impl SongResolver for HttpSongResolver {
    async fn resolve(&self, id: u64) -> Result<ResolvedSong, ResolveError> {
        let url = self.play_now_url(id);
        let mut request = self.client.post(&url).json(&serde_json::json!({}));
        if let Some(token) = self.session.bearer_token() {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await.map_err(|err| {
            tracing::warn!(url = %url, error = %err, "play-now request failed");
            ResolveError::Other(format!("play-now request failed: {err}"))
        })?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|err| ResolveError::Other(format!("read play-now response: {err}")))?;
        tracing::debug!(url = %url, status, "play-now response");
        interpret_play_now(id, status, &body)
    }
}

/// One song known to a [`StaticResolver`].
#[derive(Clone, Debug)]
pub struct CatalogEntry {
    pub track: TrackProjection,
    /// `None` models a song whose media has not been processed.
    pub stream_id: Option<String>,
    /// Forced failure: `(status, reason)`.
    pub failure: Option<(u16, Option<String>)>,
}

/// In-memory resolver over a fixed catalog.
pub struct StaticResolver {
    entries: HashMap<u64, CatalogEntry>,
}

impl StaticResolver {
    pub fn new(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let entries = entries
            .into_iter()
            .filter_map(|entry| entry.track.id().numeric().map(|id| (id, entry)))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SongResolver for StaticResolver {
    async fn resolve(&self, id: u64) -> Result<ResolvedSong, ResolveError> {
        let entry = self
            .entries
            .get(&id)
            .ok_or_else(|| ResolveError::Other(format!("song {id} not found")))?;
        if let Some((status, reason)) = entry.failure.clone() {
            return Err(classify_status(id, status, reason));
        }
        let stream_id = entry.stream_id.clone().ok_or_else(|| ResolveError::NotReady {
            id,
            kind: NotReadyKind::StreamIdMissing,
            reason: STREAM_ID_MISSING_MARKER.to_string(),
        })?;
        Ok(ResolvedSong {
            track: entry.track.clone(),
            stream_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct CountingResolver {
        calls: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl SongResolver for CountingResolver {
        async fn resolve(&self, id: u64) -> Result<ResolvedSong, ResolveError> {
            self.calls.lock().unwrap().push(id);
            Err(ResolveError::Other("offline".to_string()))
        }
    }

    #[tokio::test]
    async fn malformed_ids_skip_the_resolver() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let resolver = CountingResolver { calls: calls.clone() };
        for raw in ["abc", "0", "-1", ""] {
            let err = resolve_track(&resolver, &TrackId::from(raw)).await.unwrap_err();
            assert!(matches!(err, ResolveError::InvalidId(_)));
        }
        assert!(calls.lock().unwrap().is_empty());

        let err = resolve_track(&resolver, &TrackId::from(5)).await.unwrap_err();
        assert_eq!(err, ResolveError::Other("offline".to_string()));
        assert_eq!(*calls.lock().unwrap(), vec![5]);
    }

    #[test]
    fn reasons_classify_into_not_ready() {
        assert!(matches!(
            classify_reason(1, "HLS master playlist not found for song 1"),
            ResolveError::NotReady { kind: NotReadyKind::PlaylistMissing, .. }
        ));
        assert!(matches!(
            classify_reason(1, "song has missing uuid"),
            ResolveError::NotReady { kind: NotReadyKind::StreamIdMissing, .. }
        ));
        assert_eq!(
            classify_reason(1, "database down"),
            ResolveError::Other("database down".to_string())
        );
    }

    #[test]
    fn auth_statuses_classify_as_unauthorized() {
        assert_eq!(
            classify_status(1, 403, Some("Access Denied".to_string())),
            ResolveError::Unauthorized {
                reason: "Access Denied".to_string()
            }
        );
        assert_eq!(
            classify_status(1, 401, None),
            ResolveError::Unauthorized {
                reason: DEFAULT_UNAUTHORIZED_REASON.to_string()
            }
        );
        assert!(matches!(classify_status(1, 502, None), ResolveError::Other(_)));
    }

    #[test]
    fn play_now_success_builds_canonical_track() {
        let body = r#"{
            "song": { "id": 9, "songName": "Nine", "artist": "Band", "coverUrl": "c.png", "uuid": "abc-123" }
        }"#;
        let resolved = interpret_play_now(9, 200, body).unwrap();
        assert_eq!(resolved.stream_id, "abc-123");
        assert_eq!(resolved.track.title(), "Nine");
        assert_eq!(resolved.track.cover(), Some("c.png"));
        assert_eq!(resolved.track.id(), &TrackId::from(9));
    }

    #[test]
    fn play_now_domain_failure_is_classified() {
        let body = r#"{ "success": false, "error": "HLS master playlist not found" }"#;
        assert!(matches!(
            interpret_play_now(3, 200, body),
            Err(ResolveError::NotReady { id: 3, kind: NotReadyKind::PlaylistMissing, .. })
        ));
    }

    #[test]
    fn play_now_without_stream_id_is_not_ready() {
        let body = r#"{ "song": { "id": 4, "title": "Four" } }"#;
        assert!(matches!(
            interpret_play_now(4, 200, body),
            Err(ResolveError::NotReady { kind: NotReadyKind::StreamIdMissing, .. })
        ));
        assert!(matches!(
            interpret_play_now(4, 200, "{}"),
            Err(ResolveError::NotReady { .. })
        ));
    }

    #[test]
    fn play_now_forbidden_reads_reason_from_body() {
        let body = r#"{ "message": "Login required to play music" }"#;
        assert_eq!(
            interpret_play_now(4, 403, body),
            Err(ResolveError::Unauthorized {
                reason: "Login required to play music".to_string()
            })
        );
        assert!(matches!(
            interpret_play_now(4, 401, "not json"),
            Err(ResolveError::Unauthorized { .. })
        ));
    }

    #[test]
    fn play_now_garbage_body_is_other() {
        assert!(matches!(
            interpret_play_now(4, 200, "<html>"),
            Err(ResolveError::Other(_))
        ));
    }

    #[test]
    fn play_now_url_trims_trailing_slash() {
        let resolver = HttpSongResolver::new(
            "http://localhost:8080/api/",
            Duration::from_secs(1),
            SessionStore::default(),
        )
        .unwrap();
        assert_eq!(
            resolver.play_now_url(12),
            "http://localhost:8080/api/songs/12/play-now"
        );
    }

    #[tokio::test]
    async fn static_resolver_covers_failure_classes() {
        let resolver = StaticResolver::new(vec![
            CatalogEntry {
                track: TrackProjection::new(1, "One", "A", None),
                stream_id: Some("s1".to_string()),
                failure: None,
            },
            CatalogEntry {
                track: TrackProjection::new(2, "Two", "A", None),
                stream_id: None,
                failure: None,
            },
            CatalogEntry {
                track: TrackProjection::new(3, "Three", "A", None),
                stream_id: Some("s3".to_string()),
                failure: Some((403, None)),
            },
        ]);
        assert_eq!(resolver.len(), 3);
        assert_eq!(resolver.resolve(1).await.unwrap().stream_id, "s1");
        assert!(matches!(resolver.resolve(2).await, Err(ResolveError::NotReady { .. })));
        assert!(matches!(resolver.resolve(3).await, Err(ResolveError::Unauthorized { .. })));
        assert!(matches!(resolver.resolve(99).await, Err(ResolveError::Other(_))));
    }
}
