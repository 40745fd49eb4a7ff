use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Stable track identifier as carried on the player bus.
///
/// Peers may encode ids either as JSON strings or integers; both decode to the
/// same value when their textual form matches (`"42"` and `42` compare equal).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the id as a positive integer, if it is one.
    ///
    /// The resolution API only accepts positive numeric ids; anything else is a
    /// client-side validation failure.
    pub fn numeric(&self) -> Option<u64> {
        self.0.parse::<u64>().ok().filter(|id| *id > 0)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for TrackId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TrackId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl Serialize for TrackId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if let Ok(value) = self.0.parse::<u64>() {
            if value.to_string() == self.0 {
                return serializer.serialize_u64(value);
            }
        }
        match self.0.parse::<i64>() {
            Ok(value) if value.to_string() == self.0 => serializer.serialize_i64(value),
            _ => serializer.serialize_str(&self.0),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTrackId {
    Unsigned(u64),
    Signed(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for TrackId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawTrackId::deserialize(deserializer)? {
            RawTrackId::Unsigned(value) => TrackId(value.to_string()),
            RawTrackId::Signed(value) => TrackId(value.to_string()),
            RawTrackId::Text(value) => TrackId::new(value),
        })
    }
}

/// Minimal identity + display record for a playable item.
///
/// This is what travels between tabs instead of the full song record. Fields are
/// read-only; a receiver that wants different data replaces the projection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackProjection {
    id: TrackId,
    #[serde(default)]
    title: String,
    #[serde(default)]
    artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cover: Option<String>,
}

impl TrackProjection {
    pub fn new(
        id: impl Into<TrackId>,
        title: impl Into<String>,
        artist: impl Into<String>,
        cover: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            cover,
        }
    }

    pub fn id(&self) -> &TrackId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn cover(&self) -> Option<&str> {
        self.cover.as_deref()
    }
}

/// Transport command forwarded to the tab that owns audio output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlAction {
    TogglePlay,
    Next,
    Previous,
    Seek { position_ms: u64 },
}

/// Messages exchanged between tabs on the `player` channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusMessage {
    /// "Is any tab currently the active player?"
    LeaderProbe,
    /// Sent only by the active player in reply to a probe.
    LeaderProbeResponse,
    /// Ask the active player to adopt `queue` and play `track`.
    ForwardPlay {
        track: TrackProjection,
        queue: Vec<TrackProjection>,
    },
    /// Ask the active player to apply a transport command.
    PlayerControl { action: ControlAction },
}

impl BusMessage {
    /// Wire tag, used for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            BusMessage::LeaderProbe => "LEADER_PROBE",
            BusMessage::LeaderProbeResponse => "LEADER_PROBE_RESPONSE",
            BusMessage::ForwardPlay { .. } => "FORWARD_PLAY",
            BusMessage::PlayerControl { .. } => "PLAYER_CONTROL",
        }
    }
}

/// A user's request to play a track.
///
/// `queue_hint` is the batch the caller wants as the new queue ("play all"),
/// or `None` for a singleton play.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayRequest {
    pub track: TrackProjection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_hint: Option<Vec<TrackProjection>>,
}

impl PlayRequest {
    pub fn single(track: TrackProjection) -> Self {
        Self {
            track,
            queue_hint: None,
        }
    }

    pub fn with_queue(track: TrackProjection, queue: Vec<TrackProjection>) -> Self {
        Self {
            track,
            queue_hint: Some(queue),
        }
    }
}
