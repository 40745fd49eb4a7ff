//! Local playback driver.
//!
//! Owns the single audio output of a tab. Commands are handed to a worker
//! thread over a channel; the driver keeps a status snapshot for readers.

use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{Receiver, Sender};

use player_bus_types::TrackProjection;

use crate::queue::Queue;
use crate::resolver::ResolvedSong;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("playback worker offline")]
    Offline,
}

/// Transport commands that act on the current track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverControl {
    PauseToggle,
    Seek { ms: u64 },
    Stop,
}

pub trait PlaybackDriver: Send + Sync {
    /// Start playing `song`; `queue` is the queue it was started from.
    fn play(&self, song: ResolvedSong, queue: Queue) -> Result<(), DriverError>;
    fn control(&self, control: DriverControl) -> Result<(), DriverError>;
    /// Track currently loaded in the output, if any.
    fn now_playing(&self) -> Option<TrackProjection>;
}

/// Commands accepted by the playback worker thread.
#[derive(Debug, Clone)]
pub(crate) enum DriverCommand {
    Play { song: ResolvedSong, queue_len: usize },
    PauseToggle,
    Seek { ms: u64 },
    Stop,
}

/// Snapshot of the output state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStatus {
    pub now_playing: Option<TrackProjection>,
    pub stream_id: Option<String>,
    pub paused: bool,
    pub position_ms: u64,
}

/// Driver that forwards commands to a worker thread.
#[derive(Clone)]
pub struct ChannelDriver {
    label: String,
    cmd_tx: Sender<DriverCommand>,
    status: Arc<Mutex<DriverStatus>>,
}

impl ChannelDriver {
    pub(crate) fn new(
        label: String,
        cmd_tx: Sender<DriverCommand>,
        status: Arc<Mutex<DriverStatus>>,
    ) -> Self {
        Self {
            label,
            cmd_tx,
            status,
        }
    }

    pub fn status(&self) -> DriverStatus {
        lock_status(&self.status).clone()
    }

    fn send(&self, cmd: DriverCommand) -> Result<(), DriverError> {
        self.cmd_tx.send(cmd).map_err(|_| {
            tracing::warn!(driver = %self.label, "playback worker offline");
            DriverError::Offline
        })
    }
}

impl PlaybackDriver for ChannelDriver {
    fn play(&self, song: ResolvedSong, queue: Queue) -> Result<(), DriverError> {
        preupdate_status_on_play(&self.status, &song);
        self.send(DriverCommand::Play {
            song,
            queue_len: queue.len(),
        })
    }

    fn control(&self, control: DriverControl) -> Result<(), DriverError> {
        let cmd = match control {
            DriverControl::PauseToggle => DriverCommand::PauseToggle,
            DriverControl::Seek { ms } => DriverCommand::Seek { ms },
            DriverControl::Stop => DriverCommand::Stop,
        };
        self.send(cmd)
    }

    fn now_playing(&self) -> Option<TrackProjection> {
        lock_status(&self.status).now_playing.clone()
    }
}

fn lock_status(status: &Mutex<DriverStatus>) -> MutexGuard<'_, DriverStatus> {
    status.lock().unwrap_or_else(|err| err.into_inner())
}

fn preupdate_status_on_play(status: &Arc<Mutex<DriverStatus>>, song: &ResolvedSong) {
    let mut s = lock_status(status);
    s.now_playing = Some(song.track.clone());
    s.stream_id = Some(song.stream_id.clone());
    s.paused = false;
    s.position_ms = 0;
}

/// Spawn the playback worker thread for one tab.
pub fn spawn_driver(label: impl Into<String>) -> ChannelDriver {
    let label = label.into();
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    let status = Arc::new(Mutex::new(DriverStatus::default()));
    {
        let label = label.clone();
        let status = status.clone();
        std::thread::spawn(move || driver_thread_main(label, status, cmd_rx));
    }
    ChannelDriver::new(label, cmd_tx, status)
}

/// Main loop for the playback worker. Ends when every driver handle is dropped.
fn driver_thread_main(label: String, status: Arc<Mutex<DriverStatus>>, cmd_rx: Receiver<DriverCommand>) {
    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            DriverCommand::Play { song, queue_len } => {
                tracing::info!(
                    driver = %label,
                    track_id = %song.track.id(),
                    title = %song.track.title(),
                    stream_id = %song.stream_id,
                    queue_len,
                    "output started"
                );
            }
            DriverCommand::PauseToggle => {
                let mut s = lock_status(&status);
                if s.now_playing.is_some() {
                    s.paused = !s.paused;
                    tracing::info!(driver = %label, paused = s.paused, "output pause toggled");
                }
            }
            DriverCommand::Seek { ms } => {
                let mut s = lock_status(&status);
                if s.now_playing.is_some() {
                    s.position_ms = ms;
                    tracing::info!(driver = %label, position_ms = ms, "output seek");
                }
            }
            DriverCommand::Stop => {
                let mut s = lock_status(&status);
                *s = DriverStatus::default();
                tracing::info!(driver = %label, "output stopped");
            }
        }
    }
    tracing::debug!(driver = %label, "playback worker exiting");
}
