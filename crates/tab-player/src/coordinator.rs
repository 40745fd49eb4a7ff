//! Cross-tab playback coordination.
//!
//! Every tab runs one [`TabCoordinator`]. A play request either plays in this
//! tab (it already is the active player, or nobody answered the probe in
//! time) or is forwarded over the bus to the tab that answered. A passive
//! listener answers probes and executes forwarded commands, but only while
//! this tab is the active player.
//!
//! This is not leader election: there are no terms or leases, and two tabs
//! probing at the same instant with no prior leader may both self-promote.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use player_bus_types::{BusMessage, ControlAction, PlayRequest, TrackId, TrackProjection};

use crate::bus::{BusEnvelope, BusSubscription, PlayerBus, TabId};
use crate::config::CoordinatorSettings;
use crate::driver::{DriverControl, DriverError, PlaybackDriver};
use crate::queue::{Queue, QueueService};
use crate::resolver::{ResolveError, SongResolver, resolve_track};
use crate::session::{LoginRedirect, SessionStore};
use crate::surface::{Notice, UserSurface};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlayError {
    #[error("invalid track id {0:?}")]
    InvalidTrack(TrackId),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Terminal result of one play request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Reconciled and played in this tab. `promoted` is set when the tab took
    /// over because no active player answered the probe.
    Played { promoted: bool },
    /// Reconciled in this tab, but resolving or starting audio failed.
    LocalFailed { promoted: bool, error: PlayError },
    /// Reconciled and sent to the active player in another tab.
    Forwarded,
    /// Rejected before any message or network call.
    Rejected(PlayError),
}

/// Result of a transport control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    Applied,
    Forwarded,
    Failed(PlayError),
}

/// Collaborators a tab needs to actually play something.
#[derive(Clone)]
pub struct TabDeps {
    pub resolver: Arc<dyn SongResolver>,
    pub driver: Arc<dyn PlaybackDriver>,
    pub surface: Arc<dyn UserSurface>,
    pub session: SessionStore,
}

#[derive(Debug, Default)]
struct TabState {
    /// Explicit active-player flag. Set once this tab starts driving audio.
    active: bool,
    /// Queue entry this tab last started playing.
    current: Option<TrackProjection>,
}

struct TabInner {
    id: TabId,
    bus: PlayerBus,
    settings: CoordinatorSettings,
    queue: QueueService,
    state: Mutex<TabState>,
    deps: TabDeps,
}

#[derive(Clone)]
pub struct TabCoordinator {
    inner: Arc<TabInner>,
}

/// Running bus listener of one tab. Dropping it tears the listener down.
pub struct ListenerHandle {
    join: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop listening, as when the tab is closed. Peers only notice through
    /// silence.
    pub fn shutdown(self) {
        self.join.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}

impl TabCoordinator {
    pub fn new(id: TabId, bus: PlayerBus, settings: CoordinatorSettings, deps: TabDeps) -> Self {
        Self {
            inner: Arc::new(TabInner {
                id,
                bus,
                settings,
                queue: QueueService::new(),
                state: Mutex::new(TabState::default()),
                deps,
            }),
        }
    }

    pub fn id(&self) -> &TabId {
        &self.inner.id
    }

    /// Whether this tab is the active player.
    pub fn is_active(&self) -> bool {
        self.lock_state().active
    }

    pub fn queue(&self) -> Queue {
        self.inner.queue.snapshot()
    }

    pub fn current_track(&self) -> Option<TrackProjection> {
        self.lock_state().current.clone()
    }

    /// Tear the tab down: stop listening, stop the output and give up the
    /// active-player role. Peers only notice through silence.
    pub fn shutdown(&self, listener: ListenerHandle) {
        listener.shutdown();
        let tab_id = &self.inner.id;
        let driver = &self.inner.deps.driver;
        let now_playing = driver.now_playing();
        if let Err(err) = driver.control(DriverControl::Stop) {
            tracing::warn!(tab_id = %tab_id, error = %err, "stopping output failed");
        }
        self.inner.queue.clear();
        let was_active = {
            let mut state = self.lock_state();
            let was_active = state.active;
            *state = TabState::default();
            was_active
        };
        tracing::info!(
            tab_id = %tab_id,
            was_active,
            now_playing = ?now_playing.as_ref().map(|track| track.id().to_string()),
            "tab closed"
        );
    }

    fn lock_state(&self) -> MutexGuard<'_, TabState> {
        self.inner.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Start the passive listener. The subscription exists before this returns,
    /// so nothing published afterwards is missed.
    pub fn start_listener(&self) -> ListenerHandle {
        let subscription = self.inner.bus.subscribe(&self.inner.id);
        let this = self.clone();
        let join = tokio::spawn(async move { this.run_listener(subscription).await });
        ListenerHandle { join }
    }

    /// Handle a user's play request.
    pub async fn request_play(&self, request: PlayRequest) -> PlayOutcome {
        let PlayRequest { track, queue_hint } = request;
        let tab_id = &self.inner.id;
        if track.id().numeric().is_none() {
            tracing::warn!(tab_id = %tab_id, track_id = %track.id(), "rejecting play request with invalid track id");
            self.inner.deps.surface.notify(Notice::invalid_track());
            return PlayOutcome::Rejected(PlayError::InvalidTrack(track.id().clone()));
        }

        let promoted = if self.is_active() {
            false
        } else {
            let answered = self.probe_for_active_player().await;
            if answered && !self.is_active() {
                let queue = self.inner.queue.apply_play(&track, queue_hint.as_deref());
                let receivers = self.inner.bus.publish(
                    tab_id,
                    BusMessage::ForwardPlay {
                        track: track.clone(),
                        queue: queue.to_vec(),
                    },
                );
                tracing::info!(
                    tab_id = %tab_id,
                    track_id = %track.id(),
                    queue_len = queue.len(),
                    receivers,
                    "forwarded play request to active player"
                );
                return PlayOutcome::Forwarded;
            }
            if !answered {
                let timeout_ms = self.inner.settings.probe_timeout.as_millis() as u64;
                tracing::info!(
                    tab_id = %tab_id,
                    timeout_ms,
                    "no active player answered probe; taking over playback"
                );
            }
            !self.is_active()
        };

        let queue = self.inner.queue.apply_play(&track, queue_hint.as_deref());
        match self.resolve_and_play(&track, queue).await {
            Ok(()) => PlayOutcome::Played { promoted },
            Err(error) => PlayOutcome::LocalFailed { promoted, error },
        }
    }

    /// Handle a transport control from the UI of this tab.
    pub async fn request_control(&self, action: ControlAction) -> ControlOutcome {
        if self.is_active() {
            return match self.apply_control(action).await {
                Ok(()) => ControlOutcome::Applied,
                Err(err) => ControlOutcome::Failed(err),
            };
        }
        self.inner
            .bus
            .publish(&self.inner.id, BusMessage::PlayerControl { action });
        tracing::debug!(tab_id = %self.inner.id, ?action, "forwarded control to active player");
        ControlOutcome::Forwarded
    }

    /// Broadcast a probe and wait for the first response or the timeout.
    async fn probe_for_active_player(&self) -> bool {
        let tab_id = &self.inner.id;
        let mut subscription = self.inner.bus.subscribe(tab_id);
        self.inner.bus.publish(tab_id, BusMessage::LeaderProbe);

        let wait_for_response = async {
            loop {
                match subscription.recv().await {
                    Ok(envelope) if envelope.message == BusMessage::LeaderProbeResponse => {
                        tracing::debug!(tab_id = %tab_id, responder = %envelope.origin, "probe answered");
                        return true;
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(tab_id = %tab_id, skipped, "probe subscription lagged");
                    }
                    Err(RecvError::Closed) => return false,
                }
            }
        };

        match tokio::time::timeout(self.inner.settings.probe_timeout, wait_for_response).await {
            Ok(answered) => answered,
            Err(_) => {
                tracing::debug!(tab_id = %tab_id, "probe timed out");
                false
            }
        }
    }

    /// Resolve `track` and start it on the local driver. On success this tab
    /// becomes (or stays) the active player.
    async fn resolve_and_play(&self, track: &TrackProjection, queue: Queue) -> Result<(), PlayError> {
        let deps = &self.inner.deps;
        let tab_id = &self.inner.id;
        let song = match resolve_track(deps.resolver.as_ref(), track.id()).await {
            Ok(song) => song,
            Err(err) => {
                tracing::warn!(tab_id = %tab_id, track_id = %track.id(), error = %err, "resolve failed");
                self.handle_resolve_failure(&err);
                return Err(err.into());
            }
        };

        if let Err(err) = deps.driver.play(song, queue) {
            deps.surface.notify(Notice::output_unavailable());
            return Err(err.into());
        }

        let mut state = self.lock_state();
        if !state.active {
            tracing::info!(tab_id = %tab_id, "tab is now the active player");
        }
        state.active = true;
        state.current = Some(track.clone());
        Ok(())
    }

    fn handle_resolve_failure(&self, err: &ResolveError) {
        let deps = &self.inner.deps;
        if let ResolveError::Unauthorized { reason } = err {
            deps.session.clear();
            deps.surface
                .redirect_to_login(LoginRedirect::new(&self.inner.settings.login_path, reason));
            return;
        }
        if let Some(notice) = Notice::for_resolve_error(err) {
            deps.surface.notify(notice);
        }
    }

    async fn apply_control(&self, action: ControlAction) -> Result<(), PlayError> {
        let driver = &self.inner.deps.driver;
        match action {
            ControlAction::TogglePlay => driver.control(DriverControl::PauseToggle)?,
            ControlAction::Seek { position_ms } => {
                driver.control(DriverControl::Seek { ms: position_ms })?
            }
            ControlAction::Next | ControlAction::Previous => {
                let Some(current) = self.current_track() else {
                    return Ok(());
                };
                let target = if action == ControlAction::Next {
                    self.inner.queue.next_after(current.id())
                } else {
                    self.inner.queue.previous_before(current.id())
                };
                let Some(target) = target else {
                    tracing::debug!(tab_id = %self.inner.id, ?action, "no track to move to");
                    return Ok(());
                };
                let queue = self.inner.queue.snapshot();
                self.resolve_and_play(&target, queue).await?;
            }
        }
        Ok(())
    }

    async fn run_listener(self, mut subscription: BusSubscription) {
        tracing::debug!(tab_id = %self.inner.id, channel = %self.inner.bus.channel(), "bus listener started");
        loop {
            match subscription.recv().await {
                Ok(envelope) => self.handle_message(envelope),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(tab_id = %self.inner.id, skipped, "bus listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!(tab_id = %self.inner.id, "bus listener stopped");
    }

    fn handle_message(&self, envelope: BusEnvelope) {
        let tab_id = &self.inner.id;
        let active = self.is_active();
        match envelope.message {
            BusMessage::LeaderProbe => {
                if active {
                    self.inner.bus.publish(tab_id, BusMessage::LeaderProbeResponse);
                    tracing::debug!(tab_id = %tab_id, prober = %envelope.origin, "answered probe");
                }
            }
            BusMessage::LeaderProbeResponse => {}
            BusMessage::ForwardPlay { track, queue } => {
                if !active {
                    tracing::debug!(tab_id = %tab_id, sender = %envelope.origin, "ignoring forwarded play; not the active player");
                    return;
                }
                tracing::info!(
                    tab_id = %tab_id,
                    sender = %envelope.origin,
                    track_id = %track.id(),
                    queue_len = queue.len(),
                    "playing forwarded request"
                );
                let queue = self.inner.queue.replace(&queue);
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = this.resolve_and_play(&track, queue).await {
                        tracing::warn!(
                            tab_id = %this.inner.id,
                            track_id = %track.id(),
                            error = %err,
                            "forwarded play failed"
                        );
                    }
                });
            }
            BusMessage::PlayerControl { action } => {
                if !active {
                    return;
                }
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = this.apply_control(action).await {
                        tracing::warn!(tab_id = %this.inner.id, ?action, error = %err, "forwarded control failed");
                    }
                });
            }
        }
    }
}
