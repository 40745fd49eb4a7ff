//! Simulation runtime.
//!
//! Wires several tabs onto one bus and drives them through a scripted list of
//! user actions, logging what each tab ends up doing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use player_bus_types::{ControlAction, PlayRequest, TrackId, TrackProjection};

use crate::bus::TabId;
use crate::cli::Args;
use crate::config::{
    TabPlayerConfig, api_base_url_from_config, bus_from_config, catalog_from_config,
    coordinator_settings_from_config, request_timeout_from_config, session_from_config,
};
use crate::coordinator::{ControlOutcome, ListenerHandle, PlayOutcome, TabCoordinator, TabDeps};
use crate::driver::spawn_driver;
use crate::resolver::{HttpSongResolver, SongResolver, StaticResolver};
use crate::surface::LogSurface;

/// One scripted user action in one tab (tabs are numbered from 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub tab: usize,
    pub action: StepAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    Play {
        track: TrackId,
        queue: Option<Vec<TrackId>>,
    },
    Control(ControlAction),
    /// Close the tab: its listener stops and it takes no further steps.
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepReport {
    Play(PlayOutcome),
    Control(ControlOutcome),
    Closed,
    /// The step targeted a tab that was already closed.
    Skipped,
}

/// Parse `TAB:ACTION` where ACTION is a track id (optionally `@id,id,..` for
/// the queue), `toggle`, `next`, `prev`, `seek=MS` or `close`.
pub fn parse_step(raw: &str) -> Result<Step> {
    let (tab, action) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("step {raw:?} must look like TAB:ACTION"))?;
    let tab: usize = tab
        .trim()
        .parse()
        .with_context(|| format!("invalid tab number in step {raw:?}"))?;
    if tab == 0 {
        return Err(anyhow!("tabs are numbered from 1 in step {raw:?}"));
    }
    let action = action.trim();
    let action = match action.to_ascii_lowercase().as_str() {
        "toggle" => StepAction::Control(ControlAction::TogglePlay),
        "next" => StepAction::Control(ControlAction::Next),
        "prev" | "previous" => StepAction::Control(ControlAction::Previous),
        "close" => StepAction::Close,
        lower if lower.starts_with("seek=") => {
            let position_ms = lower["seek=".len()..]
                .parse()
                .with_context(|| format!("invalid seek position in step {raw:?}"))?;
            StepAction::Control(ControlAction::Seek { position_ms })
        }
        _ => parse_play(action),
    };
    Ok(Step { tab, action })
}

fn parse_play(action: &str) -> StepAction {
    match action.split_once('@') {
        Some((track, queue)) => StepAction::Play {
            track: TrackId::new(track),
            queue: Some(
                queue
                    .split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(TrackId::new)
                    .collect(),
            ),
        },
        None => StepAction::Play {
            track: TrackId::new(action),
            queue: None,
        },
    }
}

/// A simulated tab and its running listener.
pub struct SimTab {
    pub coordinator: TabCoordinator,
    listener: Option<ListenerHandle>,
}

impl SimTab {
    fn close(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.coordinator.shutdown(listener);
        }
    }

    /// Open while the listener runs; a listener ends early only if the bus closed.
    fn is_open(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|listener| !listener.is_finished())
    }
}

/// Everything the tabs share: the bus, the resolver and the catalog metadata.
pub struct Simulation {
    tabs: Vec<SimTab>,
    known_tracks: HashMap<TrackId, TrackProjection>,
    step_delay: Duration,
}

impl Simulation {
    /// Build `tab_count` tabs from config. Must be called inside a tokio runtime.
    pub fn build(
        cfg: &TabPlayerConfig,
        tab_count: usize,
        probe_timeout_override_ms: Option<u64>,
        step_delay: Duration,
    ) -> Result<Self> {
        if tab_count == 0 {
            return Err(anyhow!("at least one tab is required"));
        }
        let settings = coordinator_settings_from_config(cfg, probe_timeout_override_ms)?;
        let bus = bus_from_config(cfg);
        tracing::debug!(
            probe_timeout_ms = settings.probe_timeout.as_millis() as u64,
            login_path = %settings.login_path,
            "coordinator settings"
        );
        let session = session_from_config(cfg);
        let catalog = catalog_from_config(cfg);
        let known_tracks = catalog
            .iter()
            .map(|entry| (entry.track.id().clone(), entry.track.clone()))
            .collect();

        let resolver: Arc<dyn SongResolver> = match api_base_url_from_config(cfg) {
            Some(base_url) => {
                tracing::info!(base_url = %base_url, "resolving songs over http");
                Arc::new(HttpSongResolver::new(
                    &base_url,
                    request_timeout_from_config(cfg),
                    session.clone(),
                )?)
            }
            None => {
                let resolver = StaticResolver::new(catalog);
                if resolver.is_empty() {
                    tracing::warn!("no api_base_url and an empty catalog; every play will fail");
                }
                tracing::info!(count = resolver.len(), "resolving songs from static catalog");
                Arc::new(resolver)
            }
        };

        let tabs = (1..=tab_count)
            .map(|n| {
                let id = TabId::generate();
                let label = format!("tab-{n}");
                tracing::info!(tab = %label, tab_id = %id, channel = %bus.channel(), "opening tab");
                let coordinator = TabCoordinator::new(
                    id,
                    bus.clone(),
                    settings.clone(),
                    TabDeps {
                        resolver: resolver.clone(),
                        driver: Arc::new(spawn_driver(label.clone())),
                        surface: Arc::new(LogSurface::new(label)),
                        session: session.clone(),
                    },
                );
                let listener = Some(coordinator.start_listener());
                SimTab {
                    coordinator,
                    listener,
                }
            })
            .collect();

        Ok(Self {
            tabs,
            known_tracks,
            step_delay,
        })
    }

    pub fn tabs(&self) -> &[SimTab] {
        &self.tabs
    }

    fn projection(&self, id: &TrackId) -> TrackProjection {
        self.known_tracks
            .get(id)
            .cloned()
            .unwrap_or_else(|| TrackProjection::new(id.clone(), "", "", None))
    }

    /// Run one step and report what happened.
    pub async fn run_step(&mut self, step: &Step) -> Result<StepReport> {
        let tab_count = self.tabs.len();
        if step.tab > tab_count {
            return Err(anyhow!("step targets tab {} but only {tab_count} are open", step.tab));
        }
        let index = step.tab - 1;
        if !self.tabs[index].is_open() {
            tracing::warn!(tab = step.tab, "tab already closed; skipping step");
            return Ok(StepReport::Skipped);
        }

        let report = match &step.action {
            StepAction::Play { track, queue } => {
                let track = self.projection(track);
                let request = match queue {
                    Some(ids) => PlayRequest::with_queue(
                        track,
                        ids.iter().map(|id| self.projection(id)).collect(),
                    ),
                    None => PlayRequest::single(track),
                };
                StepReport::Play(self.tabs[index].coordinator.request_play(request).await)
            }
            StepAction::Control(action) => {
                StepReport::Control(self.tabs[index].coordinator.request_control(*action).await)
            }
            StepAction::Close => {
                self.tabs[index].close();
                StepReport::Closed
            }
        };
        tracing::info!(tab = step.tab, ?report, "step finished");
        Ok(report)
    }

    /// Run every step in order, pausing between them.
    pub async fn run(&mut self, steps: &[Step]) -> Result<Vec<StepReport>> {
        let mut reports = Vec::with_capacity(steps.len());
        for step in steps {
            reports.push(self.run_step(step).await?);
            tokio::time::sleep(self.step_delay).await;
        }
        self.log_summary();
        Ok(reports)
    }

    fn log_summary(&self) {
        for (n, tab) in self.tabs.iter().enumerate() {
            let coordinator = &tab.coordinator;
            tracing::info!(
                tab = n + 1,
                tab_id = %coordinator.id(),
                open = tab.is_open(),
                active = coordinator.is_active(),
                current = ?coordinator.current_track().map(|t| t.id().to_string()),
                queue = ?coordinator.queue().iter().map(|t| t.id().to_string()).collect::<Vec<_>>(),
                "tab summary"
            );
        }
    }
}

/// Load config the way the binary does: explicit path, else `config.toml` next
/// to the executable, else defaults.
pub fn load_config(path: Option<&std::path::Path>) -> Result<TabPlayerConfig> {
    if let Some(path) = path {
        return TabPlayerConfig::load(path);
    }
    let auto_path = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("config.toml")));
    match auto_path {
        Some(path) if path.exists() => {
            tracing::info!(path = %path.display(), "loading config next to binary");
            TabPlayerConfig::load(&path)
        }
        _ => Ok(TabPlayerConfig::default()),
    }
}

/// Entry point used by `main`.
pub async fn run(args: Args) -> Result<()> {
    let cfg = load_config(args.config.as_deref())?;
    let steps = args
        .steps
        .iter()
        .map(|raw| parse_step(raw))
        .collect::<Result<Vec<_>>>()?;
    if steps.is_empty() {
        tracing::warn!("no steps given; nothing to do");
        return Ok(());
    }
    tracing::info!(tabs = args.tabs, steps = steps.len(), "starting simulation");
    let mut sim = Simulation::build(
        &cfg,
        args.tabs,
        args.probe_timeout_ms,
        Duration::from_millis(args.step_delay_ms),
    )?;
    sim.run(&steps).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_config() -> TabPlayerConfig {
        toml::from_str(
            r#"
            probe_timeout_ms = 50

            [[catalog]]
            id = 1
            title = "One"
            stream_id = "s1"

            [[catalog]]
            id = 2
            title = "Two"
            stream_id = "s2"

            [[catalog]]
            id = 3
            title = "Three"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn parse_step_accepts_plays_and_controls() {
        assert_eq!(
            parse_step("1:42").unwrap(),
            Step {
                tab: 1,
                action: StepAction::Play {
                    track: TrackId::from(42),
                    queue: None
                }
            }
        );
        assert_eq!(
            parse_step("2:7@5, 6,7").unwrap().action,
            StepAction::Play {
                track: TrackId::from(7),
                queue: Some(vec![TrackId::from(5), TrackId::from(6), TrackId::from(7)])
            }
        );
        assert_eq!(
            parse_step("1:Next").unwrap().action,
            StepAction::Control(ControlAction::Next)
        );
        assert_eq!(
            parse_step("3:seek=1500").unwrap().action,
            StepAction::Control(ControlAction::Seek { position_ms: 1500 })
        );
        assert_eq!(parse_step("2:close").unwrap().action, StepAction::Close);
    }

    #[test]
    fn parse_step_keeps_malformed_track_ids() {
        let step = parse_step("1:abc").unwrap();
        assert_eq!(
            step.action,
            StepAction::Play {
                track: TrackId::from("abc"),
                queue: None
            }
        );
    }

    #[test]
    fn parse_step_rejects_bad_tabs() {
        assert!(parse_step("42").is_err());
        assert!(parse_step("0:1").is_err());
        assert!(parse_step("x:1").is_err());
        assert!(parse_step("1:seek=soon").is_err());
    }

    #[test]
    fn load_config_defaults_without_file() {
        let cfg = load_config(None).unwrap();
        assert!(coordinator_settings_from_config(&cfg, None).is_ok());
    }

    #[tokio::test]
    async fn second_tab_forwards_to_first() {
        let cfg = catalog_config();
        let mut sim = Simulation::build(&cfg, 2, None, Duration::from_millis(20)).unwrap();
        let steps = vec![parse_step("1:1").unwrap(), parse_step("2:2").unwrap()];

        let reports = sim.run(&steps).await.unwrap();

        assert_eq!(reports[0], StepReport::Play(PlayOutcome::Played { promoted: true }));
        assert_eq!(reports[1], StepReport::Play(PlayOutcome::Forwarded));
        let first = &sim.tabs()[0].coordinator;
        assert!(first.is_active());
        assert!(!sim.tabs()[1].coordinator.is_active());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(first.current_track().unwrap().title(), "Two");
    }

    #[tokio::test]
    async fn closing_the_active_tab_hands_over_playback() {
        let cfg = catalog_config();
        let mut sim = Simulation::build(&cfg, 2, None, Duration::from_millis(20)).unwrap();
        let steps = vec![
            parse_step("1:1").unwrap(),
            parse_step("1:close").unwrap(),
            parse_step("2:2").unwrap(),
            parse_step("1:1").unwrap(),
        ];

        let reports = sim.run(&steps).await.unwrap();

        assert_eq!(reports[1], StepReport::Closed);
        assert_eq!(reports[2], StepReport::Play(PlayOutcome::Played { promoted: true }));
        assert_eq!(reports[3], StepReport::Skipped);
        let active = sim
            .tabs()
            .iter()
            .filter(|tab| tab.coordinator.is_active())
            .count();
        assert_eq!(active, 1);
        assert!(sim.tabs()[1].coordinator.is_active());
        assert!(sim.tabs()[0].coordinator.current_track().is_none());
        assert!(!sim.tabs()[0].is_open());
    }

    #[tokio::test]
    async fn unprocessed_track_fails_locally() {
        let cfg = catalog_config();
        let mut sim = Simulation::build(&cfg, 1, None, Duration::from_millis(1)).unwrap();

        let report = sim.run_step(&parse_step("1:3").unwrap()).await.unwrap();

        assert!(matches!(
            report,
            StepReport::Play(PlayOutcome::LocalFailed { promoted: true, .. })
        ));
        assert!(!sim.tabs()[0].coordinator.is_active());
    }

    #[tokio::test]
    async fn out_of_range_tab_is_an_error() {
        let cfg = catalog_config();
        let mut sim = Simulation::build(&cfg, 1, None, Duration::from_millis(1)).unwrap();
        assert!(sim.run_step(&parse_step("2:1").unwrap()).await.is_err());
        assert!(Simulation::build(&cfg, 0, None, Duration::from_millis(1)).is_err());
    }
}
