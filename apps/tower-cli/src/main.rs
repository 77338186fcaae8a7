mod sim;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use glam::Vec3;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use tower_common::{Color, UserId};
use tower_flow::{FlowController, FlowEvent, FlowState, Identity, TowerConfig};
use tower_kernel::{NewCube, RemoteAck};
use tower_persist::{
    FeedMessage, FileRemote, MemoryRemote, RemoteError, RemoteStore, Subscription, SubscriptionId,
};
use tower_tools::{CubeInfo, TowerInspector, TowerSummary};

use crate::sim::{SplitMix64, StackSim};

/// Fixed simulation step.
const DT: f32 = 1.0 / 60.0;
/// Longest any single phase of a drop may take before the session gives up.
const PHASE_TIMEOUT_SECS: f32 = 30.0;
/// Save attempts per drop before it is abandoned.
const MAX_SAVE_ATTEMPTS: u32 = 3;

#[derive(Parser)]
#[command(name = "tower-cli", about = "Headless driver for the shared tower")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML config overriding the default settle, camera and flow tunables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and the effective configuration
    Info,
    /// Run scripted drop sessions against toy physics
    Simulate {
        /// Number of cubes to drop
        #[arg(short, long, default_value = "5")]
        drops: u32,
        /// RNG seed for colors and drop positions
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// Persist to a file-backed store here instead of memory
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Make the first N appends fail, to exercise retry
        #[arg(long, default_value = "0")]
        fail_first: u32,
        /// Print the final state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load a file-backed store and print every cube
    Inspect {
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Check a file-backed store's hash chain and schema
    Verify {
        #[arg(long)]
        data_dir: PathBuf,
    },
}

/// Final state printed by `simulate` and `inspect`.
#[derive(Serialize)]
struct Report {
    summary: TowerSummary,
    cubes: Vec<CubeInfo>,
}

impl Report {
    fn capture(flow: &FlowController) -> Self {
        Self {
            summary: TowerInspector::summary(flow),
            cubes: TowerInspector::list_cubes(flow),
        }
    }

    fn print(&self, json: bool) -> anyhow::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(self)?);
        } else {
            println!("{}", self.summary);
            for cube in &self.cubes {
                println!("  {cube}");
            }
        }
        Ok(())
    }
}

/// Remote wrapper that fails its first appends.
struct Flaky<R> {
    inner: R,
    failures: u32,
}

impl<R: RemoteStore> RemoteStore for Flaky<R> {
    fn subscribe(&mut self) -> Subscription {
        self.inner.subscribe()
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.inner.unsubscribe(id);
    }

    fn append(&mut self, cube: NewCube) -> Result<RemoteAck, RemoteError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(RemoteError::Unavailable("injected failure".into()));
        }
        self.inner.append(cube)
    }
}

/// One headless client: controller, toy physics and a feed subscription.
struct Session<'r> {
    flow: FlowController,
    sim: StackSim,
    remote: &'r mut dyn RemoteStore,
    feed: Subscription,
}

impl<'r> Session<'r> {
    fn new(config: TowerConfig, remote: &'r mut dyn RemoteStore) -> Self {
        let feed = remote.subscribe();
        let mut session = Self {
            flow: FlowController::new(config),
            sim: StackSim::new(),
            remote,
            feed,
        };
        session.pump_feed();
        session
    }

    fn pump_feed(&mut self) {
        for message in self.feed.drain() {
            match message {
                FeedMessage::Snapshot(list, meta) => {
                    tracing::debug!(len = list.len(), sequence = meta.sequence, "feed snapshot");
                    self.flow.on_remote_snapshot(list);
                }
                FeedMessage::Error(message) => self.flow.on_remote_error(message),
            }
        }
    }

    fn frame(&mut self) {
        self.sim.sync(&self.flow);
        self.sim.step(DT);
        self.flow.update(DT, &mut self.sim);
        self.pump_feed();
        for event in self.flow.drain_events() {
            match event {
                FlowEvent::Saved { id, remote_id } => {
                    tracing::info!(id = %id.short(), %remote_id, "cube saved");
                }
                FlowEvent::SaveFailed { id, message } => {
                    tracing::warn!(id = %id.short(), %message, "save failed");
                }
                FlowEvent::FlowAborted { id } => {
                    tracing::warn!(id = ?id.map(|i| i.short()), "flow aborted");
                }
                other => tracing::debug!(event = ?other, "flow"),
            }
        }
    }

    fn run_for(&mut self, secs: f32) {
        for _ in 0..(secs / DT).ceil() as usize {
            self.frame();
        }
    }

    fn run_until(&mut self, state: FlowState) -> anyhow::Result<()> {
        let mut elapsed = 0.0;
        while self.flow.state() != state {
            if elapsed > PHASE_TIMEOUT_SECS {
                bail!("timed out waiting for {state:?}, stuck in {:?}", self.flow.state());
            }
            self.frame();
            elapsed += DT;
        }
        Ok(())
    }

    /// Hand any queued append to the remote and report the outcome.
    fn flush_saves(&mut self) -> anyhow::Result<()> {
        if let Some(request) = self.flow.take_save_request() {
            let result = self
                .remote
                .append(request.cube)
                .map_err(|err| err.to_string());
            self.flow.on_save_result(request.local_id, result)?;
            self.pump_feed();
        }
        Ok(())
    }

    /// One visitor's full drop. Returns whether the cube was saved.
    fn drop_one(&mut self, n: u32, rng: &mut SplitMix64) -> anyhow::Result<bool> {
        let _span = tracing::info_span!("drop", n).entered();
        self.flow.enter_placement()?;
        self.run_until(FlowState::AwaitingDrop)?;

        let color = Color::rgb(
            (rng.next_u64() & 0xff) as u8,
            (rng.next_u64() & 0xff) as u8,
            (rng.next_u64() & 0xff) as u8,
        );
        let height = self.flow.settle().tower_height();
        let position = Vec3::new(rng.jitter(0.3), height + 6.0, rng.jitter(0.3));
        let visitor = UserId(format!("visitor-{n}"));
        self.flow
            .drop_cube(color, position, Some(visitor.clone()), &mut self.sim)?;
        self.run_until(FlowState::EditingIdentity)?;

        self.flow.submit_identity(Some(Identity {
            user_id: Some(visitor),
            display_name: Some(format!("Visitor {n}")),
        }))?;
        let mut attempts = 1;
        loop {
            self.flush_saves()?;
            match self.flow.state() {
                FlowState::Synced => break,
                FlowState::Error if attempts < MAX_SAVE_ATTEMPTS => {
                    attempts += 1;
                    self.flow.retry_save()?;
                }
                FlowState::Error => {
                    self.flow.abandon();
                    return Ok(false);
                }
                FlowState::Saving => self.frame(),
                other => bail!("unexpected state {other:?} while saving"),
            }
        }
        self.flow.dismiss();
        Ok(true)
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TowerConfig> {
    match path {
        Some(path) => TowerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(TowerConfig::default()),
    }
}

fn simulate(
    config: TowerConfig,
    remote: &mut dyn RemoteStore,
    drops: u32,
    seed: u64,
    json: bool,
) -> anyhow::Result<()> {
    let mut rng = SplitMix64::new(seed);
    let mut session = Session::new(config, remote);
    session.run_for(0.5);

    let mut saved = 0;
    for n in 0..drops {
        if session.drop_one(n, &mut rng)? {
            saved += 1;
        }
        session.run_for(1.0);
        session.flow.store().check_invariants()?;
    }
    session.run_for(2.0);
    tracing::info!(drops, saved, "session finished");

    Report::capture(&session.flow).print(json)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("tower-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("effective config:");
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Commands::Simulate {
            drops,
            seed,
            data_dir,
            fail_first,
            json,
        } => {
            println!("Simulating {drops} drops: seed={seed}");
            match data_dir {
                Some(dir) => {
                    let inner = FileRemote::open(&dir)
                        .with_context(|| format!("opening store at {}", dir.display()))?;
                    let mut remote = Flaky {
                        inner,
                        failures: fail_first,
                    };
                    simulate(config, &mut remote, drops, seed, json)?;
                }
                None => {
                    let mut remote = Flaky {
                        inner: MemoryRemote::new(),
                        failures: fail_first,
                    };
                    simulate(config, &mut remote, drops, seed, json)?;
                }
            }
        }
        Commands::Inspect { data_dir, json } => {
            let mut remote = FileRemote::open(&data_dir)
                .with_context(|| format!("opening store at {}", data_dir.display()))?;
            let mut session = Session::new(config, &mut remote);
            // Let restored cubes register and settle so heights are known.
            session.run_for(0.5);
            Report::capture(&session.flow).print(json)?;
        }
        Commands::Verify { data_dir } => {
            let remote = FileRemote::open(&data_dir)
                .with_context(|| format!("opening store at {}", data_dir.display()))?;
            remote.verify_integrity()?;
            let head = remote
                .manifest()
                .entries
                .last()
                .map_or("-", |e| e.sha256.as_str());
            println!(
                "OK: {} segments, schema v{}/v{}, head={}",
                remote.meta().segment_count,
                remote.meta().store_schema_version,
                remote.meta().document_schema_version,
                head
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> TowerConfig {
        TowerConfig::default()
    }

    #[test]
    fn session_saves_every_drop() {
        let mut remote = MemoryRemote::new();
        let mut rng = SplitMix64::new(3);
        let mut session = Session::new(quiet_config(), &mut remote);
        for n in 0..3 {
            assert!(session.drop_one(n, &mut rng).unwrap());
            session.run_for(1.0);
        }
        session.run_for(2.0);
        let summary = TowerInspector::summary(&session.flow);
        assert_eq!(summary.synced, 3);
        assert!(summary.active_flow.is_none());
        assert!(summary.tower_height >= 1.0);
        drop(session);
        assert_eq!(remote.len(), 3);
    }

    #[test]
    fn failed_appends_are_retried() {
        let mut remote = Flaky {
            inner: MemoryRemote::new(),
            failures: 2,
        };
        let mut rng = SplitMix64::new(9);
        let mut session = Session::new(quiet_config(), &mut remote);
        assert!(session.drop_one(0, &mut rng).unwrap());
        assert_eq!(session.flow.state(), FlowState::Idle);
        drop(session);
        assert_eq!(remote.inner.len(), 1);
    }

    #[test]
    fn persistent_failure_abandons_the_drop() {
        let mut remote = Flaky {
            inner: MemoryRemote::new(),
            failures: MAX_SAVE_ATTEMPTS,
        };
        let mut rng = SplitMix64::new(9);
        let mut session = Session::new(quiet_config(), &mut remote);
        assert!(!session.drop_one(0, &mut rng).unwrap());
        assert!(session.flow.store().is_empty());
        assert!(session.flow.store().check_invariants().is_ok());
    }

    #[test]
    fn file_store_round_trips_through_inspect() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut remote = FileRemote::open(tmp.path()).unwrap();
            simulate(quiet_config(), &mut remote, 2, 1, false).unwrap();
        }
        let mut remote = FileRemote::open(tmp.path()).unwrap();
        let mut session = Session::new(quiet_config(), &mut remote);
        session.run_for(0.5);
        let report = Report::capture(&session.flow);
        assert_eq!(report.summary.synced, 2);
        assert!(report.cubes.iter().all(|c| c.display_name.is_some()));
    }

    #[test]
    fn config_file_is_applied() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "flow:\n  settle_timeout_secs: 3.0\n").unwrap();
        let config = load_config(Some(tmp.path())).unwrap();
        assert_eq!(config.flow.settle_timeout_secs, 3.0);
        assert!(load_config(Some(Path::new("/nonexistent/tower.yaml"))).is_err());
    }
}
