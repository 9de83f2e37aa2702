//! Live stream session demo.
//!
//! Drives a session coordinator through a scripted broadcast against the
//! in-process loopback engine and prints every event as JSON.

mod loopback;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livestream_ipc::{
    command_channel, event_channel, OfflineReason, ParticipantId, ParticipantStatus, PublishSource,
    Role, SessionCommand, SessionConfig, SessionEvent,
};
use livestream_relay::{BroadcastRelay, SampleFrame, SampleTimestamp};
use livestream_session::{create_driver, MediaEngine};

use crate::loopback::LoopbackEngine;

#[derive(Parser, Debug)]
#[command(author, version, about = "Live stream session demo", long_about = None)]
struct Args {
    /// Session config as JSON (defaults to a camera and microphone broadcaster)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Delay before the loopback engine resolves join and leave
    #[arg(long, default_value = "200")]
    join_delay_ms: u64,

    /// Screen frames to relay while screen sharing
    #[arg(long, default_value = "10")]
    frames: u64,

    /// Seconds to wait for each expected event
    #[arg(long, default_value = "5")]
    event_timeout_secs: u64,
}

/// Initialize logging.
fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "livestream=debug,livestream_session=debug,livestream_relay=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    let Some(path) = path else {
        return Ok(SessionConfig::broadcaster("demo-app", "demo", ""));
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: SessionConfig = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    config
        .validate()
        .map_err(|reason| anyhow!(reason))
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

/// Caller side of the driver channels.
struct Script {
    command_tx: Sender<SessionCommand>,
    event_rx: Receiver<SessionEvent>,
    timeout: Duration,
}

impl Script {
    fn send(&self, command: SessionCommand) -> Result<()> {
        info!(command = command.name(), "Sending command");
        self.command_tx
            .send(command)
            .map_err(|e| anyhow!("Failed to send command: {}", e))
    }

    /// Print events until one matches. Failures end the script.
    fn wait_for(
        &self,
        what: &str,
        mut matches: impl FnMut(&SessionEvent) -> bool,
    ) -> Result<SessionEvent> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let event = match self.event_rx.recv_deadline(deadline) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => bail!("Timed out waiting for {}", what),
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("Driver stopped while waiting for {}", what)
                }
            };
            print_event(&event);

            if matches(&event) {
                return Ok(event);
            }
            match event {
                SessionEvent::SessionFailed { cause } => bail!("Session failed: {}", cause),
                SessionEvent::CommandFailed { command, message } => {
                    bail!("{} failed: {}", command, message)
                }
                _ => {}
            }
        }
    }
}

fn print_event(event: &SessionEvent) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!(event = event.name(), "Failed to serialize event: {}", e),
    }
}

/// Toggle screen share on, relay frames through the broadcast relay, and
/// toggle it off again.
fn share_screen(
    script: &Script,
    engine: &Arc<LoopbackEngine>,
    config: &SessionConfig,
    frames: u64,
) -> Result<()> {
    script.send(SessionCommand::UpdatePublishState {
        audio_muted: false,
        video_muted: false,
        screen_share_active: true,
    })?;
    script.wait_for("screen share", |e| {
        matches!(e, SessionEvent::PublishStateChanged(state) if state.is_publishing(PublishSource::Screen))
    })?;

    let relay = BroadcastRelay::new(engine.clone());
    relay.start().context("Failed to start broadcast relay")?;

    let params = config.screen_share;
    let payload = Bytes::from(vec![
        0x80u8;
        SampleFrame::nv12_buffer_size(params.width, params.height)
    ]);
    let started = Instant::now();
    for sequence in 0..frames {
        let frame = SampleFrame::video(
            payload.clone(),
            params.width,
            params.height,
            SampleTimestamp::now(started),
            sequence,
        );
        if sequence == frames / 2 {
            // One frame lands while paused and is dropped.
            relay.pause()?;
            relay.push(frame)?;
            relay.resume()?;
        } else {
            relay.push(frame)?;
        }
    }
    engine.tick_stats();
    relay.stop()?;

    let (ingested, bytes) = engine.ingested();
    info!(
        relayed = relay.relayed_count(),
        dropped = relay.dropped_count(),
        ingested,
        bytes,
        "Screen broadcast finished"
    );

    script.send(SessionCommand::UpdatePublishState {
        audio_muted: false,
        video_muted: false,
        screen_share_active: false,
    })?;
    script.wait_for("screen share stop", |e| {
        matches!(e, SessionEvent::PublishStateChanged(state) if !state.is_publishing(PublishSource::Screen))
    })?;
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    info!(channel = %config.credentials.channel, role = ?config.role, "Starting demo session");

    let engine = LoopbackEngine::new(Duration::from_millis(args.join_delay_ms));
    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let driver_engine: Arc<dyn MediaEngine> = engine.clone();
    let driver = thread::Builder::new()
        .name("session-driver".to_string())
        .spawn(move || {
            let mut driver = create_driver(driver_engine, command_rx, event_tx);
            driver.run();
        })
        .context("Failed to spawn driver thread")?;

    let script = Script {
        command_tx,
        event_rx,
        timeout: Duration::from_secs(args.event_timeout_secs),
    };

    script.wait_for("driver ready", |e| matches!(e, SessionEvent::Ready))?;
    script.send(SessionCommand::Configure {
        config: config.clone(),
    })?;
    script.send(SessionCommand::Join)?;
    script.wait_for("join", |e| matches!(e, SessionEvent::Joined { .. }))?;

    let (alice, bob) = (ParticipantId(1001), ParticipantId(1002));
    engine.remote_joined(alice);
    engine.remote_joined(bob);
    script.wait_for("second participant", |e| {
        matches!(e, SessionEvent::ParticipantChanged { id, .. } if *id == bob)
    })?;
    engine.remote_left(alice, OfflineReason::Quit);
    script.wait_for("participant leave", |e| {
        matches!(
            e,
            SessionEvent::ParticipantChanged { id, status: ParticipantStatus::Offline { .. } } if *id == alice
        )
    })?;

    if config.role == Role::Broadcaster {
        script.send(SessionCommand::UpdatePublishState {
            audio_muted: true,
            video_muted: false,
            screen_share_active: false,
        })?;
        script.wait_for("mute", |e| {
            matches!(e, SessionEvent::PublishStateChanged(state) if state.audio_muted)
        })?;
        script.send(SessionCommand::UpdatePublishState {
            audio_muted: false,
            video_muted: false,
            screen_share_active: false,
        })?;
        script.wait_for("unmute", |e| {
            matches!(e, SessionEvent::PublishStateChanged(state) if !state.audio_muted)
        })?;

        if config.publish.video {
            script.send(SessionCommand::SwitchCamera)?;
            script.wait_for("camera switch", |e| {
                matches!(e, SessionEvent::PublishStateChanged(_))
            })?;
        }

        share_screen(&script, &engine, &config, args.frames)?;
    } else {
        info!("Audience session, skipping publish changes");
    }

    engine.tick_stats();
    script.wait_for("stats", |e| matches!(e, SessionEvent::Stats(_)))?;

    script.send(SessionCommand::GetState)?;
    script.wait_for("snapshot", |e| matches!(e, SessionEvent::Snapshot(_)))?;

    script.send(SessionCommand::Leave)?;
    script.wait_for("leave", |e| matches!(e, SessionEvent::Left { .. }))?;
    script.send(SessionCommand::Shutdown)?;
    script.wait_for("shutdown", |e| matches!(e, SessionEvent::Shutdown))?;

    driver
        .join()
        .map_err(|_| anyhow!("Session driver thread panicked"))?;
    info!("Demo finished");
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    run(Args::parse())
}
