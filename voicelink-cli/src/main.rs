mod logging;

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use voicelink_engine::{OrchestratorSettings, SessionOrchestrator, SessionReport};
use voicelink_runtime::credentials::{
    env_lookup, realtime_connect_config, resolve_api_key, resolve_session_config,
};
use voicelink_runtime::{AppConfig, ConfigStore, LineApprovalGate, RealtimeAgentConnector};

const USAGE: &str = "\
usage: voicelink [--write-config] [--list-devices]

  --write-config   write the effective configuration to the config file and exit
  --list-devices   print the available microphones and exit

Environment:
  OPENAI_API_KEY     required
  VOICELINK_CONFIG   config file (default: voicelink.json)
  RUST_LOG           log filter (default: info)";

enum Command {
    Run,
    WriteConfig,
    ListDevices,
}

fn parse_args() -> anyhow::Result<Option<Command>> {
    let mut cmd = Command::Run;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--write-config" => cmd = Command::WriteConfig,
            "--list-devices" => cmd = Command::ListDevices,
            "-h" | "--help" => {
                println!("{USAGE}");
                return Ok(None);
            }
            other => anyhow::bail!("unknown argument: {other}\n\n{USAGE}"),
        }
    }
    Ok(Some(cmd))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let Some(cmd) = parse_args()? else {
        return Ok(());
    };

    let store = ConfigStore::from_env(env_lookup);
    let cfg = store.load_or_default()?;

    match cmd {
        Command::WriteConfig => {
            store.save(&cfg)?;
            println!("Wrote {}", store.path().display());
            Ok(())
        }
        Command::ListDevices => list_devices(),
        Command::Run => run_session(cfg).await,
    }
}

async fn run_session(cfg: AppConfig) -> anyhow::Result<()> {
    let api_key = resolve_api_key(env_lookup)?;
    let session = resolve_session_config(&cfg.session, env_lookup)?;
    let connect = realtime_connect_config(&cfg.agent, api_key)?;

    let settings = OrchestratorSettings {
        approval_timeout: Duration::from_secs(cfg.agent.approval_timeout_secs.max(1)),
        playback_queue_frames: cfg.audio.playback_queue_frames.max(1),
        ..OrchestratorSettings::default()
    };

    let gate = LineApprovalGate::stdio().context("open approval input")?;
    let orchestrator = SessionOrchestrator::new(
        session,
        settings,
        Arc::new(RealtimeAgentConnector::new(connect)),
        Arc::new(gate),
    );
    let orchestrator = attach_devices(orchestrator, &cfg)?;

    log::info!("Starting session (Ctrl+C to stop)");
    let report = orchestrator
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    log_report(&report);
    Ok(())
}

#[cfg(feature = "cpal")]
fn attach_devices(
    mut orchestrator: SessionOrchestrator,
    cfg: &AppConfig,
) -> anyhow::Result<SessionOrchestrator> {
    use voicelink_audio::{AudioCapture, CpalInput, CpalOutput};

    let audio = &cfg.audio;
    if audio.capture_enabled {
        let input = CpalInput::open_named(audio.input_device.as_deref());
        orchestrator = orchestrator.with_capture(AudioCapture::new(
            Box::new(input),
            audio.capture_queue_frames.max(1),
        ));
    }
    if audio.playback_enabled {
        let output = CpalOutput::open_named(audio.output_device.as_deref())
            .context("open output device")?;
        orchestrator = orchestrator.with_playback(Box::new(output));
    }
    Ok(orchestrator)
}

#[cfg(not(feature = "cpal"))]
fn attach_devices(
    orchestrator: SessionOrchestrator,
    cfg: &AppConfig,
) -> anyhow::Result<SessionOrchestrator> {
    if cfg.audio.capture_enabled || cfg.audio.playback_enabled {
        log::warn!("Built without audio device support; running without microphone or speaker");
    }
    Ok(orchestrator)
}

#[cfg(feature = "cpal")]
fn list_devices() -> anyhow::Result<()> {
    let names = voicelink_audio::device::list_input_device_names();
    if names.is_empty() {
        println!("No input devices found");
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

#[cfg(not(feature = "cpal"))]
fn list_devices() -> anyhow::Result<()> {
    anyhow::bail!("built without audio device support (enable the `cpal` feature)")
}

fn log_report(report: &SessionReport) {
    log::info!(
        "Session ended ({}) after {} ms",
        report.end_reason.label(),
        report.duration_ms
    );
    log::info!(
        "Microphone: sent={} dropped={} send_failures={}",
        report.frames_sent,
        report.capture_frames_dropped,
        report.send_failures
    );
    log::info!(
        "Speaker: played={} write_failures={} bad_deltas={}",
        report.frames_played,
        report.playback_write_failures,
        report.delta_decode_failures
    );
    log::info!(
        "Tools: acknowledged={} approved={} denied={}",
        report.tool_calls_acknowledged,
        report.approvals_granted,
        report.approvals_denied
    );
}
