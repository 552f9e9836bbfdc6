//! Samm CLI: local-microphone voice assistant with barge-in.
//!
//! Usage:
//!   cargo run -p samm-voice                              # real microphone and speaker
//!   cargo run -p samm-voice -- --simulate                # offline, simulated devices
//!   cargo run -p samm-voice -- --devices                 # list audio devices
//!   cargo run -p samm-voice -- --test-mic [--duration 5] # record, archive, play back
//!
//! Configuration: config/samm.toml (or SAMM_CONFIG), SAMM_<SECTION>__<KEY> env overrides,
//! OPENAI_API_KEY for the speech and chat services.

use anyhow::Context;
use samm_voice::config::PlaybackBackend;
use samm_voice::sim::{AmplitudeProfile, SimClock, SimInput, SimOutput};
use samm_voice::{
    create_best_reply, create_best_stt, create_best_tts, install_ctrl_c_handler,
    list_input_devices, list_output_devices, mean_abs_amplitude, AudioCapture, AudioOutput,
    CancelFlag, ClipArchive, ClipKind, Clock, Collaborators, CommandOutput, ConversationLoop,
    CpalInput, Devices, KeywordReply, MonotonicClock, RodioOutput, ScriptedStt, SilentTts,
    VoiceConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

enum Mode {
    Converse,
    Simulate,
    Devices,
    TestMic { duration: Option<f32> },
    Help,
}

fn parse_args() -> Mode {
    let mut args = std::env::args().skip(1);
    let mut mode = Mode::Converse;
    while let Some(a) = args.next() {
        match a.as_str() {
            "--simulate" => mode = Mode::Simulate,
            "--devices" => mode = Mode::Devices,
            "--test-mic" => mode = Mode::TestMic { duration: None },
            "--duration" => {
                let d = args.next().and_then(|d| d.parse().ok());
                if let Mode::TestMic { duration } = &mut mode {
                    *duration = d;
                }
            }
            "--help" | "-h" => mode = Mode::Help,
            other => warn!("Ignoring unknown argument {}", other),
        }
    }
    mode
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mode = parse_args();
    if let Mode::Help = mode {
        eprintln!("Samm: Absher voice assistant");
        eprintln!("  (no flags)          Talk to Samm through the default microphone and speaker");
        eprintln!("  --simulate          Run a scripted session on simulated devices");
        eprintln!("  --devices           List input and output devices");
        eprintln!("  --test-mic          Record a clip (with countdown), archive it and play it back");
        eprintln!("  --duration N        Recording length for --test-mic in seconds");
        return Ok(());
    }

    let config = VoiceConfig::load().context("loading configuration")?;

    match mode {
        Mode::Devices => show_devices(),
        Mode::TestMic { duration } => test_mic(&config, duration),
        Mode::Simulate => simulate(&config),
        Mode::Converse => converse(&config),
        Mode::Help => Ok(()),
    }
}

fn show_devices() -> anyhow::Result<()> {
    println!("🎤 Input devices:");
    for name in list_input_devices()? {
        println!("  - {}", name);
    }
    println!("🔊 Output devices:");
    for name in list_output_devices()? {
        println!("  - {}", name);
    }
    Ok(())
}

fn output_for(config: &VoiceConfig) -> Box<dyn AudioOutput> {
    match config.playback.backend {
        PlaybackBackend::Rodio => Box::new(RodioOutput::new()),
        PlaybackBackend::Command => Box::new(CommandOutput::new(
            config.playback.command.clone(),
            config.playback.args.clone(),
        )),
    }
}

fn converse(config: &VoiceConfig) -> anyhow::Result<()> {
    let cancel = CancelFlag::new();
    install_ctrl_c_handler(cancel.clone()).context("installing Ctrl+C handler")?;

    let collaborators = Collaborators {
        stt: Arc::from(create_best_stt(config)),
        tts: Arc::from(create_best_tts(config)),
        replies: Arc::from(create_best_reply(config)),
    };
    let devices = Devices {
        input: Box::new(CpalInput::new()),
        output: output_for(config),
    };

    let mut session = ConversationLoop::new(
        config,
        devices,
        collaborators,
        Arc::new(MonotonicClock::new()),
        cancel,
    )?;
    let summary = session.run();
    println!(
        "Session {}: {} turns, {} retries, {} interruptions ({:?})",
        summary.session, summary.turns, summary.retries, summary.interruptions, summary.ended_by
    );
    Ok(())
}

/// Scripted session: a greeting, one question, a reply the user talks over, then goodbye.
fn simulate(config: &VoiceConfig) -> anyhow::Result<()> {
    let clock = SimClock::new();
    let input = SimInput::new(clock.clone());
    // Mic opens: greeting playback, first recording, first reply playback (interrupted).
    input.push_profile(AmplitudeProfile::silent());
    input.push_profile(AmplitudeProfile::silent());
    input.push_profile(
        AmplitudeProfile::silent().burst(Duration::from_millis(1200), Duration::from_millis(900), 0.2),
    );
    let output = SimOutput::new(clock.clone());

    let stt = ScriptedStt::with_texts(["السلام عليكم", "كم رصيد المحفظة؟", "شكراً"]);
    let collaborators = Collaborators {
        stt: Arc::new(stt),
        tts: Arc::new(SilentTts::new(config.audio.sample_rate)),
        replies: Arc::new(KeywordReply::new()),
    };
    let devices = Devices {
        input: Box::new(input),
        output: Box::new(output.clone()),
    };

    let mut sim_config = config.clone();
    sim_config.archive.enabled = false;
    let mut session = ConversationLoop::new(
        &sim_config,
        devices,
        collaborators,
        Arc::new(clock.clone()),
        CancelFlag::new(),
    )?;
    let summary = session.run();

    for turn in &summary.history {
        println!("{:>9}: {}", turn.role.as_str(), turn.text);
    }
    println!(
        "Simulated {:.1}s: {} turns, {} retries, {} interruptions, {} playbacks ({:?})",
        clock.now().as_secs_f32(),
        summary.turns,
        summary.retries,
        summary.interruptions,
        output.events().len() - output.terminations(),
        summary.ended_by
    );
    Ok(())
}

fn test_mic(config: &VoiceConfig, duration: Option<f32>) -> anyhow::Result<()> {
    let cancel = CancelFlag::new();
    install_ctrl_c_handler(cancel.clone()).context("installing Ctrl+C handler")?;
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());

    let duration = duration
        .filter(|d| *d > 0.0)
        .map(Duration::from_secs_f32)
        .unwrap_or_else(|| config.audio.capture_duration());
    let capture = AudioCapture::new(&config.audio, Arc::clone(&clock), cancel.clone());
    let clip = capture.capture(&CpalInput::new(), duration, config.audio.sample_rate, true)?;

    let level = mean_abs_amplitude(&clip.samples_f32()?);
    info!(
        "Mean amplitude {:.4} (barge-in threshold {:.4})",
        level, config.barge_in.threshold
    );
    if let Some(path) = ClipArchive::from_settings(&config.archive)
        .and_then(|a| a.store(ClipKind::User, &clip))
    {
        println!("💾 Saved {}", path.display());
    }

    let output = output_for(config);
    let mut playback = output.start(&clip)?;
    while !playback.is_finished() {
        if cancel.is_cancelled() {
            playback.terminate(Duration::from_millis(config.barge_in.terminate_timeout_ms))?;
            break;
        }
        clock.sleep(Duration::from_millis(50));
    }
    Ok(())
}
