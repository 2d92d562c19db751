//! Voxline - interruptible voice conversations over the phone
//!
//! Command-line front end: replay a recorded call through the pipeline,
//! check the configured backends, or write a starter config.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voxline::asr::create_recognizer;
use voxline::audio::AudioChunk;
use voxline::call::{run_call, CallEvent};
use voxline::config::{config_path, Config};
use voxline::core::create_generator;
use voxline::pipeline::VoicePipeline;
use voxline::tts::create_synthesizer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay raw PCM caller audio through the pipeline in real time
    Run {
        /// Caller audio: raw little-endian PCM in the configured format
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the synthesized replies (raw PCM)
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, default_value = "replay")]
        call_id: String,

        /// Silence appended after the input so the last reply can play out
        #[arg(long, default_value_t = 5000)]
        tail_ms: u64,
    },
    /// Check that the recognizer, generator and synthesizer are reachable
    Check,
    /// Write the default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let path = args.config.clone().unwrap_or_else(config_path);
    let config = Config::load_from(&path)?;

    // Setup logging; RUST_LOG wins over the config
    let level = if args.verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("📞 Voxline v{} starting...", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Run {
            input,
            output,
            call_id,
            tail_ms,
        } => replay(&config, &input, &output, call_id, tail_ms).await,
        Command::Check => check(&config).await,
        Command::InitConfig { force } => init_config(&path, force),
    }
}

async fn replay(
    config: &Config,
    input: &Path,
    output: &Path,
    call_id: String,
    tail_ms: u64,
) -> Result<()> {
    let audio = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    let frame_bytes = config.audio.format.bytes_for_ms(config.audio.frame_ms);
    let frame_period = Duration::from_millis(config.audio.frame_ms.max(1) as u64);
    let tail_frames = (tail_ms / frame_period.as_millis() as u64) as usize;
    info!(
        "🎙️ Replaying {} ({:.1}s of audio)",
        input.display(),
        config.audio.format.duration_ms(audio.len()) / 1000.0
    );

    // Outbound audio goes straight to a file
    let (audio_tx, mut audio_rx) = mpsc::channel::<AudioChunk>(64);
    let mut file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("creating {}", output.display()))?;
    let writer = tokio::spawn(async move {
        let mut written = 0usize;
        while let Some(chunk) = audio_rx.recv().await {
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;
        Ok::<usize, std::io::Error>(written)
    });

    let pipeline = VoicePipeline::from_config(call_id, config, Arc::new(audio_tx))?;

    // Feed frames at real-time cadence, like a phone line would
    let (call_tx, call_rx) = mpsc::channel(64);
    let feeder = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(frame_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        if call_tx.send(CallEvent::Answered).await.is_err() {
            return;
        }

        let silence = vec![0u8; frame_bytes];
        let frames = audio
            .chunks(frame_bytes)
            .map(<[u8]>::to_vec)
            .chain(std::iter::repeat(silence).take(tail_frames));
        for frame in frames {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, hanging up");
                    break;
                }
                _ = ticker.tick() => {}
            }
            if call_tx.send(CallEvent::Audio(frame)).await.is_err() {
                return;
            }
        }
        let _ = call_tx.send(CallEvent::Ended).await;
    });

    let summary = run_call(pipeline, call_rx).await?;
    feeder.abort();
    let written = writer.await??;

    info!(
        "✅ Wrote {} ({:.1}s of reply audio)",
        output.display(),
        config.synthesizer.output_format.duration_ms(written) / 1000.0
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn check(config: &Config) -> Result<()> {
    let recognizer = create_recognizer(config)?;
    let synthesizer = create_synthesizer(config)?;
    let generator = create_generator(config)?;

    let asr_ok = recognizer.health_check().await;
    let llm_ok = generator.health_check().await;
    let tts_ok = match synthesizer.initialize().await {
        Ok(()) => synthesizer.health_check().await,
        Err(e) => {
            warn!("Synthesizer failed to initialize: {}", e);
            false
        }
    };
    let _ = synthesizer.close().await;

    for (role, name, ok) in [
        ("recognizer", recognizer.name(), asr_ok),
        ("generator", generator.name(), llm_ok),
        ("synthesizer", synthesizer.name(), tts_ok),
    ] {
        let mark = if ok { "✅" } else { "❌" };
        println!("{mark} {role:<12} {name}");
    }

    if !(asr_ok && llm_ok && tts_ok) {
        bail!("one or more backends are unavailable");
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default().save_to(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
