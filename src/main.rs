use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use voice_live_rs::{
    config::load_config,
    error::Result as VoiceResult,
    generate::GenerationClient,
    live::{run_session, LiveConfig, Mode, SessionEvent, DEFAULT_LIVE_MODEL, DEFAULT_VOICE},
    transcript::TranscriptEntry,
};

#[derive(Parser)]
#[command(name = "voice-live", about = "Live voice conversations with a hosted speech model")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a live voice conversation with spoken replies
    Converse {
        /// Prebuilt voice used for synthesized speech
        #[arg(long, default_value = DEFAULT_VOICE)]
        voice: String,
        #[arg(long, default_value = DEFAULT_LIVE_MODEL)]
        model: String,
        /// Input device name (default: system microphone)
        #[arg(long)]
        device: Option<String>,
        /// Print a summary of the conversation after it ends
        #[arg(long)]
        summary: bool,
    },
    /// Live-transcribe microphone audio without spoken replies
    Transcribe {
        #[arg(long, default_value = DEFAULT_LIVE_MODEL)]
        model: String,
        #[arg(long)]
        device: Option<String>,
    },
    /// Transcribe an audio file in one shot
    File {
        /// Path to the audio file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> VoiceResult<()> {
    env_logger::init();

    let cli = Cli::parse();

    let api_config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            eprintln!("   Set GEMINI_API_KEY in the environment or a .env file");
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Converse {
            voice,
            model,
            device,
            summary,
        } => {
            let config = LiveConfig {
                mode: Mode::Conversation,
                model,
                voice,
                device,
            };
            let history = run_live(api_config.api_key(), &config).await?;
            if summary {
                print_summary(api_config.api_key(), &history).await;
            }
        }
        Command::Transcribe { model, device } => {
            let config = LiveConfig {
                mode: Mode::Transcription,
                model,
                voice: DEFAULT_VOICE.to_string(),
                device,
            };
            run_live(api_config.api_key(), &config).await?;
        }
        Command::File { path } => {
            println!("⏳ Processing {}...", path.display());
            let client = GenerationClient::new(api_config.api_key().to_string());
            match client.transcribe_file(&path).await {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    // Recovered locally: report and return to a usable state.
                    log::error!("File transcription failed: {}", e);
                    println!("❌ Transcription failed: {}", e);
                }
            }
        }
    }

    Ok(())
}

async fn run_live(api_key: &str, config: &LiveConfig) -> VoiceResult<Vec<TranscriptEntry>> {
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_on_signal.cancel();
        }
    });

    println!("🎤 Session starting - press Ctrl+C to stop");

    let history = run_session(api_key, config, cancel, print_event).await?;

    println!("👋 Session ended ({} transcript entries)", history.len());
    Ok(history)
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::UserTranscript(text) => {
            print!("\r  you … {}", text);
            let _ = std::io::stdout().flush();
        }
        SessionEvent::AssistantTranscript(text) => {
            print!("\r  assistant … {}", text);
            let _ = std::io::stdout().flush();
        }
        SessionEvent::TurnFinalized(entries) => {
            println!();
            for entry in entries {
                println!(
                    "[{}] {}: {}",
                    entry.completed_at.format("%H:%M:%S"),
                    entry.speaker,
                    entry.text
                );
            }
        }
        SessionEvent::PlayAudio { source, .. } => {
            log::debug!(
                "Playing source {} at t={:.2}s for {:.2}s",
                source.id,
                source.start,
                source.duration
            );
        }
        SessionEvent::StopPlayback | SessionEvent::Teardown => {}
    }
}

async fn print_summary(api_key: &str, history: &[TranscriptEntry]) {
    if history.is_empty() {
        println!("Nothing to summarize");
        return;
    }

    let client = GenerationClient::new(api_key.to_string());
    match client.summarize(history).await {
        Ok(summary) => {
            println!("\n📝 Summary:");
            println!("{}", summary);
        }
        Err(e) => {
            log::error!("Summarization failed: {}", e);
            println!("❌ Summarization failed: {}", e);
        }
    }
}
