use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use robin_voice::api::{ApiServer, ApiState};
use robin_voice::audio::{AudioClip, AudioSession, AudioSink, CpalSink};
use robin_voice::config::Overrides;
use robin_voice::controller::{ControllerEvent, controls};
use robin_voice::llm::{ChatSettings, OpenRouterClient};
use robin_voice::playback::HttpAudioLoader;
use robin_voice::speech::{
    AlwaysGranted, ConsoleRecognizer, MicPermission, MicRecognizer, PermissionProbe,
    SpeechCapture, SpeechRecognizer, SpeechToText, stdin_lines,
};
use robin_voice::tts::{Synthesizer, UpstreamSynthesizer};
use robin_voice::{
    ActionRegistry, AudioPlaybackEngine, BackendClient, Config, ControllerParts,
    ConversationController, ConversationHistory, HistoryStore, IntentOrchestrator, TurnProcessor,
    db,
};

/// Robin - hands-free voice assistant
#[derive(Parser)]
#[command(name = "robin", version, about)]
struct Cli {
    /// Port for the HTTP API
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Remote Robin backend to use instead of calling upstream services directly
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Data directory (database)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the voice loop (default)
    Run {
        /// Type utterances on stdin instead of using the microphone
        #[arg(long)]
        console: bool,
        /// Also serve the HTTP API
        #[arg(long)]
        serve: bool,
    },
    /// Serve the HTTP API only
    Serve,
    /// Speak text through the playback engine
    Say {
        /// Text to speak
        text: String,
    },
    /// Test speaker output
    TestSpeaker,
    /// Inspect or manage conversation history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Print stored turns
    Show,
    /// Delete all stored turns
    Clear,
    /// Write history to a JSON file
    Export { path: PathBuf },
    /// Replace history with the turns in a JSON file
    Import { path: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,robin_voice=info",
        1 => "info,robin_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = Overrides {
        port: cli.port,
        backend_url: cli.backend,
        data_dir: cli.data_dir,
    };
    let config = Config::load(&overrides);

    match cli.command.unwrap_or(Command::Run {
        console: false,
        serve: false,
    }) {
        Command::Run { console, serve } => cmd_run(config, console, serve).await,
        Command::Serve => cmd_serve(config).await,
        Command::Say { text } => cmd_say(&config, &text).await,
        Command::TestSpeaker => test_speaker().await,
        Command::History { action } => cmd_history(&config, action),
    }
}

/// Orchestrator and synthesizer that call the upstream services directly
fn local_services(config: &Config) -> anyhow::Result<(Arc<dyn TurnProcessor>, Arc<dyn Synthesizer>)> {
    let chat = OpenRouterClient::new(ChatSettings {
        endpoint: config.chat.endpoint.clone(),
        model: config.chat.model.clone(),
        api_key: config.chat.api_key.clone(),
        referer: config.server.public_url.clone(),
        timeout: config.chat.timeout,
    })?;

    let processor = IntentOrchestrator::new(
        Arc::new(chat),
        ActionRegistry::default(),
        config.chat.retry.clone(),
    );

    let synthesizer = UpstreamSynthesizer::new(
        config.tts.url.clone(),
        config.tts.gateway_token.clone(),
        config.tts.speaker.clone(),
        config.tts.timeout,
    )?;

    let processor: Arc<dyn TurnProcessor> = Arc::new(processor);
    let synthesizer: Arc<dyn Synthesizer> = Arc::new(synthesizer);
    Ok((processor, synthesizer))
}

/// Services for the voice loop: the remote backend when configured
fn voice_services(config: &Config) -> anyhow::Result<(Arc<dyn TurnProcessor>, Arc<dyn Synthesizer>)> {
    match &config.backend_url {
        Some(url) => {
            tracing::info!(backend = %url, "using remote backend");
            let backend = Arc::new(BackendClient::new(url.clone(), config.chat.timeout)?);
            let processor: Arc<dyn TurnProcessor> = backend.clone();
            let synthesizer: Arc<dyn Synthesizer> = backend;
            Ok((processor, synthesizer))
        }
        None => local_services(config),
    }
}

fn playback_engine(
    config: &Config,
    synthesizer: Arc<dyn Synthesizer>,
    audio: Arc<AudioSession>,
) -> anyhow::Result<Arc<AudioPlaybackEngine>> {
    let loader = HttpAudioLoader::new(config.load_timeout)?;
    let sink = CpalSink::new(config.volume)?;

    Ok(Arc::new(AudioPlaybackEngine::new(
        synthesizer,
        Arc::new(loader),
        Arc::new(sink),
        audio,
        config.playback.clone(),
    )))
}

fn open_history(config: &Config) -> anyhow::Result<ConversationHistory> {
    let pool = db::init(config.database_path())?;
    let history = ConversationHistory::with_store(HistoryStore::new(pool), config.history_max_turns)?;
    Ok(history)
}

fn api_server(config: &Config) -> anyhow::Result<ApiServer> {
    let (processor, synthesizer) = local_services(config)?;
    let state = ApiState::new(processor, synthesizer, config.server.public_url.clone())?;
    Ok(ApiServer::new(state, config.server.port))
}

async fn cmd_run(config: Config, console: bool, serve: bool) -> anyhow::Result<()> {
    let history = open_history(&config)?;
    let (processor, synthesizer) = voice_services(&config)?;
    let audio = Arc::new(AudioSession::new());
    let playback = playback_engine(&config, synthesizer, Arc::clone(&audio))?;

    // Cancelled when typed input runs out; never in microphone mode
    let mut input_closed = CancellationToken::new();

    let (recognizer, permission): (Arc<dyn SpeechRecognizer>, Arc<dyn PermissionProbe>) = if console {
        let recognizer = ConsoleRecognizer::new(stdin_lines());
        input_closed = recognizer.closed();
        (
            Arc::new(recognizer) as Arc<dyn SpeechRecognizer>,
            Arc::new(AlwaysGranted) as Arc<dyn PermissionProbe>,
        )
    } else {
        let api_key = config
            .stt
            .api_key
            .clone()
            .context("OPENAI_API_KEY is required for microphone input (or use --console)")?;
        let stt = SpeechToText::new(config.stt.url.clone(), api_key, config.stt.model.clone());
        (
            Arc::new(MicRecognizer::new(Arc::new(stt))) as Arc<dyn SpeechRecognizer>,
            Arc::new(MicPermission) as Arc<dyn PermissionProbe>,
        )
    };

    let server_task = if serve {
        Some(api_server(&config)?.spawn())
    } else {
        None
    };

    let capture = Arc::new(SpeechCapture::new(recognizer, config.capture.clone()));
    let (controller, handle) = ConversationController::new(ControllerParts {
        capture,
        permission,
        processor,
        playback,
        history,
        delays: config.restart.clone(),
    });

    print_events(handle.subscribe());

    tracing::info!(
        language = %config.capture.language,
        console,
        serve,
        "robin ready"
    );

    let mut controller_task = tokio::spawn(controller.run());

    // With the microphone listening, stdin carries commands
    if !console {
        println!("({})", controls::HELP);
        tokio::spawn(controls::run_controls(stdin_lines(), handle.clone(), audio));
    }

    let stopped = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            false
        }
        () = input_closed.cancelled() => {
            tracing::info!("input closed");
            false
        }
        result = &mut controller_task => {
            result?;
            true
        }
    };

    if !stopped {
        tracing::info!("shutting down");
        handle.shutdown().await;
        controller_task.await?;
    }
    if let Some(task) = server_task {
        task.abort();
    }

    Ok(())
}

/// Echo the conversation to stdout
fn print_events(mut events: broadcast::Receiver<ControllerEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ControllerEvent::Transcript(text)) if !text.is_empty() => println!("you: {text}"),
                Ok(ControllerEvent::Reply(reply)) => println!("robin: {}", reply.reply_text),
                Ok(ControllerEvent::Notice(message)) => println!("! {message}"),
                Ok(ControllerEvent::PhaseChanged(phase)) => tracing::debug!(?phase, "phase changed"),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let server = api_server(&config)?;
    tracing::info!(public_url = %config.server.public_url, "serving robin API");

    tokio::select! {
        result = server.run() => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down");
        }
    }

    Ok(())
}

/// Synthesize and play text
async fn cmd_say(config: &Config, text: &str) -> anyhow::Result<()> {
    let (_, synthesizer) = voice_services(config)?;
    let playback = playback_engine(config, synthesizer, Arc::new(AudioSession::new()))?;

    let report = playback.play_reply(text).await?;
    println!(
        "played {} of {} chunks ({} skipped)",
        report.played, report.total, report.skipped
    );

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sink = CpalSink::new(1.0)?;

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    let clip = AudioClip {
        samples,
        sample_rate,
    };
    sink.play(&clip, &CancellationToken::new()).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}

fn cmd_history(config: &Config, action: HistoryAction) -> anyhow::Result<()> {
    let mut history = open_history(config)?;

    match action {
        HistoryAction::Show => {
            if history.is_empty() {
                println!("No conversation history.");
            }
            for turn in history.turns() {
                println!("[{}]", turn.timestamp.format("%Y-%m-%d %H:%M:%S"));
                println!("  you:   {}", turn.user_text);
                println!("  robin: {}", turn.reply_text);
            }
        }
        HistoryAction::Clear => {
            history.clear()?;
            println!("History cleared.");
        }
        HistoryAction::Export { path } => {
            history.export(&path)?;
            println!("Exported {} turns to {}", history.len(), path.display());
        }
        HistoryAction::Import { path } => {
            let count = history.import(&path)?;
            println!("Imported {count} turns from {}", path.display());
        }
    }

    Ok(())
}
