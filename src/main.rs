//! tolk command-line client.
//!
//! `connect` runs an interpreter session in the terminal until Ctrl-C:
//! committed lines scroll, in-flight partials repaint in place. `devices`
//! and `languages` are plumbing for setting the session up.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tolk::capture::list_input_devices;
use tolk::config::Config;
use tolk::lang::LanguageCode;
use tolk::router::TurnUpdate;
use tolk::session::{Interpreter, SessionEvent, SessionState};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tolk")]
#[command(version)]
#[command(about = "Real-time interpreter for a shared front-desk microphone", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file path (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and interpret until Ctrl-C
    Connect(ConnectArgs),
    /// List input devices on this machine
    Devices,
    /// List supported language codes
    Languages,
}

#[derive(Parser, Debug)]
struct ConnectArgs {
    /// Party A language code, e.g. en (see `tolk languages`)
    #[arg(long)]
    party_a: Option<String>,

    /// Party B language code, e.g. ar
    #[arg(long)]
    party_b: Option<String>,

    /// Signaling endpoint URL
    #[arg(long)]
    signal_url: Option<String>,

    /// Input device name (see `tolk devices`)
    #[arg(long)]
    device: Option<String>,

    /// Start with the microphone gated off
    #[arg(long)]
    muted: bool,

    /// Write both transcripts to this file on exit
    #[arg(long)]
    save_transcript: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tolk=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Connect(connect) => cmd_connect(args.config, connect).await,
        Command::Devices => cmd_devices(),
        Command::Languages => {
            cmd_languages();
            Ok(())
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────

fn cmd_devices() -> Result<()> {
    for name in list_input_devices()? {
        println!("{name}");
    }
    Ok(())
}

fn cmd_languages() {
    for lang in LanguageCode::all() {
        println!("{:<4} {}", lang.as_str(), lang.display_name());
    }
}

async fn cmd_connect(config_path: Option<PathBuf>, connect: ConnectArgs) -> Result<()> {
    let config = load_config(config_path, &connect)?;
    println!(
        "Party A: {}   Party B: {}",
        config.party_a.display_name(),
        config.party_b.display_name()
    );

    let (interpreter, mut events) = Interpreter::new(config);
    interpreter.start().await?;
    if connect.muted {
        if let Some(session) = interpreter.session().await {
            session.set_microphone(false);
        }
    }

    let mut renderer = Renderer::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                renderer.clear_live();
                println!("closing session");
                break;
            }
            event = events.recv() => {
                match event {
                    Some(event) => {
                        if !renderer.render(&event) {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(path) = &connect.save_transcript {
        save_transcript(&interpreter, path).await;
    }
    interpreter.stop().await;
    Ok(())
}

fn load_config(path: Option<PathBuf>, connect: &ConnectArgs) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };
    config.apply_env_overrides()?;
    if let Some(url) = &connect.signal_url {
        config.signal_url = url.clone();
    }
    if let Some(code) = &connect.party_a {
        config.party_a = parse_lang(code)?;
    }
    if let Some(code) = &connect.party_b {
        config.party_b = parse_lang(code)?;
    }
    if let Some(device) = &connect.device {
        config.input_device = Some(device.clone());
    }
    config.validate()?;
    Ok(config)
}

fn parse_lang(code: &str) -> Result<LanguageCode> {
    LanguageCode::from_str_code(code)
        .ok_or_else(|| tolk::Error::UnknownLanguage(code.to_owned()).into())
}

async fn save_transcript(interpreter: &Interpreter, path: &PathBuf) {
    let Some(session) = interpreter.session().await else {
        return;
    };
    let (party_a, party_b) = session.languages();
    let text = session
        .transcripts()
        .export(party_a.display_name(), party_b.display_name());
    match std::fs::write(path, text) {
        Ok(()) => println!("transcript saved to {}", path.display()),
        Err(e) => eprintln!("could not save transcript: {e}"),
    }
}

// ── Rendering ─────────────────────────────────────────────────────

/// Committed lines scroll; the one in-flight line repaints in place with
/// carriage return plus erase-to-end.
struct Renderer {
    live: bool,
}

impl Renderer {
    fn new() -> Self {
        Self { live: false }
    }

    /// Returns `false` once the session reached a terminal state.
    fn render(&mut self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::StateChanged(state) => {
                self.clear_live();
                println!("[{state}]");
                !matches!(state, SessionState::Idle | SessionState::Error)
            }
            SessionEvent::Turn(update) => {
                self.render_turn(update);
                true
            }
            SessionEvent::RemoteAudio(_) => {
                tracing::info!("interpreter audio active");
                true
            }
            // Counters go to logs, not the transcript view
            SessionEvent::Stats(stats) => {
                tracing::debug!(
                    frames = stats.frames,
                    committed_a = stats.committed_a,
                    committed_b = stats.committed_b,
                    duplicates = stats.duplicates_suppressed,
                    "router counters"
                );
                true
            }
        }
    }

    fn render_turn(&mut self, update: &TurnUpdate) {
        match update {
            TurnUpdate::LiveUser { text, .. } => self.paint_live(&format!("mic: {text}")),
            TurnUpdate::LiveUserCleared { .. } => self.clear_live(),
            TurnUpdate::LiveAssistant { party, text } => {
                self.paint_live(&format!("{}: {text}", party.label()));
            }
            TurnUpdate::LiveAssistantCleared { .. } => self.clear_live(),
            TurnUpdate::Committed { party, text } => {
                self.clear_live();
                println!("[{}] {text}", party.label());
            }
            TurnUpdate::Summary { payload } => {
                self.clear_live();
                println!("[summary] {payload}");
            }
        }
    }

    fn paint_live(&mut self, line: &str) {
        print!("\r\x1b[K{line}");
        let _ = std::io::stdout().flush();
        self.live = true;
    }

    fn clear_live(&mut self) {
        if self.live {
            print!("\r\x1b[K");
            let _ = std::io::stdout().flush();
            self.live = false;
        }
    }
}
