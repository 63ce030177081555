use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use sotto::{
    Config, CooldownGate, Credentials, Refiner, SessionController, SessionEvent, SessionState,
    StdoutDelivery,
};

#[derive(Debug, Parser)]
#[command(name = "sotto", about = "Push-to-talk dictation for the terminal")]
struct Cli {
    /// Path to a config file (extension inferred)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the STT provider (deepgram | elevenlabs)
    #[arg(short, long)]
    provider: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;

    let mut session_config = cfg.session_config();
    if let Some(provider) = &cli.provider {
        session_config.provider = provider.parse()?;
    }

    let credentials = Credentials::from_env();
    let refiner = Arc::new(Refiner::new(
        cfg.refine_config(),
        credentials.refine.clone(),
    ));
    let mut controller = SessionController::new(
        session_config,
        credentials,
        refiner,
        Arc::new(StdoutDelivery),
    );

    // Surface session notifications on the terminal.
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::StateChanged(state)) => info!("session {}", state),
                Ok(SessionEvent::Status(message)) => info!("{}", message),
                Ok(SessionEvent::Tick(secs)) => info!("recording {}s", secs),
                Ok(SessionEvent::Delivered { inserted, .. }) => {
                    info!(
                        "transcript {}",
                        if inserted { "inserted" } else { "copied to clipboard" }
                    );
                }
                Ok(SessionEvent::Level(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });

    info!("sotto v{}", env!("CARGO_PKG_VERSION"));
    println!("Press Enter to start or stop dictation, 'q' + Enter to quit.");

    let mut gate = CooldownGate::new(Duration::from_millis(400));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().eq_ignore_ascii_case("q") {
            break;
        }
        if !gate.try_fire() {
            continue;
        }
        match controller.state() {
            SessionState::Idle => {
                if let Err(e) = controller.start().await {
                    warn!("Could not start dictation: {}", e);
                }
            }
            SessionState::Connecting | SessionState::Recording => controller.stop().await,
            // Already winding down: duplicate stop requests are no-ops.
            _ => {}
        }
    }

    controller.stop().await;
    Ok(())
}
