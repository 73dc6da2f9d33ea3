//! swank-repl - a line-oriented REPL on top of a SWANK server.
//!
//! Reads lines from stdin, routes them through the session (evaluation,
//! debugger shorthand, inspector navigation, or answers to pending reads)
//! and prints the transcript to stdout. Logs go to stderr.

use std::io::Write;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use swank_client::config::Config;
use swank_client::session::{commands, Session};
use swank_client::sink::Transcript;

/// Events from the terminal.
enum Input {
    Line(String),
    Interrupt,
    Eof,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter.clone()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    info!("Starting swank-repl v{}", env!("CARGO_PKG_VERSION"));

    let mut session = Session::new(&config);
    session
        .connect(&config.host, config.port)
        .await
        .with_context(|| format!("Failed to connect to {}:{}", config.host, config.port))?;
    session.submit(commands::create_repl()).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    spawn_input_tasks(tx);

    let result = run_repl(&mut session, rx).await;

    let mut transcript = Transcript::new();
    session.disconnect(&mut transcript);

    if let Err(e) = result {
        error!("REPL error: {:#}", e);
        return Err(e);
    }

    info!("swank-repl exited cleanly");
    Ok(())
}

/// Forward stdin lines and Ctrl-C presses into the channel.
fn spawn_input_tasks(tx: mpsc::UnboundedSender<Input>) {
    let lines_tx = tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if lines_tx.send(Input::Line(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = lines_tx.send(Input::Eof);
                    break;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    let _ = lines_tx.send(Input::Eof);
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(Input::Interrupt).is_err() {
                break;
            }
        }
    });
}

/// Main loop: poll, print, then forward whatever the user typed.
async fn run_repl(session: &mut Session, mut rx: mpsc::UnboundedReceiver<Input>) -> Result<()> {
    let mut transcript = Transcript::new();
    let mut finished = Transcript::new();
    let mut stdout = std::io::stdout();

    loop {
        let polled = session.poll(&mut transcript).await;

        let text = transcript.take_text();
        if !text.is_empty() {
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
        }
        polled?;

        while let Some(action) = session.take_action_result(None, &mut finished) {
            match serde_json::to_string(&action) {
                Ok(json) => debug!("Action finished: {}", json),
                Err(e) => debug!("Action {} ({}) finished: {}", action.id, action.name, e),
            }
        }
        finished.take_text();

        while let Ok(input) = rx.try_recv() {
            match input {
                Input::Line(line) => {
                    session.send_input(&line, None).await?;
                }
                Input::Interrupt => {
                    info!("Interrupting listener thread");
                    session.interrupt().await?;
                }
                Input::Eof => return Ok(()),
            }
        }
    }
}
