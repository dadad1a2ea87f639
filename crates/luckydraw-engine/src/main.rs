//! luckydraw: terminal number caller for Tambola/Housie games.
//!
//! Thin front end over the session engine: reads commands from stdin,
//! renders view snapshots, and echoes auto-drawn numbers. All decision
//! logic lives in the engine.

use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use luckydraw_core::{DEFAULT_POOL_SIZE, SessionView};
use luckydraw_engine::engine::{EngineConfig, EngineError, SessionEngine, SessionHandle};
use luckydraw_engine::store::Store;

const DEFAULT_DB_FILE: &str = "luckydraw.db";

#[derive(Parser)]
#[command(name = "luckydraw", about = "Tambola/Housie number caller")]
struct Cli {
    /// Database file holding session progress and settings
    #[arg(long, default_value = DEFAULT_DB_FILE)]
    db: PathBuf,

    /// Upper bound of the number pool
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing. Respects RUST_LOG env var, defaults to warn so
    // engine logs do not interleave with the prompt.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let store = Store::open(&cli.db)?;
    let cancel = CancellationToken::new();
    let config = EngineConfig {
        pool_size: cli.pool_size,
        ..EngineConfig::default()
    };
    let (engine, handle) = SessionEngine::with_cancel(store, config, cancel.clone());

    // Echo auto-drawn numbers while the prompt waits for input.
    let echo = tokio::spawn(echo_auto_draws(handle.subscribe()));

    let engine_task = tokio::spawn(engine.run());

    println!("{}", render_view(&handle.snapshot().await?));
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !dispatch(&handle, line.trim()).await? {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    cancel.cancel();
    let _ = engine_task.await;
    echo.abort();
    Ok(())
}

/// Handle one input line. Returns `Ok(false)` when the user quits.
async fn dispatch(handle: &SessionHandle, input: &str) -> anyhow::Result<bool> {
    let mut parts = input.split_whitespace();
    match parts.next() {
        None => {}
        Some("draw" | "d") => {
            if handle.snapshot().await?.is_auto_mode {
                // The manual action is disabled in auto mode; the engine
                // primitive itself stays caller-agnostic.
                println!("auto mode is on — use `pause` to control the draws");
            } else {
                match handle.draw().await {
                    Ok(view) => println!("{}", render_view(&view)),
                    Err(EngineError::Session(e)) => println!("{e}"),
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Some("pause" | "p") => {
            let view = handle.toggle_pause().await?;
            println!("{}", render_view(&view));
        }
        Some("reset") => {
            let view = handle.reset().await?;
            println!("session reset");
            println!("{}", render_view(&view));
        }
        Some("auto") => match parts.next() {
            Some("on") => {
                let view = handle.set_auto_mode(true).await?;
                println!("{}", render_view(&view));
            }
            Some("off") => {
                let view = handle.set_auto_mode(false).await?;
                println!("{}", render_view(&view));
            }
            _ => println!("usage: auto on|off"),
        },
        Some("speed") => match parts.next().and_then(|s| s.parse::<u64>().ok()) {
            Some(secs) => {
                let view = handle.set_auto_interval(secs).await?;
                println!("auto interval: {}s", view.auto_interval_secs);
            }
            None => println!("usage: speed <seconds 1-10>"),
        },
        Some("board" | "b") => {
            let view = handle.snapshot().await?;
            let drawn = handle.history().await?;
            print!("{}", render_board(&drawn, view.current, view.remaining_count));
        }
        Some("history" | "h") => {
            let drawn = handle.history().await?;
            if drawn.is_empty() {
                println!("nothing drawn yet");
            } else {
                // Newest first, like the in-app history screen.
                let listed: Vec<String> =
                    drawn.iter().rev().map(|n| n.to_string()).collect();
                println!("{}", listed.join(", "));
            }
        }
        Some("help" | "?") => print_help(),
        Some("quit" | "q" | "exit") => return Ok(false),
        Some(other) => println!("unknown command: {other} (try `help`)"),
    }
    Ok(true)
}

/// Print numbers drawn by the auto-mode timer as they arrive.
async fn echo_auto_draws(mut updates: broadcast::Receiver<SessionView>) {
    let mut last_count = None;
    loop {
        match updates.recv().await {
            Ok(view) => {
                let grew = last_count.is_some_and(|count| view.drawn_count > count);
                if grew && view.is_auto_mode {
                    println!("{}", render_view(&view));
                }
                last_count = Some(view.drawn_count);
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "display lagged, dropped updates");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_help() {
    println!(
        "commands: draw | pause | reset | auto on|off | speed <1-10> | board | history | quit"
    );
}

/// One-line status: current number, progress, and mode flags.
fn render_view(view: &SessionView) -> String {
    let current = match view.current {
        Some(n) => n.to_string(),
        None => "—".to_string(),
    };
    let total = view.drawn_count + view.remaining_count;
    let mut line = format!(
        "current: {current} | drawn {}/{} | {} remaining",
        view.drawn_count, total, view.remaining_count
    );
    if view.is_complete {
        line.push_str(" | complete");
    } else if view.is_paused {
        line.push_str(" | paused");
    }
    if view.is_auto_mode {
        line.push_str(&format!(" | auto {}s", view.auto_interval_secs));
    }
    line
}

/// Full pool grid, ten numbers per row: drawn numbers are printed, the
/// current one is marked, the rest show as dots.
fn render_board(drawn: &[u32], current: Option<u32>, remaining: usize) -> String {
    let pool_size = drawn.len() + remaining;
    let mut out = String::new();
    for n in 1..=pool_size as u32 {
        let cell = if Some(n) == current {
            format!("[{n:>3}]")
        } else if drawn.contains(&n) {
            format!(" {n:>3} ")
        } else {
            "   · ".to_string()
        };
        out.push_str(&cell);
        if n % 10 == 0 || n == pool_size as u32 {
            out.push('\n');
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
