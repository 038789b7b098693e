//! Fleetmux console
//!
//! Connects to a Fleetmux server, opens one session per requested target,
//! and renders them as panes of a single adjustable terminal view.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc;

use console::{client, ui, App};

/// Fleetmux console - multiplexed remote shells in one view.
#[derive(Parser, Debug)]
#[command(name = "fleetmux")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Control connection URL of the Fleetmux server
    #[arg(long, default_value = "ws://127.0.0.1:7620")]
    pub server: String,

    /// Account to open sessions under
    #[arg(long)]
    pub account: String,

    /// Comma-separated target ids to open at startup
    #[arg(long, value_delimiter = ',')]
    pub targets: Vec<String>,

    /// Log file path (the TUI owns the screen, so logs go to a file)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Log to a file; stdout belongs to the TUI.
    let log_path = cli.log_file.clone().unwrap_or_else(default_log_path);
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let log_name = log_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "fleetmux.log".to_string());
    std::fs::create_dir_all(&log_dir)?;
    let (writer, _guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
        log_dir, log_name,
    ));
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    tracing::info!(server = %cli.server, targets = ?cli.targets, "Fleetmux console starting");

    let (outbound, inbound) = client::connect(&cli.server).await?;

    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, cli, outbound, inbound).await;

    // Restore the terminal before reporting any error.
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

/// Main event loop: draw, poll keys, drain server messages.
async fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    cli: Cli,
    outbound: mpsc::Sender<protocol::Message>,
    mut inbound: mpsc::Receiver<protocol::Message>,
) -> anyhow::Result<()> {
    let mut app = App::new(cli.account);

    let size = terminal.size()?;
    for message in app.set_viewport(size.width, size.height) {
        let _ = outbound.send(message).await;
    }

    // Fan the launch list out into one open per target on the one channel.
    for target_id in &cli.targets {
        let message = app.open_target(target_id);
        let _ = outbound.send(message).await;
    }

    let tick_rate = Duration::from_millis(50);
    let mut disconnected = false;

    loop {
        terminal.draw(|frame| ui::render(frame, &app))?;

        // Poll for crossterm events with timeout
        if event::poll(tick_rate)? {
            match event::read()? {
                Event::Key(key) => {
                    for message in app.handle_key(key) {
                        let _ = outbound.send(message).await;
                    }
                }
                Event::Resize(width, height) => {
                    for message in app.set_viewport(width, height) {
                        let _ = outbound.send(message).await;
                    }
                }
                _ => {}
            }
        }

        // Drain pending server messages
        loop {
            match inbound.try_recv() {
                Ok(message) => {
                    for reply in app.apply_server(message) {
                        let _ = outbound.send(reply).await;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if !disconnected {
                        disconnected = true;
                        app.set_status_line("control connection lost; Alt-q to quit");
                        tracing::warn!("Control connection lost");
                    }
                    break;
                }
            }
        }

        if app.should_quit() {
            break;
        }
    }

    Ok(())
}

/// Default log file location.
fn default_log_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleetmux")
        .join("fleetmux.log")
}
