use std::{
    collections::VecDeque,
    io::{self, Write},
    panic,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossterm::{
    cursor::Show,
    event::{self, DisableMouseCapture, Event, KeyEventKind},
    execute,
    style::ResetColor,
    terminal::{LeaveAlternateScreen, disable_raw_mode},
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tuirealm::terminal::{CrosstermTerminalAdapter, TerminalBridge};

use session_deck::{
    app::{
        App, Effect, Message,
        polling::{Dispatcher, PollIntervals},
        runtime::{RealSessionRuntime, SessionRuntime},
    },
    logging::{init_logging, print_log_location},
    notification::DesktopNotifier,
    remote::HostPool,
    settings::Settings,
    tmux::ensure_tmux_installed,
    types::SessionKey,
    ui,
};

#[derive(Parser, Debug)]
#[command(
    name = "session-deck",
    about = "Terminal dashboard supervising local and remote agent tmux sessions",
    version = env!("SESSION_DECK_BUILD_VERSION"),
    author
)]
struct Cli {
    /// Only poll these configured remote hosts (repeatable)
    #[arg(long = "host", value_name = "NAME")]
    hosts: Vec<String>,

    /// Start with the list scoped to this project directory
    #[arg(short, long, value_name = "PATH")]
    project: Option<PathBuf>,

    /// Ignore every configured remote host
    #[arg(long, conflicts_with = "hosts")]
    no_remote: bool,

    /// Settings file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// trace, debug, info, warn or error
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

static TERMINAL_RESTORED: AtomicBool = AtomicBool::new(false);

const EVENT_POLL: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_path = match init_logging(cli.log_level.as_deref()) {
        Ok(path) => Some(path),
        Err(err) => {
            eprintln!("warning: failed to initialize logging: {err}");
            None
        }
    };
    if let Some(path) = log_path.as_ref() {
        install_panic_hook_with_log(path.clone());
    }

    let result = run_app(cli);
    if let Some(path) = log_path.as_ref() {
        print_log_location(path);
    }
    result
}

fn run_app(cli: Cli) -> Result<()> {
    if !cfg!(target_os = "linux") && !cfg!(target_os = "macos") {
        bail!("session-deck supports only Linux and macOS.");
    }
    ensure_tmux_installed()?;

    let settings = load_settings(&cli)?;
    let scope = cli
        .project
        .map(|path| path.canonicalize().unwrap_or(path));
    info!(
        hosts = settings.remote_hosts.len(),
        projects = settings.projects.len(),
        "starting dashboard"
    );

    let runtime = Arc::new(RealSessionRuntime::new(settings.clone()));
    let notifier = Arc::new(DesktopNotifier::new(
        settings.notification_backend(),
        settings.notify_statuses(),
    ));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut dispatcher = Dispatcher::new(
        runtime.clone(),
        tx,
        HostPool::new(&settings.remote_hosts),
        notifier,
        PollIntervals::from_settings(&settings),
    );
    let with_remote = !settings.remote_hosts.is_empty();
    let mut app = App::new(settings).with_scope(scope);

    let _guard = TerminalGuard;
    let mut terminal = setup_terminal()?;
    let (width, height) = crossterm::terminal::size().context("failed to read terminal size")?;
    let mut pending: VecDeque<Effect> = app.update(Message::Resize(width, height)).into();
    dispatcher.spawn_tickers(with_remote);

    let mut redraw = true;
    loop {
        while let Ok(message) = rx.try_recv() {
            pending.extend(app.update(message));
            redraw = true;
        }

        while let Some(effect) = pending.pop_front() {
            match dispatcher.execute(effect) {
                Some(Effect::Attach(key)) => {
                    pending.extend(attach_session(
                        &mut terminal,
                        &mut app,
                        &dispatcher,
                        runtime.as_ref(),
                        key,
                    )?);
                    redraw = true;
                }
                Some(Effect::Quit) => app.should_quit = true,
                Some(other) => warn!(effect = ?other, "unhandled effect"),
                None => {}
            }
        }
        if app.should_quit {
            break;
        }

        if redraw {
            terminal
                .draw(|frame| ui::render(frame, &app))
                .context("failed to render frame")?;
            redraw = false;
        }

        if event::poll(EVENT_POLL).context("failed to poll terminal events")? {
            let message = match event::read().context("failed to read terminal event")? {
                Event::Key(key) if key.kind == KeyEventKind::Press => Some(Message::Key(key)),
                Event::Resize(width, height) => Some(Message::Resize(width, height)),
                _ => None,
            };
            if let Some(message) = message {
                pending.extend(app.update(message));
                redraw = true;
            }
        }
    }

    dispatcher.shutdown();
    let _ = terminal.disable_raw_mode();
    let _ = terminal.leave_alternate_screen();
    let _ = terminal.clear_screen();
    TERMINAL_RESTORED.store(true, Ordering::SeqCst);
    info!("dashboard closed");

    Ok(())
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => {
            if !path.exists() {
                bail!("settings file {} does not exist", path.display());
            }
            Settings::load_from_path(path)
        }
        None => Settings::load(),
    };

    if cli.no_remote {
        settings.remote_hosts.clear();
    } else if !cli.hosts.is_empty() {
        let unknown: Vec<&str> = cli
            .hosts
            .iter()
            .filter(|name| !settings.remote_hosts.iter().any(|host| &host.name == *name))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            bail!("unknown remote host(s): {}", unknown.join(", "));
        }
        settings
            .remote_hosts
            .retain(|host| cli.hosts.contains(&host.name));
    }
    Ok(settings)
}

/// Hands the terminal to `key` until the user detaches. The attach monitor
/// keeps notifications flowing meanwhile and its baseline is adopted after.
fn attach_session(
    terminal: &mut TerminalBridge<CrosstermTerminalAdapter>,
    app: &mut App,
    dispatcher: &Dispatcher,
    runtime: &dyn SessionRuntime,
    key: SessionKey,
) -> Result<Vec<Effect>> {
    dispatcher.set_paused(true);
    let monitor = dispatcher.start_attach_monitor(app.baseline.clone());
    restore_terminal()?;
    info!(session = %key, "attaching");

    let result = runtime.attach_command(&key).and_then(|mut command| {
        let status = command.status().context("failed to run attach command")?;
        if status.success() {
            Ok(())
        } else {
            bail!("attach exited with status {status}")
        }
    });

    resume_terminal(terminal)?;
    let baseline = monitor.cancel();
    dispatcher.set_paused(false);
    Ok(app.update(Message::AttachFinished {
        key,
        baseline,
        result: result.map_err(|err| format!("{err:#}")),
    }))
}

fn setup_terminal() -> Result<TerminalBridge<CrosstermTerminalAdapter>> {
    let mut terminal =
        TerminalBridge::new_crossterm().context("failed to initialize terminal bridge")?;
    resume_terminal(&mut terminal)?;
    Ok(terminal)
}

fn resume_terminal(terminal: &mut TerminalBridge<CrosstermTerminalAdapter>) -> Result<()> {
    TERMINAL_RESTORED.store(false, Ordering::SeqCst);
    terminal
        .enable_raw_mode()
        .context("failed to enable raw mode")?;
    terminal
        .enter_alternate_screen()
        .context("failed to enter alternate screen")?;
    terminal
        .clear_screen()
        .context("failed to clear screen")?;
    Ok(())
}

fn install_panic_hook_with_log(log_path: PathBuf) {
    let previous_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let _ = restore_terminal();
        eprintln!();
        eprintln!("  Log file: {}", log_path.display());
        eprintln!();
        previous_hook(panic_info);
    }));
}

fn restore_terminal() -> Result<()> {
    if TERMINAL_RESTORED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let _ = disable_raw_mode();

    let mut stderr = io::stderr();
    let _ = execute!(
        stderr,
        LeaveAlternateScreen,
        DisableMouseCapture,
        Show,
        ResetColor
    );
    let _ = stderr.write_all(b"\x1b[?1049l\x1b[?25h\x1b[0m\x1b[2J\x1b[H");
    let _ = stderr.flush();

    Ok(())
}

struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = restore_terminal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_accepts_repeated_hosts() {
        let cli = Cli::try_parse_from(["session-deck", "--host", "a", "--host", "b"]).unwrap();
        assert_eq!(cli.hosts, vec!["a".to_string(), "b".to_string()]);
        assert!(!cli.no_remote);
    }

    #[test]
    fn cli_rejects_host_with_no_remote() {
        assert!(Cli::try_parse_from(["session-deck", "--host", "a", "--no-remote"]).is_err());
    }
}
