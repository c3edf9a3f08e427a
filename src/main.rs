use std::{fs, path::PathBuf, time::Duration};

use calloop::{
    signals::{Signal, Signals},
    timer::{TimeoutAction, Timer},
    EventLoop,
};
use clap::Parser;
use labwc::{config, control, errors::Error, Result, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(
    name = "labwc",
    about = "A Wayland stacking/tiling window manager",
    disable_version_flag = true
)]
struct Cli {
    /// Specify config file (with path)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Specify config directory
    #[arg(short = 'C', long = "config-dir")]
    config_dir: Option<PathBuf>,

    /// Enable full logging, including debug information
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Exit the compositor
    #[arg(short = 'e', long = "exit")]
    exit: bool,

    /// Merge user config files/theme in all XDG Base Dirs
    #[arg(short = 'm', long = "merge-config")]
    merge_config: bool,

    /// Reload the compositor configuration
    #[arg(short = 'r', long = "reconfigure")]
    reconfigure: bool,

    /// Run command on startup
    #[arg(short = 's', long = "startup")]
    startup: Option<String>,

    /// Run command on startup and terminate on exit
    #[arg(short = 'S', long = "session")]
    session: Option<String>,

    /// Show version number and quit
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Enable more verbose logging
    #[arg(short = 'V', long = "verbose")]
    verbose: bool,

    /// Enable a toggleable keybind
    #[arg(long = "enable-keybind", value_name = "id")]
    enable_keybind: Option<String>,

    /// Disable a toggleable keybind
    #[arg(long = "disable-keybind", value_name = "id")]
    disable_keybind: Option<String>,

    /// Toggle a toggleable keybind
    #[arg(long = "toggle-keybind", value_name = "id")]
    toggle_keybind: Option<String>,

    /// Switch to a workspace by number or name
    #[arg(long = "workspace-switch", value_name = "number|name")]
    workspace_switch: Option<String>,

    /// Switch to next workspace
    #[arg(long = "workspace-next")]
    workspace_next: bool,

    /// Switch to previous workspace
    #[arg(long = "workspace-prev")]
    workspace_prev: bool,

    /// Query the active workspace
    #[arg(long = "workspace-current")]
    workspace_current: bool,

    /// Enable automatic tiling mode
    #[arg(long = "enable-tiling")]
    enable_tiling: bool,

    /// Disable automatic tiling mode
    #[arg(long = "disable-tiling")]
    disable_tiling: bool,

    /// Toggle automatic tiling mode on/off
    #[arg(long = "toggle-tiling")]
    toggle_tiling: bool,

    /// Set grid snapping mode (on=simple grid, off=smart resize preservation)
    #[arg(long = "tiling-grid-mode", value_name = "on|off|toggle")]
    tiling_grid_mode: Option<String>,

    /// Recalculate and rearrange tiled windows
    #[arg(long = "recalculate-tiling")]
    recalculate_tiling: bool,

    /// Query the current tiling mode (stacking/grid/smart)
    #[arg(long = "tiling-status")]
    tiling_status: bool,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("labwc: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.version {
        println!("labwc {VERSION}");
        return Ok(());
    }

    // Control forms talk to a running instance and exit.
    if let Some(done) = run_control_command(&cli)? {
        return done;
    }

    init_logging(&cli)?;
    die_on_detecting_suid()?;

    if std::env::var_os("XDG_RUNTIME_DIR").is_none() {
        return Err(Error::FatalInit("XDG_RUNTIME_DIR is unset".to_owned()));
    }

    // LABWC_PID lets SIGHUP/SIGTERM target this instance specifically,
    // LABWC_VER is for helper programs.
    // Safety: set before any threads exist.
    unsafe {
        std::env::set_var(control::PID_ENV, std::process::id().to_string());
        std::env::set_var("LABWC_VER", VERSION);
    }
    tracing::debug!("LABWC_PID={}", std::process::id());

    let loaded = config::load(cli.config.as_deref(), cli.config_dir.as_deref());
    if cli.merge_config {
        tracing::warn!("merge-config is handled by the config front-end");
    }

    let mut event_loop: EventLoop<Server> =
        EventLoop::try_new().map_err(|err| Error::EventLoop(err.to_string()))?;
    let mut server = Server::new(event_loop.handle(), event_loop.get_signal(), loaded)?;

    let signals = Signals::new(&[
        Signal::SIGUSR1,
        Signal::SIGHUP,
        Signal::SIGTERM,
        Signal::SIGINT,
        Signal::SIGCHLD,
    ])
    .map_err(|err| Error::EventLoop(format!("failed to register signals: {err}")))?;
    event_loop
        .handle()
        .insert_source(signals, |event, _, server| {
            server.handle_signal(event.signal());
        })
        .map_err(|err| Error::EventLoop(format!("failed to insert signal source: {err}")))?;

    // Delay startup of applications until the event loop is ready.
    let startup = cli.startup.clone();
    let session = cli.session.clone();
    event_loop
        .handle()
        .insert_source(
            Timer::from_duration(Duration::ZERO),
            move |_, _, server: &mut Server| {
                server.run_startup_tasks(startup.as_deref(), session.as_deref());
                TimeoutAction::Drop
            },
        )
        .map_err(|err| Error::EventLoop(format!("failed to schedule startup tasks: {err}")))?;

    tracing::info!(version = VERSION, "compositor core running");
    event_loop
        .run(None, &mut server, |_server| {})
        .map_err(|err| Error::EventLoop(err.to_string()))?;

    cleanup_runtime_files();
    Ok(())
}

/// Handle the flags that drive a running compositor; returns `Some` when
/// the invocation was a control form and the process should exit.
fn run_control_command(cli: &Cli) -> Result<Option<Result<()>>> {
    if cli.exit {
        control::signal_compositor(libc::SIGTERM)?;
        return Ok(Some(Ok(())));
    }
    if cli.reconfigure {
        control::signal_compositor(libc::SIGHUP)?;
        return Ok(Some(Ok(())));
    }
    if let Some(id) = &cli.enable_keybind {
        return Ok(Some(control::send_keybind_command("enable", id)));
    }
    if let Some(id) = &cli.disable_keybind {
        return Ok(Some(control::send_keybind_command("disable", id)));
    }
    if let Some(id) = &cli.toggle_keybind {
        return Ok(Some(control::send_keybind_command("toggle", id)));
    }
    if let Some(target) = &cli.workspace_switch {
        return Ok(Some(control::send_workspace_command(
            "switch",
            Some(target),
        )));
    }
    if cli.workspace_next {
        return Ok(Some(control::send_workspace_command("next", None)));
    }
    if cli.workspace_prev {
        return Ok(Some(control::send_workspace_command("prev", None)));
    }
    if cli.workspace_current {
        let workspace = control::query_workspace_current()?;
        println!("{workspace}");
        return Ok(Some(Ok(())));
    }
    if cli.enable_tiling {
        return Ok(Some(control::send_tiling_command("enable", None)));
    }
    if cli.disable_tiling {
        return Ok(Some(control::send_tiling_command("disable", None)));
    }
    if cli.toggle_tiling {
        return Ok(Some(control::send_tiling_command("toggle", None)));
    }
    if let Some(mode) = &cli.tiling_grid_mode {
        if !matches!(mode.as_str(), "on" | "off" | "toggle") {
            return Err(Error::Config(format!(
                "invalid tiling-grid-mode `{mode}` (use on|off|toggle)"
            )));
        }
        return Ok(Some(control::send_tiling_command("grid-mode", Some(mode))));
    }
    if cli.recalculate_tiling {
        return Ok(Some(control::send_tiling_command("recalculate", None)));
    }
    if cli.tiling_status {
        let status = control::query_tiling_status()?;
        println!("{status}");
        return Ok(Some(Ok(())));
    }
    Ok(None)
}

/// Running SUID would hand every spawned command elevated privileges.
fn die_on_detecting_suid() -> Result<()> {
    // Safety: plain libc id getters.
    unsafe {
        let euid = libc::geteuid();
        let egid = libc::getegid();
        if euid != 0 && egid != 0 {
            return Ok(());
        }
        if libc::getuid() == euid && libc::getgid() == egid {
            return Ok(());
        }
    }
    Err(Error::FatalInit("SUID detected - aborting".to_owned()))
}

fn init_logging(cli: &Cli) -> Result<()> {
    let default_filter = if cli.debug {
        "labwc=debug"
    } else if cli.verbose {
        "labwc=info"
    } else {
        "labwc=warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_writer(std::io::stderr),
    );

    match log_dir() {
        Some(dir) if fs::create_dir_all(&dir).is_ok() => {
            let file_appender = tracing_appender::rolling::never(&dir, "labwc.log");
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(file_appender),
                )
                .init();
        }
        _ => registry.init(),
    }
    Ok(())
}

fn log_dir() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("share"))
        })?;
    Some(base.join("labwc"))
}

fn cleanup_runtime_files() {
    let Ok(dir) = control::runtime_dir() else {
        return;
    };
    for file in [
        control::KEYBIND_CMD_FILE,
        control::WORKSPACE_CMD_FILE,
        control::TILING_CMD_FILE,
        control::WORKSPACE_STATUS_FILE,
        control::TILING_STATUS_FILE,
    ] {
        let _ = fs::remove_file(dir.join(file));
    }
}
