//! Out-of-band control channel.
//!
//! CLI invocations write a command line into a file under
//! `$XDG_RUNTIME_DIR` and poke the running compositor with SIGUSR1; the
//! server reads each command file once, dispatches into the ordinary
//! action handlers, and rewrites the status files scripts read back.

use std::{fs, path::PathBuf};

use crate::{
    action::Action,
    errors::{Error, Result},
    server::Server,
};

pub const KEYBIND_CMD_FILE: &str = "labwc-keybind-cmd";
pub const WORKSPACE_CMD_FILE: &str = "labwc-workspace-cmd";
pub const TILING_CMD_FILE: &str = "labwc-tiling-cmd";
pub const WORKSPACE_STATUS_FILE: &str = "labwc-workspace-current";
pub const TILING_STATUS_FILE: &str = "labwc-tiling-status";

pub const PID_ENV: &str = "LABWC_PID";

/// Runtime directory holding command and status files.
pub fn runtime_dir() -> Result<PathBuf> {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| Error::FatalInit("XDG_RUNTIME_DIR not set".to_owned()))
}

fn compositor_pid() -> Result<i32> {
    let pid = std::env::var(PID_ENV)
        .map_err(|_| Error::FatalInit(format!("{PID_ENV} not set - labwc is not running")))?;
    let pid: i32 = pid
        .parse()
        .map_err(|_| Error::FatalInit(format!("invalid {PID_ENV} value `{pid}`")))?;
    if pid <= 0 {
        return Err(Error::FatalInit(
            "refusing to signal pid 0".to_owned(),
        ));
    }
    Ok(pid)
}

pub fn signal_compositor(signal: i32) -> Result<()> {
    let pid = compositor_pid()?;
    // Command files are written and closed before this point, so the
    // server sees complete lines when the signal arrives.
    if unsafe { libc::kill(pid, signal) } != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

fn send_command(file_name: &str, line: &str) -> Result<()> {
    let dir = runtime_dir()?;
    compositor_pid()?;
    fs::write(dir.join(file_name), format!("{line}\n"))?;
    signal_compositor(libc::SIGUSR1)
}

pub fn send_keybind_command(command: &str, id: &str) -> Result<()> {
    send_command(KEYBIND_CMD_FILE, &format!("{command} {id}"))
}

pub fn send_workspace_command(command: &str, argument: Option<&str>) -> Result<()> {
    let line = match argument {
        Some(argument) => format!("{command} {argument}"),
        None => command.to_owned(),
    };
    send_command(WORKSPACE_CMD_FILE, &line)
}

pub fn send_tiling_command(command: &str, argument: Option<&str>) -> Result<()> {
    let line = match argument {
        Some(argument) => format!("{command} {argument}"),
        None => command.to_owned(),
    };
    send_command(TILING_CMD_FILE, &line)
}

fn read_status_file(file_name: &str) -> Result<String> {
    let path = runtime_dir()?.join(file_name);
    let content = fs::read_to_string(&path)
        .map_err(|err| Error::FatalInit(format!("failed to read {}: {err}", path.display())))?;
    Ok(content.trim_end().to_owned())
}

pub fn query_workspace_current() -> Result<String> {
    read_status_file(WORKSPACE_STATUS_FILE)
}

pub fn query_tiling_status() -> Result<String> {
    read_status_file(TILING_STATUS_FILE)
}

impl Server {
    /// SIGUSR1 handler: best-effort read of every command file. Bad lines
    /// are logged and ignored; the files are consumed so a command never
    /// runs twice.
    pub fn process_control_files(&mut self) {
        for (file_name, kind) in [
            (KEYBIND_CMD_FILE, CommandKind::Keybind),
            (WORKSPACE_CMD_FILE, CommandKind::Workspace),
            (TILING_CMD_FILE, CommandKind::Tiling),
        ] {
            let path = self.runtime_dir.join(file_name);
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    tracing::warn!(path = %path.display(), "failed to read command file: {err}");
                    continue;
                }
            };
            if let Err(err) = fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), "failed to remove command file: {err}");
            }
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                self.dispatch_control_line(kind, line);
            }
        }
        self.write_status_files();
    }

    pub(crate) fn dispatch_control_line(&mut self, kind: CommandKind, line: &str) {
        let (command, argument) = match line.split_once(char::is_whitespace) {
            Some((command, argument)) => (command, Some(argument.trim())),
            None => (line, None),
        };

        let action = match kind {
            CommandKind::Keybind => match (command, argument) {
                ("enable", Some(id)) => Some(Action::EnableKeybind { id: id.to_owned() }),
                ("disable", Some(id)) => Some(Action::DisableKeybind { id: id.to_owned() }),
                ("toggle", Some(id)) => Some(Action::ToggleKeybind { id: id.to_owned() }),
                _ => None,
            },
            CommandKind::Workspace => match (command, argument) {
                ("switch", Some(target)) => Some(Action::GoToDesktop {
                    target: target.to_owned(),
                }),
                ("next", None) => Some(Action::GoToDesktop {
                    target: "next".to_owned(),
                }),
                ("prev", None) => Some(Action::GoToDesktop {
                    target: "prev".to_owned(),
                }),
                _ => None,
            },
            CommandKind::Tiling => match (command, argument) {
                ("enable", None) => Some(Action::EnableTiling),
                ("disable", None) => Some(Action::DisableTiling),
                ("toggle", None) => Some(Action::ToggleTiling),
                ("recalculate", None) => Some(Action::RecalculateTiling),
                ("grid-mode", Some("on")) => {
                    self.set_tiling_grid_mode(true);
                    None
                }
                ("grid-mode", Some("off")) => {
                    self.set_tiling_grid_mode(false);
                    None
                }
                ("grid-mode", Some("toggle")) => {
                    self.set_tiling_grid_mode(!self.tiling_grid_mode);
                    None
                }
                _ => None,
            },
        };

        match action {
            Some(action) => self.run_action(action),
            None if matches!(kind, CommandKind::Tiling) && command == "grid-mode" => {}
            None => tracing::warn!(?kind, line, "unrecognized control command"),
        }
    }

    /// Rewrite the files query commands read. Written whole and closed so
    /// readers never see a torn line.
    pub fn write_status_files(&mut self) {
        let workspace = self.workspaces.name(self.workspaces.current()).to_owned();
        self.write_status_file(WORKSPACE_STATUS_FILE, &workspace);
        let tiling = self.tiling_status().to_owned();
        self.write_status_file(TILING_STATUS_FILE, &tiling);
    }

    pub fn tiling_status(&self) -> &'static str {
        if !self.tiling_enabled {
            "stacking"
        } else if self.tiling_grid_mode {
            "grid"
        } else {
            "smart"
        }
    }

    fn write_status_file(&self, file_name: &str, content: &str) {
        let path = self.runtime_dir.join(file_name);
        if let Err(err) = fs::write(&path, format!("{content}\n")) {
            tracing::warn!(path = %path.display(), "failed to write status file: {err}");
        }
    }

    pub fn set_runtime_dir(&mut self, dir: &std::path::Path) {
        self.runtime_dir = dir.to_path_buf();
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum CommandKind {
    Keybind,
    Workspace,
    Tiling,
}
