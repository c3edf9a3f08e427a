//! Actions: the operations keybinds, menus and the control channel
//! dispatch into the window-management core.

use crate::{
    cycle::CycleDir,
    errors::{Error, Result},
    server::Server,
    view::{Placement, ViewAxis, ViewId},
    workspaces::WorkspaceId,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Execute { command: String },
    Close,
    Iconify,
    Raise,
    Lower,
    ToggleMaximize,
    ToggleFullscreen,
    ToggleAlwaysOnTop,
    ToggleAlwaysOnBottom,
    NextWindow,
    PreviousWindow,
    GoToDesktop { target: String },
    SendToDesktop { target: String },
    EnableTiling,
    DisableTiling,
    ToggleTiling,
    ToggleTilingGridMode,
    RecalculateTiling,
    EnableKeybind { id: String },
    DisableKeybind { id: String },
    ToggleKeybind { id: String },
    Reconfigure,
    Exit,
}

impl Action {
    /// Stable name, used for config parsing and the per-view
    /// action-inhibit lists.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Execute { .. } => "Execute",
            Action::Close => "Close",
            Action::Iconify => "Iconify",
            Action::Raise => "Raise",
            Action::Lower => "Lower",
            Action::ToggleMaximize => "ToggleMaximize",
            Action::ToggleFullscreen => "ToggleFullscreen",
            Action::ToggleAlwaysOnTop => "ToggleAlwaysOnTop",
            Action::ToggleAlwaysOnBottom => "ToggleAlwaysOnBottom",
            Action::NextWindow => "NextWindow",
            Action::PreviousWindow => "PreviousWindow",
            Action::GoToDesktop { .. } => "GoToDesktop",
            Action::SendToDesktop { .. } => "SendToDesktop",
            Action::EnableTiling => "EnableTiling",
            Action::DisableTiling => "DisableTiling",
            Action::ToggleTiling => "ToggleTiling",
            Action::ToggleTilingGridMode => "ToggleTilingGridMode",
            Action::RecalculateTiling => "RecalculateTiling",
            Action::EnableKeybind { .. } => "EnableKeybind",
            Action::DisableKeybind { .. } => "DisableKeybind",
            Action::ToggleKeybind { .. } => "ToggleKeybind",
            Action::Reconfigure => "Reconfigure",
            Action::Exit => "Exit",
        }
    }

    /// Parse `Name` or `Name argument` from a config value.
    pub fn parse(input: &str) -> Result<Action> {
        let input = input.trim();
        let (name, argument) = match input.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, Some(argument.trim())),
            None => (input, None),
        };

        let needs_arg = || {
            argument
                .filter(|argument| !argument.is_empty())
                .map(str::to_owned)
                .ok_or_else(|| Error::Config(format!("action {name} needs an argument")))
        };

        match name {
            "Execute" => Ok(Action::Execute {
                command: needs_arg()?,
            }),
            "Close" => Ok(Action::Close),
            "Iconify" => Ok(Action::Iconify),
            "Raise" => Ok(Action::Raise),
            "Lower" => Ok(Action::Lower),
            "ToggleMaximize" => Ok(Action::ToggleMaximize),
            "ToggleFullscreen" => Ok(Action::ToggleFullscreen),
            "ToggleAlwaysOnTop" => Ok(Action::ToggleAlwaysOnTop),
            "ToggleAlwaysOnBottom" => Ok(Action::ToggleAlwaysOnBottom),
            "NextWindow" => Ok(Action::NextWindow),
            "PreviousWindow" => Ok(Action::PreviousWindow),
            "GoToDesktop" => Ok(Action::GoToDesktop {
                target: needs_arg()?,
            }),
            "SendToDesktop" => Ok(Action::SendToDesktop {
                target: needs_arg()?,
            }),
            "EnableTiling" => Ok(Action::EnableTiling),
            "DisableTiling" => Ok(Action::DisableTiling),
            "ToggleTiling" => Ok(Action::ToggleTiling),
            "ToggleTilingGridMode" => Ok(Action::ToggleTilingGridMode),
            "RecalculateTiling" => Ok(Action::RecalculateTiling),
            "EnableKeybind" => Ok(Action::EnableKeybind { id: needs_arg()? }),
            "DisableKeybind" => Ok(Action::DisableKeybind { id: needs_arg()? }),
            "ToggleKeybind" => Ok(Action::ToggleKeybind { id: needs_arg()? }),
            "Reconfigure" => Ok(Action::Reconfigure),
            "Exit" => Ok(Action::Exit),
            other => Err(Error::Config(format!("unknown action `{other}`"))),
        }
    }
}

impl Server {
    pub fn run_actions(&mut self, actions: &[Action]) {
        for action in actions {
            self.run_action(action.clone());
        }
    }

    pub fn run_action(&mut self, action: Action) {
        tracing::debug!(action = action.name(), "running action");
        match action {
            Action::Execute { command } => self.spawn_command(&command),
            Action::Close => self.close_focused_view(),
            Action::Iconify => {
                if let Some(id) = self.seat.focused_view {
                    if let Err(err) = self.views.minimize(id, true) {
                        tracing::debug!("iconify failed: {err}");
                    }
                    self.focus_topmost_view();
                    self.arrange_tiled();
                }
            }
            Action::Raise => {
                if let Some(id) = self.seat.focused_view {
                    self.move_view_to_front(id);
                }
            }
            Action::Lower => {
                if let Some(id) = self.seat.focused_view {
                    self.move_view_to_back(id);
                }
            }
            Action::ToggleMaximize => self.toggle_maximize_focused(),
            Action::ToggleFullscreen => self.toggle_fullscreen_focused(),
            Action::ToggleAlwaysOnTop => {
                self.toggle_band_placement(Placement::AlwaysOnTop);
            }
            Action::ToggleAlwaysOnBottom => {
                self.toggle_band_placement(Placement::AlwaysOnBottom);
            }
            Action::NextWindow => self.cycle_begin_or_step(CycleDir::Forward),
            Action::PreviousWindow => self.cycle_begin_or_step(CycleDir::Backward),
            Action::GoToDesktop { target } => {
                if let Some(workspace) = self.resolve_workspace_target(&target) {
                    self.switch_workspace(workspace, true);
                    self.arrange_tiled();
                }
            }
            Action::SendToDesktop { target } => {
                let Some(workspace) = self.resolve_workspace_target(&target) else {
                    return;
                };
                if let Some(id) = self.seat.focused_view {
                    self.send_view_to_workspace(id, workspace);
                    self.focus_topmost_view();
                    self.arrange_tiled();
                }
            }
            Action::EnableTiling => self.set_tiling_enabled(true),
            Action::DisableTiling => self.set_tiling_enabled(false),
            Action::ToggleTiling => self.set_tiling_enabled(!self.tiling_enabled),
            Action::ToggleTilingGridMode => {
                self.set_tiling_grid_mode(!self.tiling_grid_mode);
            }
            Action::RecalculateTiling => {
                self.arrange_tiled();
                self.write_status_files();
            }
            Action::EnableKeybind { id } => self.set_keybind_enabled(&id, Some(true)),
            Action::DisableKeybind { id } => self.set_keybind_enabled(&id, Some(false)),
            Action::ToggleKeybind { id } => self.set_keybind_enabled(&id, None),
            Action::Reconfigure => self.reconfigure(),
            Action::Exit => self.shutdown(),
        }
    }

    fn resolve_workspace_target(&self, target: &str) -> Option<WorkspaceId> {
        match target {
            "next" => Some(self.workspaces.next()),
            "prev" | "previous" => Some(self.workspaces.prev()),
            other => self.workspaces.lookup(other),
        }
    }

    fn close_focused_view(&mut self) {
        if let Some(id) = self.seat.focused_view {
            tracing::info!("closing focused window");
            self.request_close(id);
        }
    }

    fn toggle_maximize_focused(&mut self) {
        let Some(id) = self.seat.focused_view else {
            return;
        };
        let Ok(view) = self.views.get(id) else {
            return;
        };
        let axis = if view.maximized == ViewAxis::None {
            ViewAxis::Both
        } else {
            ViewAxis::None
        };
        let usable = view
            .output
            .and_then(|output| self.outputs.get(output))
            .map(|output| output.usable);
        let store = axis != ViewAxis::None;
        match self.views.maximize(id, axis, store, usable) {
            Ok(()) | Err(Error::NotMapped) => {}
            Err(err) => tracing::debug!("maximize failed: {err}"),
        }
    }

    fn toggle_fullscreen_focused(&mut self) {
        let Some(id) = self.seat.focused_view else {
            return;
        };
        let Ok(view) = self.views.get(id) else {
            return;
        };
        let fullscreen = !view.fullscreen;
        let geometry = view
            .output
            .and_then(|output| self.outputs.get(output))
            .map(|output| output.geometry);
        match self.views.set_fullscreen(id, fullscreen, geometry) {
            Ok(()) | Err(Error::NotMapped) => {}
            Err(err) => tracing::debug!("fullscreen toggle failed: {err}"),
        }
        self.update_top_layer_visibility();
        self.arrange_tiled();
    }

    fn toggle_band_placement(&mut self, band: Placement) {
        let Some(id) = self.seat.focused_view else {
            return;
        };
        let Ok(view) = self.views.get(id) else {
            return;
        };
        let placement = if view.placement == band {
            Placement::Workspace(self.workspaces.current())
        } else {
            band
        };
        let _ = self.views.replace_placement(id, placement);
        self.update_top_layer_visibility();
        self.arrange_tiled();
    }

    pub fn set_tiling_enabled(&mut self, enabled: bool) {
        if self.tiling_enabled != enabled {
            self.tiling_enabled = enabled;
            tracing::info!(enabled, "tiling mode changed");
        }
        if enabled {
            self.arrange_tiled();
        }
        self.write_status_files();
    }

    pub fn set_tiling_grid_mode(&mut self, grid_mode: bool) {
        if self.tiling_grid_mode != grid_mode {
            self.tiling_grid_mode = grid_mode;
            tracing::info!(grid_mode, "tiling grid mode changed");
        }
        self.arrange_tiled();
        self.write_status_files();
    }

    /// Flip or set a toggleable keybind by id. Non-toggleable binds are
    /// left alone so config-pinned bindings cannot be disabled from
    /// scripts.
    pub(crate) fn set_keybind_enabled(&mut self, id: &str, enabled: Option<bool>) {
        let Some(bind) = crate::keybind::find_by_id(&mut self.keybinds, id) else {
            tracing::warn!("no keybind with id `{id}`");
            return;
        };
        if !bind.toggleable {
            tracing::warn!("keybind `{id}` is not toggleable");
            return;
        }
        bind.enabled = enabled.unwrap_or(!bind.enabled);
        tracing::debug!(id, enabled = bind.enabled, "keybind state changed");
    }

    /// Ask the client to close; the view goes away on its unmap.
    pub fn request_close(&mut self, id: ViewId) {
        self.pending_closes.push(id);
    }
}
