//! The compositor core aggregate.
//!
//! One `Server` owns all window-management state and is threaded through
//! every handler explicitly; the process-wide state is the configuration,
//! replaced atomically on reconfigure.

use std::{collections::HashMap, path::PathBuf, process::Command};

use calloop::{signals::Signal, LoopHandle, LoopSignal};

use crate::{
    config::{self, Config, LoadedConfig},
    control,
    cursor::CursorContext,
    cycle::CycleState,
    errors::Result,
    geo::Rect,
    keybind::{self, Keybind},
    keyboard::ConditionCtx,
    output::{Output, OutputId, Outputs},
    scene::Scene,
    seat::{InputMode, Keyboard, KeyboardId, Seat},
    view::{Placement, View, ViewId, ViewRegistry},
    workspaces::Workspaces,
};

pub struct Server {
    pub config: Config,
    pub config_path: Option<PathBuf>,
    pub loop_handle: Option<LoopHandle<'static, Server>>,
    pub loop_signal: Option<LoopSignal>,

    pub views: ViewRegistry,
    pub workspaces: Workspaces,
    pub outputs: Outputs,
    pub seat: Seat,
    pub scene: Scene,
    pub keybinds: Vec<Keybind>,

    pub input_mode: InputMode,
    pub cycle: Option<CycleState>,
    pub(crate) cancel_cycling_on_next_key_release: bool,
    pub session_locked: bool,

    pub tiling_enabled: bool,
    pub tiling_grid_mode: bool,
    pub anchor: Option<crate::tiling::Anchor>,

    pub pointer_context: CursorContext,
    pub runtime_dir: PathBuf,
    pub pending_vt_switch: Option<u32>,
    pub(crate) pending_closes: Vec<ViewId>,
    pub(crate) cur_keybind: Option<usize>,
    pub(crate) conditions: HashMap<u64, ConditionCtx>,
    pub(crate) next_condition_id: u64,
    pub primary_client_pid: Option<i32>,
}

impl Server {
    pub fn new(
        loop_handle: LoopHandle<'static, Server>,
        loop_signal: LoopSignal,
        loaded: LoadedConfig,
    ) -> Result<Self> {
        let runtime_dir = control::runtime_dir()?;
        let mut server = Self::with_parts(Some(loop_handle), Some(loop_signal), loaded, runtime_dir);
        server.write_status_files();
        Ok(server)
    }

    /// A server without an event loop attached: condition checks run
    /// synchronously and keybind repeat is disabled. Used by tests and
    /// by embedders that drive the core directly.
    pub fn new_headless(loaded: LoadedConfig) -> Self {
        let runtime_dir =
            std::env::temp_dir().join(format!("labwc-headless-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&runtime_dir);
        Self::with_parts(None, None, loaded, runtime_dir)
    }

    fn with_parts(
        loop_handle: Option<LoopHandle<'static, Server>>,
        loop_signal: Option<LoopSignal>,
        loaded: LoadedConfig,
        runtime_dir: PathBuf,
    ) -> Self {
        let config = loaded.config;
        let keybinds = build_keybinds(&config);
        let workspaces = Workspaces::new(&config.workspace_names);
        Self {
            tiling_enabled: config.tiling_enabled,
            tiling_grid_mode: config.tiling_grid_mode,
            config_path: loaded.path,
            loop_handle,
            loop_signal,
            views: ViewRegistry::default(),
            workspaces,
            outputs: Outputs::default(),
            seat: Seat::default(),
            scene: Scene::default(),
            keybinds,
            input_mode: InputMode::Passthrough,
            cycle: None,
            cancel_cycling_on_next_key_release: false,
            session_locked: false,
            anchor: None,
            pointer_context: CursorContext::default(),
            runtime_dir,
            pending_vt_switch: None,
            pending_closes: Vec::new(),
            cur_keybind: None,
            conditions: HashMap::new(),
            next_condition_id: 0,
            primary_client_pid: None,
            config,
        }
    }

    pub fn add_keyboard(&mut self, name: &str, is_virtual: bool) -> KeyboardId {
        let keyboard = Keyboard::new(
            name,
            is_virtual,
            self.config.repeat_rate,
            self.config.repeat_delay,
        );
        if !is_virtual {
            keybind::update_keycodes(&mut self.keybinds, &keyboard.keymap);
        }
        self.seat.add_keyboard(keyboard)
    }

    pub fn add_output(&mut self, name: &str, geometry: Rect) -> OutputId {
        let id = self.outputs.add(Output::new(name, geometry));
        tracing::info!(name, ?geometry, "output added");
        self.update_view_output_bindings();
        id
    }

    pub fn remove_output(&mut self, id: OutputId) {
        if let Some(output) = self.outputs.remove(id) {
            tracing::info!(name = output.name, "output removed");
        }
        self.update_view_output_bindings();
        self.arrange_tiled();
    }

    /// Refresh each view's primary output and intersection bitmask.
    pub fn update_view_output_bindings(&mut self) {
        let outputs: Vec<(OutputId, Rect)> = self
            .outputs
            .usable_iter()
            .map(|(id, output)| (id, output.geometry))
            .collect();
        let fallback = outputs.first().map(|(id, _)| *id);
        for view in self.views.iter_mut_unordered() {
            let mut mask = 0u64;
            let mut primary = None;
            for (id, geometry) in &outputs {
                if view.current.intersects(geometry) {
                    mask |= id.bit();
                    primary.get_or_insert(*id);
                }
            }
            view.outputs = mask;
            view.output = primary.or(view.output.filter(|id| {
                outputs.iter().any(|(existing, _)| existing == id)
            })).or(fallback);
        }
    }

    /// A client mapped a toplevel: resolve rules, bind it to an output
    /// and workspace, then focus and tile.
    pub fn view_mapped(&mut self, id: ViewId) {
        if self.views.map(id).is_err() {
            return;
        }
        let mut target_workspace = None;
        let mut want_focus = true;
        if let Ok(view) = self.views.get_mut(id) {
            view.apply_rules(&self.config);
        }
        if let Ok(view) = self.views.get(id) {
            for rule in &self.config.window_rules {
                if !rule.matches(view.app_id.as_deref(), view.title.as_deref()) {
                    continue;
                }
                if let Some(workspace) = rule.workspace {
                    target_workspace = Some(workspace);
                }
                if let Some(focus) = rule.focus {
                    want_focus = focus;
                }
            }
        }
        if let Some(index) = target_workspace {
            if index >= 1 && index <= self.workspaces.len() {
                let _ = self
                    .views
                    .replace_placement(id, Placement::Workspace(crate::workspaces::WorkspaceId(index - 1)));
            }
        }
        self.update_view_output_bindings();
        if want_focus {
            self.focus_view(id, true);
        }
        self.arrange_tiled();
        self.update_top_layer_visibility();
    }

    pub fn view_unmapped(&mut self, id: ViewId) {
        let _ = self.views.unmap(id);
        if self.seat.focused_view == Some(id) {
            self.focus_topmost_view();
        }
        if self.anchor.is_some_and(|anchor| anchor.view == id) {
            self.anchor = None;
        }
        self.arrange_tiled();
        self.update_top_layer_visibility();
    }

    pub fn view_destroyed(&mut self, id: ViewId) {
        self.view_unmapped(id);
        let _ = self.views.unregister(id);
        self.pending_closes.retain(|pending| *pending != id);
        if let Some(state) = self.cycle.as_mut() {
            state.entries.retain(|entry| *entry != id);
        }
    }

    /// Close requests queued by actions, drained by the shell glue which
    /// owns the actual xdg_toplevel handles.
    pub fn take_pending_closes(&mut self) -> Vec<ViewId> {
        std::mem::take(&mut self.pending_closes)
    }

    pub fn spawn_command(&mut self, command: &str) {
        tracing::debug!(command, "spawning");
        match Command::new("/bin/sh").arg("-c").arg(command).spawn() {
            Ok(child) => {
                // The SIGCHLD handler reaps it.
                drop(child);
            }
            Err(err) => tracing::error!("failed to spawn `{command}`: {err}"),
        }
    }

    /// Run `-s` startup command, the `-S` session client and the
    /// configured autostart entries. Called from an idle callback so
    /// clients find a ready compositor.
    pub fn run_startup_tasks(&mut self, startup: Option<&str>, session: Option<&str>) {
        if let Some(command) = session {
            match Command::new("/bin/sh").arg("-c").arg(command).spawn() {
                Ok(child) => {
                    self.primary_client_pid = Some(child.id() as i32);
                    drop(child);
                }
                Err(err) => {
                    tracing::error!("fatal error starting primary client `{command}`: {err}");
                    self.shutdown();
                    return;
                }
            }
        }
        let autostart = self.config.autostart.clone();
        for command in autostart {
            self.spawn_command(&command);
        }
        if let Some(command) = startup {
            self.spawn_command(command);
        }
    }

    pub fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::SIGUSR1 => self.process_control_files(),
            Signal::SIGHUP => self.reconfigure(),
            Signal::SIGTERM | Signal::SIGINT => self.shutdown(),
            Signal::SIGCHLD => self.reap_children(),
            other => tracing::debug!(?other, "ignoring signal"),
        }
    }

    /// Reap exited children; terminate with the `-S` session client.
    fn reap_children(&mut self) {
        loop {
            let mut status = 0;
            // Safety: plain waitpid with WNOHANG.
            let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
            if pid <= 0 {
                break;
            }
            if Some(pid) == self.primary_client_pid {
                tracing::info!("primary client exited, shutting down");
                self.shutdown();
            }
        }
    }

    /// SIGHUP: reload the configuration and rebuild everything derived
    /// from it. The old configuration is replaced as a whole; repeat
    /// timers and condition contexts never survive the rebuild.
    pub fn reconfigure(&mut self) {
        tracing::info!("reconfiguring");
        let loaded = match &self.config_path {
            Some(path) => config::load(Some(path.as_path()), None),
            None => config::load(None, None),
        };

        self.cancel_all_keybind_repeats();
        self.cancel_all_conditions();
        self.cur_keybind = None;

        self.config = loaded.config;
        self.config_path = loaded.path;
        self.keybinds = build_keybinds(&self.config);
        self.workspaces.rename_from(&self.config.workspace_names);

        if let Some(keymap) = self
            .seat
            .keyboards
            .iter()
            .find(|kb| !kb.is_virtual)
            .map(|kb| kb.keymap.clone())
        {
            keybind::update_keycodes(&mut self.keybinds, &keymap);
        }
        for kb in &mut self.seat.keyboards {
            kb.repeat_rate = self.config.repeat_rate;
            kb.repeat_delay = self.config.repeat_delay;
        }
        if self.config.kb_layout_per_window {
            for view in self.views.iter_mut_unordered() {
                view.keyboard_layout = 0;
            }
        }
        let config = self.config.clone();
        for view in self.views.iter_mut_unordered() {
            view.apply_rules(&config);
        }

        self.arrange_tiled();
        self.write_status_files();
    }

    /// Orderly shutdown: all timers and fd sources go before the
    /// keyboards do.
    pub fn shutdown(&mut self) {
        self.cancel_all_keybind_repeats();
        self.cancel_all_conditions();
        if let Some(signal) = &self.loop_signal {
            signal.stop();
        }
    }
}

fn build_keybinds(config: &Config) -> Vec<Keybind> {
    let mut keybinds = Vec::with_capacity(config.keybinds.len());
    for bind_config in &config.keybinds {
        match Keybind::from_config(bind_config) {
            Ok(bind) => keybinds.push(bind),
            Err(err) => {
                tracing::error!(trigger = bind_config.trigger, "skipping keybind: {err}");
            }
        }
    }
    keybinds
}

/// A fresh view for the shell glue to register before mapping.
pub fn new_toplevel_view(server: &Server) -> View {
    View::new(Placement::Workspace(server.workspaces.current()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::ViewCriteria;

    fn server() -> Server {
        Server::new_headless(LoadedConfig {
            path: None,
            config: Config::default(),
        })
    }

    #[test]
    fn keybinds_are_built_from_defaults() {
        let server = server();
        assert!(!server.keybinds.is_empty());
        assert_eq!(server.keybinds.len(), server.config.keybinds.len());
    }

    #[test]
    fn bad_keybind_configs_are_skipped_not_fatal() {
        let mut config = Config::default();
        config.keybinds.push(crate::config::KeybindConfig::new(
            "W-DoesNotExist",
            vec![crate::action::Action::Close],
        ));
        let expected = config.keybinds.len() - 1;
        let server = Server::new_headless(LoadedConfig { path: None, config });
        assert_eq!(server.keybinds.len(), expected);
    }

    #[test]
    fn mapped_view_lands_on_current_workspace_and_output() {
        let mut server = server();
        server.add_output("DP-1", Rect::new(0, 0, 1000, 600));
        let mut view = new_toplevel_view(&server);
        view.wants_focus = crate::view::FocusPolicy::Always;
        view.pending = Rect::new(0, 0, 100, 100);
        let id = server.views.register(view);
        server.view_mapped(id);

        let view = server.views.get(id).unwrap();
        assert!(view.mapped);
        assert!(view.output.is_some());
        assert_eq!(server.seat.focused_view, Some(id));
        assert_eq!(
            server
                .views
                .matching(ViewCriteria::CurrentWorkspace, server.workspaces.current()),
            vec![id]
        );
    }

    #[test]
    fn destroying_focused_view_moves_focus_on() {
        let mut server = server();
        server.add_output("DP-1", Rect::new(0, 0, 1000, 600));
        let ids: Vec<ViewId> = (0..2)
            .map(|_| {
                let mut view = new_toplevel_view(&server);
                view.wants_focus = crate::view::FocusPolicy::Always;
                view.pending = Rect::new(0, 0, 100, 100);
                let id = server.views.register(view);
                server.view_mapped(id);
                id
            })
            .collect();
        assert_eq!(server.seat.focused_view, Some(ids[1]));
        server.view_destroyed(ids[1]);
        assert_eq!(server.seat.focused_view, Some(ids[0]));
        assert!(!server.views.contains(ids[1]));
    }

    #[test]
    fn reconfigure_resets_transient_keybind_state() {
        let mut server = server();
        server.cur_keybind = Some(0);
        server.reconfigure();
        assert_eq!(server.cur_keybind, None);
        assert!(server.conditions.is_empty());
    }

    #[test]
    fn output_hotplug_rebinds_views() {
        let mut server = server();
        let first = server.add_output("DP-1", Rect::new(0, 0, 1000, 600));
        let mut view = new_toplevel_view(&server);
        view.pending = Rect::new(100, 100, 200, 200);
        let id = server.views.register(view);
        server.view_mapped(id);
        assert_eq!(server.views.get(id).unwrap().output, Some(first));

        let second = server.add_output("DP-2", Rect::new(1000, 0, 1000, 600));
        server.remove_output(first);
        assert_eq!(server.views.get(id).unwrap().output, Some(second));
    }
}
