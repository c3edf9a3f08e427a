//! Command-file round trips through the control channel.

use std::{fs, path::PathBuf};

use labwc::{
    config::{Config, KeybindConfig, LoadedConfig},
    control,
    keyboard::{KeyEvent, KeyState},
    keymap::Modifiers,
    seat::ClientEvent,
    server::Server,
};

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("labwc-ctl-{}-{tag}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn server_in(dir: &PathBuf, config: Config) -> Server {
    let mut server = Server::new_headless(LoadedConfig { path: None, config });
    server.set_runtime_dir(dir);
    server.write_status_files();
    server
}

#[test]
fn workspace_commands_update_state_and_status_file() {
    let dir = scratch_dir("workspace");
    let mut server = server_in(&dir, Config::default());

    fs::write(dir.join(control::WORKSPACE_CMD_FILE), "switch 2\n").unwrap();
    server.process_control_files();
    assert_eq!(server.workspaces.name(server.workspaces.current()), "2");
    let status = fs::read_to_string(dir.join(control::WORKSPACE_STATUS_FILE)).unwrap();
    assert_eq!(status.trim(), "2");

    // The command file is consumed: a second signal is a no-op.
    fs::write(dir.join(control::WORKSPACE_CMD_FILE), "next\n").unwrap();
    server.process_control_files();
    server.process_control_files();
    assert_eq!(server.workspaces.name(server.workspaces.current()), "3");
}

#[test]
fn workspace_switch_round_trip_preserves_stacking() {
    let dir = scratch_dir("roundtrip");
    let mut server = server_in(&dir, Config::default());
    use labwc::view::{FocusPolicy, Placement, View};
    use labwc::workspaces::WorkspaceId;
    for workspace in [0usize, 0, 1] {
        let mut view = View::new(Placement::Workspace(WorkspaceId(workspace)));
        view.wants_focus = FocusPolicy::Always;
        let id = server.views.register(view);
        server.views.map(id).unwrap();
    }

    fs::write(dir.join(control::WORKSPACE_CMD_FILE), "switch 1\n").unwrap();
    server.process_control_files();
    let reference = server.views.stacking().to_vec();

    for target in ["switch 2", "switch 1"] {
        fs::write(dir.join(control::WORKSPACE_CMD_FILE), format!("{target}\n")).unwrap();
        server.process_control_files();
    }
    assert_eq!(server.views.stacking(), reference.as_slice());
}

#[test]
fn tiling_status_file_always_names_a_valid_mode() {
    let dir = scratch_dir("tiling");
    let mut server = server_in(&dir, Config::default());

    let read_status = |dir: &PathBuf| {
        fs::read_to_string(dir.join(control::TILING_STATUS_FILE))
            .unwrap()
            .trim()
            .to_owned()
    };
    assert_eq!(read_status(&dir), "stacking");

    for (line, expected) in [
        ("enable", "smart"),
        ("grid-mode on", "grid"),
        ("grid-mode toggle", "smart"),
        ("grid-mode off", "smart"),
        ("disable", "stacking"),
        ("toggle", "smart"),
        ("recalculate", "smart"),
        ("nonsense", "smart"),
    ] {
        fs::write(dir.join(control::TILING_CMD_FILE), format!("{line}\n")).unwrap();
        server.process_control_files();
        assert_eq!(read_status(&dir), expected, "after `{line}`");
        assert!(["stacking", "grid", "smart"].contains(&read_status(&dir).as_str()));
    }
}

#[test]
fn keybind_disable_forwards_enable_consumes() {
    let dir = scratch_dir("keybind");
    let mut config = Config::default();
    let mut bind = KeybindConfig::new("W-t", vec![labwc::action::Action::ToggleTiling]);
    bind.id = Some("mute".to_owned());
    bind.toggleable = true;
    config.keybinds = vec![bind];
    let mut server = server_in(&dir, config);
    let keyboard = server.add_keyboard("AT Translated Set 2 keyboard", false);
    server.handle_modifiers(keyboard, Modifiers::LOGO);
    server.seat.drain_events();

    const KEY_T: u32 = 20;
    let press = KeyEvent {
        keycode: KEY_T,
        state: KeyState::Pressed,
        time_msec: 100,
    };
    let release = KeyEvent {
        keycode: KEY_T,
        state: KeyState::Released,
        time_msec: 110,
    };

    fs::write(dir.join(control::KEYBIND_CMD_FILE), "disable mute\n").unwrap();
    server.process_control_files();
    server.handle_key_event(keyboard, press);
    server.handle_key_event(keyboard, release);
    assert!(!server.tiling_enabled);
    let forwarded: Vec<bool> = server
        .seat
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            ClientEvent::Key { pressed, .. } => Some(pressed),
            _ => None,
        })
        .collect();
    assert_eq!(forwarded, vec![true, false]);

    fs::write(dir.join(control::KEYBIND_CMD_FILE), "enable mute\n").unwrap();
    server.process_control_files();
    server.handle_key_event(keyboard, press);
    server.handle_key_event(keyboard, release);
    assert!(server.tiling_enabled);
    assert!(server
        .seat
        .drain_events()
        .iter()
        .all(|event| !matches!(event, ClientEvent::Key { .. })));

    // Toggling twice lands back where it started.
    for _ in 0..2 {
        fs::write(dir.join(control::KEYBIND_CMD_FILE), "toggle mute\n").unwrap();
        server.process_control_files();
    }
    assert!(server.keybinds[0].enabled);
}
