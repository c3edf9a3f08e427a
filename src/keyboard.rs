//! The keybinding engine: key event routing, bound-key bookkeeping, key
//! repeat and asynchronous condition gating.

use std::{
    io::Read,
    os::fd::AsRawFd,
    process::{Child, Command, Stdio},
    time::Duration,
};

use calloop::{
    generic::Generic,
    timer::{TimeoutAction, Timer},
    Interest, Mode, PostAction, RegistrationToken,
};
use xkeysym::Keysym;

use crate::{
    cycle::CycleDir,
    keymap::{is_modifier_key, keysym_to_lower, vt_from_keysym, Modifiers, EVDEV_OFFSET},
    seat::{InputMode, KeyboardId, KeybindRepeat, MenuKey},
    server::Server,
};

/// Conditions that have not produced EOF by then are abandoned.
pub const CONDITION_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    Released,
}

#[derive(Clone, Copy, Debug)]
pub struct KeyEvent {
    /// evdev keycode, as delivered by the input backend.
    pub keycode: u32,
    pub state: KeyState,
    pub time_msec: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyHandled {
    No,
    Yes,
    YesAndVtChanged,
}

/// Everything about one physical key press, resolved against the
/// keyboard's keymap before any matching starts.
struct KeyInfo {
    xkb_keycode: u32,
    translated: Vec<Keysym>,
    raw: Vec<Keysym>,
    modifiers: Modifiers,
    is_modifier: bool,
}

pub(crate) enum ConditionOutcome {
    /// No condition attached; run the actions immediately.
    RunNow,
    /// The condition command is running; actions follow on its EOF.
    InFlight,
    /// The command could not be spawned or did not match; treat the bind
    /// as if the condition were false.
    Failed,
}

pub(crate) struct ConditionCtx {
    pub bind: usize,
    pub keyboard: KeyboardId,
    pub keycode: u32,
    pub time_msec: u32,
    pub buf: Vec<u8>,
    pub read_token: Option<RegistrationToken>,
    pub timeout_token: Option<RegistrationToken>,
    pub child: Child,
}

impl Server {
    /// Entry point for every keyboard key event.
    pub fn handle_key_event(&mut self, keyboard: KeyboardId, event: KeyEvent) {
        // Any new press or release cancels the current keybind repeat.
        self.cancel_keybind_repeat(keyboard);

        let handled = self.handle_compositor_keybindings(keyboard, &event);
        if handled == KeyHandled::YesAndVtChanged {
            return;
        }

        if handled == KeyHandled::Yes {
            // No repeat for modifiers (it is only for our own keybinds and
            // breaks modifier-onRelease bindings) and none for
            // condition-gated binds (each repeat would spawn a command).
            let condition_gated = self
                .cur_keybind
                .and_then(|index| self.keybinds.get(index))
                .is_some_and(|bind| bind.condition.is_some());
            if event.state == KeyState::Pressed
                && !condition_gated
                && !self.key_is_modifier(keyboard, event.keycode)
            {
                self.start_keybind_repeat(keyboard, event.keycode);
            }
        } else {
            self.seat
                .notify_key(event.time_msec, event.keycode, event.state == KeyState::Pressed);
        }
    }

    /// Modifier-state change from one keyboard.
    pub fn handle_modifiers(&mut self, keyboard: KeyboardId, modifiers: Modifiers) {
        let Some(kb) = self.seat.keyboard_mut(keyboard) else {
            return;
        };
        kb.modifiers = modifiers;
        let from_virtual = kb.is_virtual;

        // Letting go of the last modifier ends window cycling, unless a
        // bound key is still held: some X clients see the held key as
        // pressed and would repeat it forever if we both absorbed the
        // release and switched focus now.
        if self.input_mode == InputMode::Cycle && self.seat.all_modifiers().is_empty() {
            if self.seat.nr_bound_keys() > 0 {
                self.cancel_cycling_on_next_key_release = true;
            } else {
                self.cancel_cycling_on_next_key_release = false;
                self.cycle_finish(true);
            }
        }

        if self.seat.ime_grab_active {
            return;
        }
        self.seat.notify_modifiers(from_virtual, modifiers);
    }

    fn key_is_modifier(&self, keyboard: KeyboardId, keycode: u32) -> bool {
        let Some(kb) = self.seat.keyboard(keyboard) else {
            return false;
        };
        kb.keymap
            .raw_syms(keycode + EVDEV_OFFSET, kb.layout)
            .iter()
            .any(|sym| is_modifier_key(*sym))
    }

    fn get_keyinfo(&self, keyboard: KeyboardId, evdev_keycode: u32) -> Option<KeyInfo> {
        let kb = self.seat.keyboard(keyboard)?;
        let xkb_keycode = evdev_keycode + EVDEV_OFFSET;
        // `modifiers` is the state from before this event; the key in
        // hand is classified separately via its translated keysyms.
        let translated = kb
            .keymap
            .translated_syms(xkb_keycode, kb.layout, kb.modifiers);
        let raw = kb.keymap.raw_syms(xkb_keycode, kb.layout);
        let is_modifier = translated.iter().any(|sym| is_modifier_key(*sym));
        Some(KeyInfo {
            xkb_keycode,
            translated,
            raw,
            modifiers: kb.modifiers,
            is_modifier,
        })
    }

    fn handle_compositor_keybindings(
        &mut self,
        keyboard: KeyboardId,
        event: &KeyEvent,
    ) -> KeyHandled {
        let Some(keyinfo) = self.get_keyinfo(keyboard, event.keycode) else {
            return KeyHandled::No;
        };
        let locked = self.session_locked;

        self.seat
            .key_state_set_pressed(event.keycode, event.state == KeyState::Pressed);

        if event.state == KeyState::Released {
            if let Some(bind_index) = self.cur_keybind.take() {
                if self
                    .keybinds
                    .get(bind_index)
                    .is_some_and(|bind| bind.on_release)
                {
                    self.seat.bound_key_remove(event.keycode);
                    if locked
                        && !self.keybinds[bind_index].allow_when_locked
                    {
                        return KeyHandled::Yes;
                    }
                    match self.check_keybind_condition(
                        bind_index,
                        keyboard,
                        event.keycode,
                        event.time_msec,
                    ) {
                        ConditionOutcome::RunNow => {
                            let actions = self.keybinds[bind_index].actions.clone();
                            self.run_actions(&actions);
                        }
                        ConditionOutcome::InFlight | ConditionOutcome::Failed => {}
                    }
                    // The release of an on_release bind is always consumed.
                    return KeyHandled::Yes;
                }
                self.cur_keybind = Some(bind_index);
            }
            return self.handle_key_release(event.keycode);
        }

        // C-A-F1 .. C-A-F12 switch the virtual terminal no matter what.
        if let Some(vt) = self.handle_change_vt_key(keyboard, &keyinfo.translated) {
            self.seat.store_pressed_key_as_bound(event.keycode);
            self.pending_vt_switch = Some(vt);
            return KeyHandled::YesAndVtChanged;
        }

        // Compositor bindings are ignored while the session is locked;
        // this comes after key_state_set_pressed() so every press and
        // release is still registered.
        if !locked {
            if self.input_mode == InputMode::Menu {
                self.seat.store_pressed_key_as_bound(event.keycode);
                self.handle_menu_keys(&keyinfo.translated);
                return KeyHandled::Yes;
            }
            if self.input_mode == InputMode::Cycle && self.handle_cycle_view_key(&keyinfo) {
                self.seat.store_pressed_key_as_bound(event.keycode);
                return KeyHandled::Yes;
            }
        }

        let device_name = self
            .seat
            .keyboard(keyboard)
            .map(|kb| kb.name.clone());
        let is_virtual = self
            .seat
            .keyboard(keyboard)
            .is_some_and(|kb| kb.is_virtual);

        self.cur_keybind = self.match_keybinding(&keyinfo, is_virtual, device_name.as_deref());
        let Some(bind_index) = self.cur_keybind else {
            return KeyHandled::No;
        };
        if locked && !self.keybinds[bind_index].allow_when_locked {
            return KeyHandled::No;
        }

        if self.keybinds[bind_index].on_release {
            // Consumed now, fired on release.
            self.seat.store_pressed_key_as_bound(event.keycode);
            return KeyHandled::Yes;
        }

        match self.check_keybind_condition(bind_index, keyboard, event.keycode, event.time_msec) {
            ConditionOutcome::RunNow => {
                self.seat.store_pressed_key_as_bound(event.keycode);
                let actions = self.keybinds[bind_index].actions.clone();
                self.run_actions(&actions);
                KeyHandled::Yes
            }
            ConditionOutcome::InFlight => {
                // Absorb the press; it is re-injected later if the
                // condition does not match.
                self.seat.store_pressed_key_as_bound(event.keycode);
                KeyHandled::Yes
            }
            ConditionOutcome::Failed => {
                self.cur_keybind = None;
                KeyHandled::No
            }
        }
    }

    /// Release events for keys that were never bound must reach clients,
    /// otherwise they get stuck keys.
    fn handle_key_release(&mut self, keycode: u32) -> KeyHandled {
        if !self.seat.corresponding_press_was_bound(keycode) {
            return KeyHandled::No;
        }

        // The user let go of the modifier before the cycled key; finish
        // only now that the non-modifier key is released too.
        if self.cancel_cycling_on_next_key_release {
            self.cancel_cycling_on_next_key_release = false;
            self.cycle_finish(true);
        }

        self.seat.bound_key_remove(keycode);
        KeyHandled::Yes
    }

    fn handle_change_vt_key(&mut self, keyboard: KeyboardId, translated: &[Keysym]) -> Option<u32> {
        let vt = translated.iter().find_map(|sym| vt_from_keysym(*sym))?;
        self.cancel_keybind_repeat(keyboard);
        Some(vt)
    }

    fn handle_menu_keys(&mut self, translated: &[Keysym]) {
        debug_assert_eq!(self.input_mode, InputMode::Menu);
        for sym in translated {
            let key = match *sym {
                Keysym::Down => MenuKey::Down,
                Keysym::Up => MenuKey::Up,
                Keysym::Right => MenuKey::EnterSubmenu,
                Keysym::Left => MenuKey::LeaveSubmenu,
                Keysym::Return | Keysym::KP_Enter => MenuKey::Activate,
                Keysym::Escape => MenuKey::Close,
                _ => continue,
            };
            if key == MenuKey::Close {
                self.input_mode = InputMode::Passthrough;
                self.update_pointer_focus();
            }
            self.seat
                .events
                .push_back(crate::seat::ClientEvent::MenuNavigate(key));
            break;
        }
    }

    /// Returns true if the keystroke is consumed. Only non-modifier keys
    /// steer the window switcher.
    fn handle_cycle_view_key(&mut self, keyinfo: &KeyInfo) -> bool {
        if keyinfo.is_modifier {
            return false;
        }
        for sym in &keyinfo.translated {
            match *sym {
                Keysym::Escape => {
                    self.cycle_finish(false);
                    return true;
                }
                Keysym::Up | Keysym::Left => {
                    self.cycle_step(CycleDir::Backward);
                    return true;
                }
                Keysym::Down | Keysym::Right => {
                    self.cycle_step(CycleDir::Forward);
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    /// Match a physical press against the keybind list.
    ///
    /// Precedence: keycodes first (so binds keep working when another
    /// layout is active), then translated keysyms (so `KP_1` with NumLock
    /// or layout-specific syms like ö match), then raw keysyms (so `S-1`
    /// matches even though the translated sym is `!`).
    fn match_keybinding(
        &self,
        keyinfo: &KeyInfo,
        is_virtual: bool,
        device_name: Option<&str>,
    ) -> Option<usize> {
        if !is_virtual {
            if let Some(found) =
                self.match_keybinding_for_sym(keyinfo.modifiers, None, keyinfo.xkb_keycode, device_name)
            {
                return Some(found);
            }
        }
        for sym in &keyinfo.translated {
            if let Some(found) = self.match_keybinding_for_sym(
                keyinfo.modifiers,
                Some(*sym),
                keyinfo.xkb_keycode,
                device_name,
            ) {
                return Some(found);
            }
        }
        for sym in &keyinfo.raw {
            if let Some(found) = self.match_keybinding_for_sym(
                keyinfo.modifiers,
                Some(*sym),
                keyinfo.xkb_keycode,
                device_name,
            ) {
                return Some(found);
            }
        }
        None
    }

    fn match_keybinding_for_sym(
        &self,
        modifiers: Modifiers,
        sym: Option<Keysym>,
        xkb_keycode: u32,
        device_name: Option<&str>,
    ) -> Option<usize> {
        let active_view = self
            .seat
            .focused_view
            .and_then(|id| self.views.get(id).ok());

        self.keybinds.iter().enumerate().find_map(|(index, bind)| {
            if modifiers != bind.modifiers || !bind.enabled {
                return None;
            }
            if active_view.is_some_and(|view| view.inhibits_any(&bind.actions)) {
                return None;
            }
            if bind.device_is_blacklisted(device_name) || !bind.device_is_whitelisted(device_name) {
                return None;
            }
            let matched = match sym {
                None => bind.contains_keycode(xkb_keycode),
                Some(sym) => bind.contains_keysym(keysym_to_lower(sym)),
            };
            matched.then_some(index)
        })
    }

    fn start_keybind_repeat(&mut self, keyboard: KeyboardId, keycode: u32) {
        let Some(handle) = self.loop_handle.clone() else {
            return;
        };
        let Some(kb) = self.seat.keyboard(keyboard) else {
            return;
        };
        debug_assert!(kb.repeat.is_none());
        if kb.repeat_rate <= 0 || kb.repeat_delay <= 0 {
            return;
        }
        let rate = kb.repeat_rate;
        let delay = kb.repeat_delay;

        let timer = Timer::from_duration(Duration::from_millis(delay as u64));
        let result = handle.insert_source(timer, move |_, _, server: &mut Server| {
            let Some(kb) = server.seat.keyboard(keyboard) else {
                return TimeoutAction::Drop;
            };
            let Some(repeat) = &kb.repeat else {
                return TimeoutAction::Drop;
            };
            let keycode = repeat.keycode;
            let rate = repeat.rate.max(1);
            let event = KeyEvent {
                keycode,
                state: KeyState::Pressed,
                time_msec: 0,
            };
            server.handle_compositor_keybindings(keyboard, &event);
            TimeoutAction::ToDuration(Duration::from_millis(1000 / rate as u64))
        });
        match result {
            Ok(token) => {
                if let Some(kb) = self.seat.keyboard_mut(keyboard) {
                    kb.repeat = Some(KeybindRepeat {
                        token,
                        keycode,
                        rate,
                    });
                }
            }
            Err(err) => tracing::warn!("failed to start keybind repeat: {err}"),
        }
    }

    pub fn cancel_keybind_repeat(&mut self, keyboard: KeyboardId) {
        let token = self
            .seat
            .keyboard_mut(keyboard)
            .and_then(|kb| kb.repeat.take())
            .map(|repeat| repeat.token);
        if let (Some(token), Some(handle)) = (token, self.loop_handle.clone()) {
            handle.remove(token);
        }
    }

    pub fn cancel_all_keybind_repeats(&mut self) {
        for index in 0..self.seat.keyboards.len() {
            self.cancel_keybind_repeat(KeyboardId(index));
        }
    }

    /// Kick off the bind's condition command, if any.
    ///
    /// Repeat is never started for condition-gated binds; each repeat
    /// press would otherwise pile up child processes.
    pub(crate) fn check_keybind_condition(
        &mut self,
        bind: usize,
        keyboard: KeyboardId,
        keycode: u32,
        time_msec: u32,
    ) -> ConditionOutcome {
        let Some(condition) = self.keybinds.get(bind).and_then(|bind| bind.condition.clone())
        else {
            return ConditionOutcome::RunNow;
        };

        tracing::debug!(command = condition.command, "checking keybind condition");
        let mut child = match Command::new("/bin/sh")
            .arg("-c")
            .arg(&condition.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                tracing::error!(
                    "failed to spawn condition command `{}`: {err}",
                    condition.command
                );
                return ConditionOutcome::Failed;
            }
        };

        let Some(handle) = self.loop_handle.clone() else {
            // Without an event loop (tests, embedded use) fall back to
            // the synchronous check.
            return self.check_condition_sync(&mut child, &condition.values);
        };

        let Some(stdout) = child.stdout.take() else {
            return ConditionOutcome::Failed;
        };
        if let Err(err) = set_nonblocking(stdout.as_raw_fd()) {
            tracing::error!("failed to set condition pipe nonblocking: {err}");
            return ConditionOutcome::Failed;
        }

        self.next_condition_id += 1;
        let ctx_id = self.next_condition_id;

        let read_source = Generic::new(stdout, Interest::READ, Mode::Level);
        let read_token = match handle.insert_source(read_source, move |_, stdout, server: &mut Server| {
            let mut buffer = [0u8; 4096];
            loop {
                // Safety: the fd stays open for the lifetime of the source.
                let stdout = unsafe { stdout.get_mut() };
                match stdout.read(&mut buffer) {
                    Ok(0) => {
                        server.finish_condition(ctx_id);
                        return Ok(PostAction::Remove);
                    }
                    Ok(n) => {
                        if let Some(ctx) = server.conditions.get_mut(&ctx_id) {
                            ctx.buf.extend_from_slice(&buffer[..n]);
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        return Ok(PostAction::Continue);
                    }
                    Err(err) => {
                        tracing::error!("failed to read from condition command pipe: {err}");
                        server.abort_condition(ctx_id);
                        return Ok(PostAction::Remove);
                    }
                }
            }
        }) {
            Ok(token) => token,
            Err(err) => {
                tracing::error!("failed to add condition check file descriptor: {err}");
                return ConditionOutcome::Failed;
            }
        };

        let timer = Timer::from_duration(CONDITION_TIMEOUT);
        let timeout_token = match handle.insert_source(timer, move |_, _, server: &mut Server| {
            tracing::debug!("keybind condition check timed out");
            server.abort_condition(ctx_id);
            TimeoutAction::Drop
        }) {
            Ok(token) => token,
            Err(err) => {
                tracing::error!("failed to add condition check timeout: {err}");
                handle.remove(read_token);
                return ConditionOutcome::Failed;
            }
        };

        self.conditions.insert(
            ctx_id,
            ConditionCtx {
                bind,
                keyboard,
                keycode,
                time_msec,
                buf: Vec::new(),
                read_token: Some(read_token),
                timeout_token: Some(timeout_token),
                child,
            },
        );
        ConditionOutcome::InFlight
    }

    fn check_condition_sync(&mut self, child: &mut Child, values: &[String]) -> ConditionOutcome {
        let mut output = String::new();
        if let Some(stdout) = child.stdout.as_mut() {
            let _ = stdout.read_to_string(&mut output);
        }
        let _ = child.wait();
        if condition_matches(&output, values) {
            ConditionOutcome::RunNow
        } else {
            ConditionOutcome::Failed
        }
    }

    /// EOF on the condition pipe: match the output and either run the
    /// actions or un-bind and re-inject the original press.
    fn finish_condition(&mut self, ctx_id: u64) {
        let Some(mut ctx) = self.conditions.remove(&ctx_id) else {
            return;
        };
        if let (Some(token), Some(handle)) = (ctx.timeout_token.take(), self.loop_handle.clone()) {
            handle.remove(token);
        }
        let _ = ctx.child.wait();

        let output = String::from_utf8_lossy(&ctx.buf).into_owned();
        let values = self
            .keybinds
            .get(ctx.bind)
            .and_then(|bind| bind.condition.as_ref())
            .map(|condition| condition.values.clone())
            .unwrap_or_default();

        if condition_matches(&output, &values) {
            tracing::debug!("keybind condition matched, executing actions");
            // The key is already marked bound; just run the actions.
            if let Some(actions) = self.keybinds.get(ctx.bind).map(|bind| bind.actions.clone()) {
                self.run_actions(&actions);
            }
        } else {
            tracing::debug!(
                output = trim_condition_output(&output),
                "keybind condition did not match, forwarding key"
            );
            self.cancel_keybind_repeat(ctx.keyboard);
            self.seat.bound_key_remove(ctx.keycode);
            self.seat.notify_key(ctx.time_msec, ctx.keycode, true);
        }
    }

    /// Timeout or read error: the bind is dropped for this event. The
    /// press is deliberately not forwarded since its release has already
    /// been absorbed.
    pub(crate) fn abort_condition(&mut self, ctx_id: u64) {
        let Some(mut ctx) = self.conditions.remove(&ctx_id) else {
            return;
        };
        if let Some(handle) = self.loop_handle.clone() {
            if let Some(token) = ctx.read_token.take() {
                handle.remove(token);
            }
            if let Some(token) = ctx.timeout_token.take() {
                handle.remove(token);
            }
        }
        let _ = ctx.child.kill();
        let _ = ctx.child.wait();
    }

    /// Drop every outstanding condition context; used on reconfigure and
    /// shutdown so no stale fd sources survive a keybind-list rebuild.
    pub fn cancel_all_conditions(&mut self) {
        let ids: Vec<u64> = self.conditions.keys().copied().collect();
        for ctx_id in ids {
            self.abort_condition(ctx_id);
        }
    }

    /// Switch the keyboard-group layout; virtual keyboards are left
    /// alone because their group is client-controlled.
    pub fn keyboard_update_layout(&mut self, layout: usize) {
        for kb in &mut self.seat.keyboards {
            if !kb.is_virtual && kb.layout != layout {
                tracing::debug!(layout, "updating group layout");
                kb.layout = layout;
            }
        }
    }
}

fn set_nonblocking(fd: i32) -> std::io::Result<()> {
    // Safety: plain fcntl on an fd we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Trim trailing newlines and whitespace from condition output.
pub(crate) fn trim_condition_output(output: &str) -> &str {
    output.trim_end_matches(['\n', '\r', ' ', '\t'])
}

/// With configured values the trimmed output must equal one of them;
/// without, any non-empty output counts as a match.
pub(crate) fn condition_matches(output: &str, values: &[String]) -> bool {
    let trimmed = trim_condition_output(output);
    if values.is_empty() {
        !trimmed.is_empty()
    } else {
        values.iter().any(|value| value == trimmed)
    }
}
