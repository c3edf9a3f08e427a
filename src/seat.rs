//! Seat state: keyboards, key-state bookkeeping, and the queue of
//! notifications destined for clients.
//!
//! The wire delivery of these notifications belongs to the display-server
//! glue; the core only decides *what* gets sent to *whom* and in what
//! order.

use std::collections::{HashSet, VecDeque};

use calloop::RegistrationToken;

use crate::{
    keymap::{Keymap, Modifiers},
    view::ViewId,
};

/// The seat's interaction state. Transitions are driven by actions; the
/// keyboard engine only reads this to route events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InputMode {
    #[default]
    Passthrough,
    Menu,
    Cycle,
    Move,
    Resize,
    Dnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyboardId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub u32);

/// Active keybind-repeat timer on one keyboard.
#[derive(Debug)]
pub(crate) struct KeybindRepeat {
    pub token: RegistrationToken,
    pub keycode: u32,
    pub rate: i32,
}

#[derive(Debug)]
pub struct Keyboard {
    pub name: String,
    pub is_virtual: bool,
    pub repeat_rate: i32,
    pub repeat_delay: i32,
    pub keymap: Keymap,
    pub modifiers: Modifiers,
    /// Active xkb layout group.
    pub layout: usize,
    pub(crate) repeat: Option<KeybindRepeat>,
}

impl Keyboard {
    pub fn new(name: &str, is_virtual: bool, repeat_rate: i32, repeat_delay: i32) -> Self {
        Self {
            name: name.to_owned(),
            is_virtual,
            repeat_rate,
            repeat_delay,
            keymap: Keymap::from_environment(),
            modifiers: Modifiers::empty(),
            layout: 0,
            repeat: None,
        }
    }
}

/// A notification queued for delivery by the seat glue.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    Key {
        client: Option<ClientId>,
        serial: u32,
        time_msec: u32,
        keycode: u32,
        pressed: bool,
        /// Routed through the active input-method grab instead of the
        /// wl_keyboard.
        via_ime: bool,
    },
    Modifiers {
        client: ClientId,
        serial: u32,
        modifiers: Modifiers,
    },
    FocusView {
        view: Option<ViewId>,
        serial: u32,
    },
    /// Preferred-focus hint for LIKELY/UNLIKELY views.
    OfferFocus {
        view: ViewId,
    },
    CursorWarp {
        x: f64,
        y: f64,
    },
    MenuNavigate(MenuKey),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuKey {
    Up,
    Down,
    EnterSubmenu,
    LeaveSubmenu,
    Activate,
    Close,
}

#[derive(Debug, Default)]
pub struct Seat {
    pub keyboards: Vec<Keyboard>,
    /// Seat clients known to the glue; used for modifier broadcast.
    pub clients: Vec<ClientId>,
    pub focused_client: Option<ClientId>,
    pub focused_view: Option<ViewId>,
    pub pointer: (f64, f64),
    pub ime_grab_active: bool,
    pub events: VecDeque<ClientEvent>,
    serial: u32,
    pressed: HashSet<u32>,
    bound: HashSet<u32>,
}

impl Seat {
    pub fn next_serial(&mut self) -> u32 {
        self.serial = self.serial.wrapping_add(1);
        self.serial
    }

    pub fn add_keyboard(&mut self, keyboard: Keyboard) -> KeyboardId {
        self.keyboards.push(keyboard);
        KeyboardId(self.keyboards.len() - 1)
    }

    pub fn keyboard(&self, id: KeyboardId) -> Option<&Keyboard> {
        self.keyboards.get(id.0)
    }

    pub fn keyboard_mut(&mut self, id: KeyboardId) -> Option<&mut Keyboard> {
        self.keyboards.get_mut(id.0)
    }

    /// Modifiers aggregated over the keyboard group and any virtual
    /// keyboards, so binds held through e.g. a VNC keyboard still count.
    pub fn all_modifiers(&self) -> Modifiers {
        self.keyboards
            .iter()
            .fold(Modifiers::empty(), |acc, keyboard| {
                acc | keyboard.modifiers
            })
    }

    pub fn key_state_set_pressed(&mut self, keycode: u32, pressed: bool) {
        if pressed {
            self.pressed.insert(keycode);
        } else {
            self.pressed.remove(&keycode);
        }
    }

    pub fn store_pressed_key_as_bound(&mut self, keycode: u32) {
        self.bound.insert(keycode);
    }

    pub fn bound_key_remove(&mut self, keycode: u32) {
        self.bound.remove(&keycode);
    }

    pub fn corresponding_press_was_bound(&self, keycode: u32) -> bool {
        self.bound.contains(&keycode)
    }

    pub fn nr_bound_keys(&self) -> usize {
        self.bound.len()
    }

    /// Forward a key event to the focused client (or through the IME grab
    /// when one is active).
    pub fn notify_key(&mut self, time_msec: u32, keycode: u32, pressed: bool) {
        let serial = self.next_serial();
        let event = ClientEvent::Key {
            client: self.focused_client,
            serial,
            time_msec,
            keycode,
            pressed,
            via_ime: self.ime_grab_active,
        };
        self.events.push_back(event);
    }

    /// Send modifiers to the focused client and additionally broadcast to
    /// every unfocused seat client with a fresh serial each. Virtual
    /// keyboards never broadcast so they cannot clobber the group
    /// modifier state.
    pub fn notify_modifiers(&mut self, from_virtual: bool, modifiers: Modifiers) {
        if let Some(focused) = self.focused_client {
            let serial = self.next_serial();
            self.events.push_back(ClientEvent::Modifiers {
                client: focused,
                serial,
                modifiers,
            });
        }
        if from_virtual {
            return;
        }
        let unfocused: Vec<ClientId> = self
            .clients
            .iter()
            .copied()
            .filter(|client| Some(*client) != self.focused_client)
            .collect();
        for client in unfocused {
            let serial = self.next_serial();
            self.events.push_back(ClientEvent::Modifiers {
                client,
                serial,
                modifiers,
            });
        }
    }

    /// Drain queued notifications; called by the display-server glue.
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        self.events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_key_bookkeeping() {
        let mut seat = Seat::default();
        seat.key_state_set_pressed(30, true);
        seat.store_pressed_key_as_bound(30);
        assert!(seat.corresponding_press_was_bound(30));
        assert_eq!(seat.nr_bound_keys(), 1);
        seat.bound_key_remove(30);
        assert!(!seat.corresponding_press_was_bound(30));
        assert_eq!(seat.nr_bound_keys(), 0);
    }

    #[test]
    fn modifier_broadcast_reaches_unfocused_clients_with_fresh_serials() {
        let mut seat = Seat::default();
        seat.clients = vec![ClientId(1), ClientId(2), ClientId(3)];
        seat.focused_client = Some(ClientId(2));
        seat.notify_modifiers(false, Modifiers::ALT);

        let events = seat.drain_events();
        assert_eq!(events.len(), 3);
        let mut serials = Vec::new();
        for event in &events {
            let ClientEvent::Modifiers { serial, .. } = event else {
                panic!("expected modifiers event");
            };
            serials.push(*serial);
        }
        serials.sort_unstable();
        serials.dedup();
        assert_eq!(serials.len(), 3);
    }

    #[test]
    fn virtual_keyboards_do_not_broadcast() {
        let mut seat = Seat::default();
        seat.clients = vec![ClientId(1), ClientId(2)];
        seat.focused_client = Some(ClientId(1));
        seat.notify_modifiers(true, Modifiers::CTRL);
        let events = seat.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            ClientEvent::Modifiers {
                client: ClientId(1),
                ..
            }
        ));
    }

    #[test]
    fn aggregated_modifiers_include_virtual_keyboards() {
        let mut seat = Seat::default();
        let physical = seat.add_keyboard(Keyboard::new("AT keyboard", false, 25, 600));
        let virt = seat.add_keyboard(Keyboard::new("wayvnc", true, 0, 0));
        seat.keyboard_mut(physical).unwrap().modifiers = Modifiers::LOGO;
        seat.keyboard_mut(virt).unwrap().modifiers = Modifiers::SHIFT;
        assert_eq!(seat.all_modifiers(), Modifiers::LOGO | Modifiers::SHIFT);
    }
}
