//! Keymap model and keysym helpers.
//!
//! The xkb context itself belongs to the display-server side; the core only
//! needs enough of a keymap to translate keycodes into keysyms per layout
//! and shift level, and to resolve keybind keysyms back into keycodes.

use std::collections::HashMap;

use bitflags::bitflags;
use xkeysym::Keysym;

/// Offset between evdev keycodes (as delivered by libinput) and xkb
/// keycodes.
pub const EVDEV_OFFSET: u32 = 8;

bitflags! {
    /// Modifier mask, bit-compatible with the wlr modifier enum.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Modifiers: u32 {
        const SHIFT = 1 << 0;
        const CAPS = 1 << 1;
        const CTRL = 1 << 2;
        const ALT = 1 << 3;
        const MOD2 = 1 << 4;
        const MOD3 = 1 << 5;
        const LOGO = 1 << 6;
        const MOD5 = 1 << 7;
    }
}

/// One xkb layout: keycode -> keysyms per shift level.
#[derive(Clone, Debug, Default)]
pub struct KeymapLayout {
    pub name: String,
    keys: HashMap<u32, Vec<Vec<Keysym>>>,
}

impl KeymapLayout {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            keys: HashMap::new(),
        }
    }

    pub fn add_key(&mut self, xkb_keycode: u32, levels: &[&[Keysym]]) {
        self.keys.insert(
            xkb_keycode,
            levels.iter().map(|syms| syms.to_vec()).collect(),
        );
    }

    pub fn syms(&self, xkb_keycode: u32, level: usize) -> &[Keysym] {
        self.keys
            .get(&xkb_keycode)
            .and_then(|levels| levels.get(level))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn keycodes(&self) -> impl Iterator<Item = u32> + '_ {
        self.keys.keys().copied()
    }
}

#[derive(Clone, Debug)]
pub struct Keymap {
    pub layouts: Vec<KeymapLayout>,
}

impl Keymap {
    /// Keymap for the layout named by `XKB_DEFAULT_LAYOUT`. An unset or
    /// empty variable falls back to "us"; with an empty value the xkb
    /// compiler misbehaves, so the fallback is forced.
    pub fn from_environment() -> Self {
        let layout = std::env::var("XKB_DEFAULT_LAYOUT").unwrap_or_default();
        let layout = if layout.is_empty() { "us" } else { &layout };
        Self::from_layout_name(layout).unwrap_or_else(|| {
            tracing::error!("failed to create keymap for layout '{layout}', falling back to 'us'");
            Self::from_layout_name("us").expect("builtin us layout")
        })
    }

    pub fn from_layout_name(name: &str) -> Option<Self> {
        match name {
            "us" => Some(Self {
                layouts: vec![us_layout()],
            }),
            _ => None,
        }
    }

    pub fn layout(&self, index: usize) -> &KeymapLayout {
        self.layouts.get(index).unwrap_or(&self.layouts[0])
    }

    /// Translated keysyms for a keycode: the shift level when shift is held,
    /// with a fall-through to level 0 for keys without a shifted level.
    pub fn translated_syms(&self, xkb_keycode: u32, layout: usize, mods: Modifiers) -> Vec<Keysym> {
        let layout = self.layout(layout);
        if mods.contains(Modifiers::SHIFT) {
            let syms = layout.syms(xkb_keycode, 1);
            if !syms.is_empty() {
                return syms.to_vec();
            }
        }
        layout.syms(xkb_keycode, 0).to_vec()
    }

    /// Raw keysyms ignore modifier translation: always level 0.
    pub fn raw_syms(&self, xkb_keycode: u32, layout: usize) -> Vec<Keysym> {
        self.layout(layout).syms(xkb_keycode, 0).to_vec()
    }
}

impl Default for Keymap {
    fn default() -> Self {
        Self::from_layout_name("us").expect("builtin us layout")
    }
}

fn us_layout() -> KeymapLayout {
    let mut layout = KeymapLayout::new("us");

    // Letter rows; evdev keycodes, stored with the +8 xkb offset applied.
    let rows: [(&[u32], &str); 3] = [
        (&[16, 17, 18, 19, 20, 21, 22, 23, 24, 25], "qwertyuiop"),
        (&[30, 31, 32, 33, 34, 35, 36, 37, 38], "asdfghjkl"),
        (&[44, 45, 46, 47, 48, 49, 50], "zxcvbnm"),
    ];
    for (codes, letters) in rows {
        for (code, ch) in codes.iter().zip(letters.chars()) {
            let lower = Keysym::from_char(ch);
            let upper = Keysym::from_char(ch.to_ascii_uppercase());
            layout.add_key(code + EVDEV_OFFSET, &[&[lower], &[upper]]);
        }
    }

    // Digit row with shifted symbols.
    let digits = "1234567890";
    let shifted = "!@#$%^&*()";
    for (index, (digit, symbol)) in digits.chars().zip(shifted.chars()).enumerate() {
        let code = 2 + index as u32;
        layout.add_key(
            code + EVDEV_OFFSET,
            &[&[Keysym::from_char(digit)], &[Keysym::from_char(symbol)]],
        );
    }

    let named: [(u32, Keysym); 24] = [
        (1, Keysym::Escape),
        (14, Keysym::BackSpace),
        (15, Keysym::Tab),
        (28, Keysym::Return),
        (29, Keysym::Control_L),
        (42, Keysym::Shift_L),
        (54, Keysym::Shift_R),
        (56, Keysym::Alt_L),
        (57, Keysym::space),
        (58, Keysym::Caps_Lock),
        (97, Keysym::Control_R),
        (100, Keysym::Alt_R),
        (102, Keysym::Home),
        (103, Keysym::Up),
        (104, Keysym::Prior),
        (105, Keysym::Left),
        (106, Keysym::Right),
        (107, Keysym::End),
        (108, Keysym::Down),
        (109, Keysym::Next),
        (111, Keysym::Delete),
        (125, Keysym::Super_L),
        (126, Keysym::Super_R),
        (96, Keysym::KP_Enter),
    ];
    for (code, sym) in named {
        layout.add_key(code + EVDEV_OFFSET, &[&[sym]]);
    }
    // Shift-Tab produces ISO_Left_Tab.
    layout.add_key(15 + EVDEV_OFFSET, &[&[Keysym::Tab], &[Keysym::ISO_Left_Tab]]);

    for n in 0..12u32 {
        let sym = Keysym::new(Keysym::F1.raw() + n);
        layout.add_key(59 + n + EVDEV_OFFSET, &[&[sym]]);
    }

    layout
}

/// Keysyms that represent modifiers on their own.
pub fn is_modifier_key(sym: Keysym) -> bool {
    matches!(
        sym,
        Keysym::Shift_L
            | Keysym::Shift_R
            | Keysym::Alt_L
            | Keysym::Alt_R
            | Keysym::Control_L
            | Keysym::Control_R
            | Keysym::Super_L
            | Keysym::Super_R
            | Keysym::Hyper_L
            | Keysym::Hyper_R
            | Keysym::Meta_L
            | Keysym::Meta_R
            | Keysym::Mode_switch
            | Keysym::ISO_Level3_Shift
            | Keysym::ISO_Level5_Shift
    )
}

/// Lower-case a keysym via its unicode codepoint, identity for keysyms
/// without one.
pub fn keysym_to_lower(sym: Keysym) -> Keysym {
    match sym.key_char() {
        Some(ch) if ch.is_uppercase() => ch
            .to_lowercase()
            .next()
            .map(Keysym::from_char)
            .unwrap_or(sym),
        _ => sym,
    }
}

/// Resolve a keysym name from a keybind trigger token. Handles the legacy
/// named set used in configs plus direct single-character translation, so
/// triggers like `W-odiaeresis` are unnecessary: `W-ö` works.
pub fn keysym_from_name(name: &str) -> Option<Keysym> {
    let named = match name.to_ascii_lowercase().as_str() {
        "return" | "enter" => Some(Keysym::Return),
        "kp_enter" => Some(Keysym::KP_Enter),
        "escape" => Some(Keysym::Escape),
        "tab" => Some(Keysym::Tab),
        "space" => Some(Keysym::space),
        "backspace" => Some(Keysym::BackSpace),
        "delete" => Some(Keysym::Delete),
        "insert" => Some(Keysym::Insert),
        "home" => Some(Keysym::Home),
        "end" => Some(Keysym::End),
        "prior" | "page_up" => Some(Keysym::Prior),
        "next" | "page_down" => Some(Keysym::Next),
        "up" => Some(Keysym::Up),
        "down" => Some(Keysym::Down),
        "left" => Some(Keysym::Left),
        "right" => Some(Keysym::Right),
        "print" => Some(Keysym::Print),
        "menu" => Some(Keysym::Menu),
        "xf86audioraisevolume" => Some(Keysym::XF86_AudioRaiseVolume),
        "xf86audiolowervolume" => Some(Keysym::XF86_AudioLowerVolume),
        "xf86audiomute" => Some(Keysym::XF86_AudioMute),
        "xf86audioplay" => Some(Keysym::XF86_AudioPlay),
        "xf86audionext" => Some(Keysym::XF86_AudioNext),
        "xf86audioprev" => Some(Keysym::XF86_AudioPrev),
        "xf86monbrightnessup" => Some(Keysym::XF86_MonBrightnessUp),
        "xf86monbrightnessdown" => Some(Keysym::XF86_MonBrightnessDown),
        _ => None,
    };
    if named.is_some() {
        return named;
    }

    if let Some(rest) = name
        .strip_prefix('F')
        .or_else(|| name.strip_prefix('f'))
        .filter(|rest| !rest.is_empty())
    {
        if let Ok(n) = rest.parse::<u32>() {
            if (1..=12).contains(&n) {
                return Some(Keysym::new(Keysym::F1.raw() + n - 1));
            }
        }
    }

    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Some(Keysym::from_char(ch)),
        _ => None,
    }
}

/// The first VT-switch keysym; the twelve XF86Switch_VT_* keysyms are
/// contiguous.
pub fn vt_from_keysym(sym: Keysym) -> Option<u32> {
    let first = Keysym::XF86_Switch_VT_1.raw();
    let last = Keysym::XF86_Switch_VT_12.raw();
    let raw = sym.raw();
    (first..=last).contains(&raw).then(|| raw - first + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn us_layout_translates_letters_and_shift() {
        let keymap = Keymap::default();
        // evdev 30 is 'a'
        let code = 30 + EVDEV_OFFSET;
        assert_eq!(keymap.raw_syms(code, 0), vec![Keysym::a]);
        assert_eq!(
            keymap.translated_syms(code, 0, Modifiers::SHIFT),
            vec![Keysym::A]
        );
        assert_eq!(
            keymap.translated_syms(code, 0, Modifiers::empty()),
            vec![Keysym::a]
        );
    }

    #[test]
    fn shifted_digits_translate_to_symbols() {
        let keymap = Keymap::default();
        // evdev 2 is '1'; shift gives '!'
        let code = 2 + EVDEV_OFFSET;
        assert_eq!(
            keymap.translated_syms(code, 0, Modifiers::SHIFT),
            vec![Keysym::exclam]
        );
        assert_eq!(keymap.raw_syms(code, 0), vec![Keysym::_1]);
    }

    #[test]
    fn keysym_name_lookup() {
        assert_eq!(keysym_from_name("Return"), Some(Keysym::Return));
        assert_eq!(keysym_from_name("f5"), Some(Keysym::F5));
        assert_eq!(keysym_from_name("a"), Some(Keysym::a));
        assert_eq!(keysym_from_name("ö"), Some(Keysym::from_char('ö')));
        assert_eq!(keysym_from_name("NotAKey"), None);
    }

    #[test]
    fn lowercase_folding() {
        assert_eq!(keysym_to_lower(Keysym::A), Keysym::a);
        assert_eq!(keysym_to_lower(Keysym::Return), Keysym::Return);
    }

    #[test]
    fn vt_switch_range() {
        assert_eq!(vt_from_keysym(Keysym::XF86_Switch_VT_1), Some(1));
        assert_eq!(vt_from_keysym(Keysym::XF86_Switch_VT_12), Some(12));
        assert_eq!(vt_from_keysym(Keysym::Return), None);
    }

    #[test]
    fn modifier_keys_are_detected() {
        assert!(is_modifier_key(Keysym::Super_L));
        assert!(is_modifier_key(Keysym::ISO_Level3_Shift));
        assert!(!is_modifier_key(Keysym::Tab));
    }
}
