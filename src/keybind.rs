//! Keybind entities: trigger parsing, device filters, keycode resolution.

use xkeysym::Keysym;

use crate::{
    action::Action,
    config::KeybindConfig,
    errors::{Error, Result},
    keymap::{keysym_from_name, keysym_to_lower, Keymap, Modifiers},
};

pub const MAX_KEYSYMS: usize = 32;
pub const MAX_KEYCODES: usize = 32;

#[derive(Clone, Debug)]
pub struct Condition {
    pub command: String,
    /// Acceptable trimmed stdout values. Empty means any non-empty output
    /// matches.
    pub values: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Keybind {
    pub modifiers: Modifiers,
    pub keysyms: Vec<Keysym>,
    pub keycodes: Vec<u32>,
    pub keycodes_layout: Option<usize>,
    /// layoutDependent binds match by keysym only.
    pub use_syms_only: bool,
    pub on_release: bool,
    pub allow_when_locked: bool,
    pub enabled: bool,
    pub toggleable: bool,
    pub id: Option<String>,
    /// Device names, stored lower-case for the per-event comparisons.
    pub device_blacklist: Vec<String>,
    pub device_whitelist: Vec<String>,
    pub actions: Vec<Action>,
    pub condition: Option<Condition>,
}

impl Keybind {
    /// Build a keybind from its config shape. Fails with a `Config` error
    /// on an unknown modifier or keysym token; the caller logs and skips
    /// the binding.
    pub fn from_config(config: &KeybindConfig) -> Result<Self> {
        let (modifiers, keysyms) = parse_trigger(&config.trigger)?;
        Ok(Self {
            modifiers,
            keysyms,
            keycodes: Vec::new(),
            keycodes_layout: None,
            use_syms_only: config.layout_dependent,
            on_release: config.on_release,
            allow_when_locked: config.allow_when_locked,
            enabled: config.enabled,
            toggleable: config.toggleable,
            id: config.id.clone(),
            device_blacklist: to_lowercase_list(&config.device_blacklist),
            device_whitelist: to_lowercase_list(&config.device_whitelist),
            actions: config.actions.clone(),
            condition: config.condition_command.as_ref().map(|command| Condition {
                command: command.clone(),
                values: config.condition_values.clone(),
            }),
        })
    }

    pub fn contains_keysym(&self, sym: Keysym) -> bool {
        self.keysyms.contains(&sym)
    }

    pub fn contains_keycode(&self, keycode: u32) -> bool {
        self.keycodes.contains(&keycode)
    }

    fn contains_any_keysym(&self, syms: &[Keysym]) -> bool {
        syms.iter().any(|sym| self.contains_keysym(*sym))
    }

    pub fn device_is_blacklisted(&self, device_name: Option<&str>) -> bool {
        let Some(name) = device_name else {
            return false;
        };
        let name = name.to_ascii_lowercase();
        self.device_blacklist.iter().any(|entry| *entry == name)
    }

    pub fn device_is_whitelisted(&self, device_name: Option<&str>) -> bool {
        // An empty whitelist allows every device.
        if self.device_whitelist.is_empty() {
            return true;
        }
        let Some(name) = device_name else {
            return false;
        };
        let name = name.to_ascii_lowercase();
        self.device_whitelist.iter().any(|entry| *entry == name)
    }
}

fn to_lowercase_list(list: &[String]) -> Vec<String> {
    list.iter().map(|entry| entry.to_ascii_lowercase()).collect()
}

/// Parse a trigger like `W-S-Tab` into a modifier mask and keysyms.
///
/// `-` is the separator, so `W--` splits into empty tokens; empty tokens
/// are folded back into a literal `-` key, with a lookahead so `W--` does
/// not produce the key twice.
fn parse_trigger(trigger: &str) -> Result<(Modifiers, Vec<Keysym>)> {
    let mut modifiers = Modifiers::empty();
    let mut keysyms = Vec::new();

    let tokens: Vec<&str> = trigger.split('-').collect();
    let mut index = 0;
    while index < tokens.len() {
        let mut token = tokens[index];
        if token.is_empty() {
            if tokens.get(index + 1).is_some_and(|next| next.is_empty()) {
                index += 1;
                continue;
            }
            token = "-";
        }

        if let Some(modifier) = parse_modifier(token) {
            modifiers |= modifier;
        } else {
            let sym = keysym_from_name(token)
                .ok_or_else(|| Error::Config(format!("unknown keysym `{token}` in `{trigger}`")))?;
            if keysyms.len() == MAX_KEYSYMS {
                tracing::error!("too many keysyms in keybind `{trigger}`");
                break;
            }
            keysyms.push(keysym_to_lower(sym));
        }
        index += 1;
    }

    if keysyms.is_empty() {
        return Err(Error::Config(format!("keybind `{trigger}` has no key")));
    }
    Ok((modifiers, keysyms))
}

/// Mod2 is NumLock and never part of triggers.
pub fn parse_modifier(token: &str) -> Option<Modifiers> {
    match token {
        "S" => Some(Modifiers::SHIFT),
        "C" => Some(Modifiers::CTRL),
        "A" | "Mod1" => Some(Modifiers::ALT),
        "W" | "Mod4" => Some(Modifiers::LOGO),
        "M" | "Mod5" => Some(Modifiers::MOD5),
        "H" | "Mod3" => Some(Modifiers::MOD3),
        _ => None,
    }
}

/// Re-resolve keycodes for every keybind against the active keymap.
///
/// Runs on keymap changes and reconfigure. Each bind stores keycodes from
/// a single layout so multi-layout keymaps cannot smear one bind across
/// layouts.
pub fn update_keycodes(keybinds: &mut [Keybind], keymap: &Keymap) {
    for bind in keybinds.iter_mut() {
        bind.keycodes.clear();
        bind.keycodes_layout = None;
    }

    for (layout_index, layout) in keymap.layouts.iter().enumerate() {
        let mut keycodes: Vec<u32> = layout.keycodes().collect();
        keycodes.sort_unstable();
        for keycode in keycodes {
            let syms = layout.syms(keycode, 0);
            if syms.is_empty() {
                continue;
            }
            for bind in keybinds.iter_mut() {
                if bind
                    .keycodes_layout
                    .is_some_and(|stored| stored != layout_index)
                {
                    continue;
                }
                if bind.use_syms_only || !bind.contains_any_keysym(syms) {
                    continue;
                }
                if bind.contains_keycode(keycode) {
                    continue;
                }
                if bind.keycodes.len() == MAX_KEYCODES {
                    tracing::error!("already stored {MAX_KEYCODES} keycodes for keybind");
                    continue;
                }
                bind.keycodes.push(keycode);
                bind.keycodes_layout = Some(layout_index);
            }
        }
    }
}

pub fn find_by_id<'a>(keybinds: &'a mut [Keybind], id: &str) -> Option<&'a mut Keybind> {
    keybinds
        .iter_mut()
        .find(|bind| bind.id.as_deref() == Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::EVDEV_OFFSET;

    fn bind(trigger: &str) -> Keybind {
        Keybind::from_config(&KeybindConfig::new(trigger, vec![Action::Close])).unwrap()
    }

    #[test]
    fn trigger_parsing_splits_modifiers_and_key() {
        let bind = bind("W-S-Tab");
        assert_eq!(bind.modifiers, Modifiers::LOGO | Modifiers::SHIFT);
        assert_eq!(bind.keysyms, vec![Keysym::Tab]);
    }

    #[test]
    fn trigger_parsing_lowercases_keysyms() {
        let bind = bind("A-Q");
        assert_eq!(bind.keysyms, vec![Keysym::q]);
    }

    #[test]
    fn dash_key_is_representable() {
        let bind = bind("W--");
        assert_eq!(bind.modifiers, Modifiers::LOGO);
        assert_eq!(bind.keysyms, vec![Keysym::from_char('-')]);
    }

    #[test]
    fn unknown_tokens_are_config_errors() {
        let result = Keybind::from_config(&KeybindConfig::new("W-NoSuchKey", vec![Action::Close]));
        assert!(matches!(result, Err(Error::Config(_))));
        let result = Keybind::from_config(&KeybindConfig::new("W", vec![Action::Close]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn device_filters_are_case_insensitive() {
        let mut bind = bind("W-a");
        bind.device_blacklist = vec!["virtual keyboard".to_owned()];
        assert!(bind.device_is_blacklisted(Some("Virtual Keyboard")));
        assert!(!bind.device_is_blacklisted(None));

        assert!(bind.device_is_whitelisted(Some("anything")));
        bind.device_whitelist = vec!["at translated set 2 keyboard".to_owned()];
        assert!(bind.device_is_whitelisted(Some("AT Translated Set 2 Keyboard")));
        assert!(!bind.device_is_whitelisted(Some("other")));
        assert!(!bind.device_is_whitelisted(None));
    }

    #[test]
    fn keycode_resolution_from_keymap() {
        let keymap = Keymap::default();
        let mut binds = vec![bind("W-a"), bind("A-Tab")];
        update_keycodes(&mut binds, &keymap);

        // evdev 30 is 'a', 15 is Tab.
        assert!(binds[0].contains_keycode(30 + EVDEV_OFFSET));
        assert_eq!(binds[0].keycodes_layout, Some(0));
        assert!(binds[1].contains_keycode(15 + EVDEV_OFFSET));
        assert!(!binds[1].contains_keycode(30 + EVDEV_OFFSET));
    }

    #[test]
    fn layout_dependent_binds_skip_keycodes() {
        let keymap = Keymap::default();
        let mut config = KeybindConfig::new("W-a", vec![Action::Close]);
        config.layout_dependent = true;
        let mut binds = vec![Keybind::from_config(&config).unwrap()];
        update_keycodes(&mut binds, &keymap);
        assert!(binds[0].keycodes.is_empty());
    }
}
