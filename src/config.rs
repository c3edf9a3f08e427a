//! Runtime configuration.
//!
//! XML parsing lives outside the core; by the time a `Config` reaches the
//! server it is a fully resolved value. The loader here understands the
//! flat `key = "value"` file format used for overrides and is replaced
//! wholesale on reconfigure.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    action::Action,
    errors::{Error, Result},
};

#[derive(Clone, Debug)]
pub struct Config {
    pub workspace_names: Vec<String>,
    pub gap: i32,
    pub repeat_rate: i32,
    pub repeat_delay: i32,
    pub kb_layout_per_window: bool,
    pub tiling_enabled: bool,
    pub tiling_grid_mode: bool,
    pub autostart: Vec<String>,
    pub keybinds: Vec<KeybindConfig>,
    pub window_rules: Vec<WindowRule>,
}

/// Declarative shape of one keybind; compiled into a live
/// [`crate::keybind::Keybind`] when the keybind list is (re)built.
#[derive(Clone, Debug, Default)]
pub struct KeybindConfig {
    pub trigger: String,
    pub actions: Vec<Action>,
    pub on_release: bool,
    pub allow_when_locked: bool,
    pub layout_dependent: bool,
    pub enabled: bool,
    pub toggleable: bool,
    pub id: Option<String>,
    pub device_blacklist: Vec<String>,
    pub device_whitelist: Vec<String>,
    pub condition_command: Option<String>,
    pub condition_values: Vec<String>,
}

impl KeybindConfig {
    pub fn new(trigger: &str, actions: Vec<Action>) -> Self {
        Self {
            trigger: trigger.to_owned(),
            actions,
            enabled: true,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileDirection {
    Vertical,
    Horizontal,
}

/// A window rule matched against app-id (exact, case-insensitive) and
/// title (substring, case-insensitive).
#[derive(Clone, Debug, Default)]
pub struct WindowRule {
    pub app_id: Option<String>,
    pub title: Option<String>,
    pub workspace: Option<usize>,
    pub focus: Option<bool>,
    pub fixed_position: Option<bool>,
    pub tile: Option<bool>,
    pub tile_direction: Option<TileDirection>,
}

impl WindowRule {
    pub fn matches(&self, app_id: Option<&str>, title: Option<&str>) -> bool {
        if let Some(expected) = &self.app_id {
            if !matches_ci_exact(app_id, expected) {
                return false;
            }
        }
        if let Some(expected) = &self.title {
            if !matches_ci_contains(title, expected) {
                return false;
            }
        }
        true
    }
}

fn matches_ci_exact(value: Option<&str>, expected: &str) -> bool {
    value.is_some_and(|value| value.eq_ignore_ascii_case(expected))
}

fn matches_ci_contains(value: Option<&str>, expected: &str) -> bool {
    value.is_some_and(|value| {
        value
            .to_ascii_lowercase()
            .contains(&expected.to_ascii_lowercase())
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_names: (1..=4).map(|n| n.to_string()).collect(),
            gap: 10,
            repeat_rate: 25,
            repeat_delay: 600,
            kb_layout_per_window: false,
            tiling_enabled: false,
            tiling_grid_mode: false,
            autostart: Vec::new(),
            keybinds: default_keybinds(),
            window_rules: Vec::new(),
        }
    }
}

fn default_keybinds() -> Vec<KeybindConfig> {
    let mut binds = vec![
        KeybindConfig::new("A-Tab", vec![Action::NextWindow]),
        KeybindConfig::new("A-S-Tab", vec![Action::PreviousWindow]),
        KeybindConfig::new("A-F4", vec![Action::Close]),
        KeybindConfig::new("W-f", vec![Action::ToggleFullscreen]),
        KeybindConfig::new("W-m", vec![Action::ToggleMaximize]),
        KeybindConfig::new("W-i", vec![Action::Iconify]),
        KeybindConfig::new("W-t", vec![Action::ToggleTiling]),
        KeybindConfig::new("W-g", vec![Action::ToggleTilingGridMode]),
        KeybindConfig::new("W-r", vec![Action::RecalculateTiling]),
    ];
    for n in 1..=4usize {
        binds.push(KeybindConfig::new(
            &format!("W-{n}"),
            vec![Action::GoToDesktop {
                target: n.to_string(),
            }],
        ));
        binds.push(KeybindConfig::new(
            &format!("W-S-{n}"),
            vec![Action::SendToDesktop {
                target: n.to_string(),
            }],
        ));
    }
    binds
}

pub struct LoadedConfig {
    pub path: Option<PathBuf>,
    pub config: Config,
}

/// Load the config file selected by `-c`/`-C`/XDG, falling back to the
/// built-in defaults when no file exists.
pub fn load(file: Option<&Path>, dir: Option<&Path>) -> LoadedConfig {
    let path = file.map(Path::to_path_buf).or_else(|| {
        let dir = dir.map(Path::to_path_buf).or_else(default_config_dir)?;
        Some(dir.join("rc"))
    });

    let Some(path) = path.filter(|path| path.exists()) else {
        tracing::debug!("no config file found, using defaults");
        return LoadedConfig {
            path: None,
            config: Config::default(),
        };
    };

    match load_from_path(&path) {
        Ok(config) => LoadedConfig {
            path: Some(path),
            config,
        },
        Err(err) => {
            tracing::error!(path = %path.display(), "failed to load config: {err}");
            LoadedConfig {
                path: Some(path),
                config: Config::default(),
            }
        }
    }
}

fn default_config_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(dir).join("labwc"));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config").join("labwc"))
}

pub fn load_from_path(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .map_err(|err| Error::Config(format!("failed to read {}: {err}", path.display())))?;
    parse(&content)
}

fn parse(content: &str) -> Result<Config> {
    let values = parse_key_values(content)?;
    let mut config = Config::default();

    if let Some(count) = parse_optional_usize(&values, "workspaces.count")? {
        if count == 0 {
            return Err(Error::Config("workspaces.count must be >= 1".to_owned()));
        }
        config.workspace_names = (1..=count).map(|n| n.to_string()).collect();
    }
    for (index, name) in config.workspace_names.iter_mut().enumerate() {
        if let Some(value) = values.get(&format!("workspaces.name.{}", index + 1)) {
            *name = value.clone();
        }
    }

    config.gap = parse_i32(&values, "gap", config.gap)?;
    if config.gap < 0 {
        return Err(Error::Config("gap must be >= 0".to_owned()));
    }
    config.repeat_rate = parse_i32(&values, "keyboard.repeat_rate", config.repeat_rate)?;
    config.repeat_delay = parse_i32(&values, "keyboard.repeat_delay", config.repeat_delay)?;
    config.kb_layout_per_window = parse_bool(
        &values,
        "keyboard.layout_per_window",
        config.kb_layout_per_window,
    )?;
    config.tiling_enabled = parse_bool(&values, "tiling.enabled", config.tiling_enabled)?;
    config.tiling_grid_mode = parse_bool(&values, "tiling.grid_mode", config.tiling_grid_mode)?;
    config.autostart = collect_indexed_values(&values, "autostart.");

    let keybinds = collect_keybinds(&values);
    if !keybinds.is_empty() {
        config.keybinds = keybinds;
    }
    config.window_rules = collect_window_rules(&values)?;

    Ok(config)
}

fn parse_key_values(content: &str) -> Result<BTreeMap<String, String>> {
    let mut values = BTreeMap::new();
    for (nr, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::Config(format!("line {}: missing `=`", nr + 1)));
        };
        let value = value.trim().trim_matches('"').to_owned();
        values.insert(key.trim().to_owned(), value);
    }
    Ok(values)
}

fn parse_bool(values: &BTreeMap<String, String>, key: &str, default: bool) -> Result<bool> {
    match values.get(key).map(String::as_str) {
        None => Ok(default),
        Some("yes") | Some("true") | Some("on") | Some("1") => Ok(true),
        Some("no") | Some("false") | Some("off") | Some("0") => Ok(false),
        Some(other) => Err(Error::Config(format!("{key}: invalid boolean `{other}`"))),
    }
}

fn parse_i32(values: &BTreeMap<String, String>, key: &str, default: i32) -> Result<i32> {
    match values.get(key) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| Error::Config(format!("{key}: invalid integer `{value}`"))),
    }
}

fn parse_optional_usize(values: &BTreeMap<String, String>, key: &str) -> Result<Option<usize>> {
    match values.get(key) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key}: invalid integer `{value}`"))),
    }
}

fn collect_indexed_values(values: &BTreeMap<String, String>, prefix: &str) -> Vec<String> {
    let mut indexed: Vec<(usize, String)> = values
        .iter()
        .filter_map(|(key, value)| {
            let index: usize = key.strip_prefix(prefix)?.parse().ok()?;
            Some((index, value.clone()))
        })
        .collect();
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, value)| value).collect()
}

fn indexed_entries(values: &BTreeMap<String, String>, prefix: &str) -> Vec<usize> {
    let mut indices: Vec<usize> = values
        .keys()
        .filter_map(|key| {
            let rest = key.strip_prefix(prefix)?;
            let (index, _) = rest.split_once('.')?;
            index.parse().ok()
        })
        .collect();
    indices.sort_unstable();
    indices.dedup();
    indices
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

fn collect_keybinds(values: &BTreeMap<String, String>) -> Vec<KeybindConfig> {
    let mut binds = Vec::new();
    for index in indexed_entries(values, "keybind.") {
        let prefix = format!("keybind.{index}.");
        let get = |suffix: &str| values.get(&format!("{prefix}{suffix}"));

        let Some(trigger) = get("trigger") else {
            tracing::warn!("keybind.{index}: missing trigger, skipping");
            continue;
        };

        let mut actions = Vec::new();
        if let Some(action) = get("action") {
            match Action::parse(action) {
                Ok(action) => actions.push(action),
                Err(err) => tracing::warn!("keybind.{index}: {err}, skipping action"),
            }
        }
        for action in collect_indexed_values(values, &format!("{prefix}action.")) {
            match Action::parse(&action) {
                Ok(action) => actions.push(action),
                Err(err) => tracing::warn!("keybind.{index}: {err}, skipping action"),
            }
        }
        if actions.is_empty() {
            tracing::warn!("keybind.{index}: no actions, skipping");
            continue;
        }

        let mut bind = KeybindConfig::new(trigger, actions);
        bind.on_release = parse_bool(values, &format!("{prefix}on_release"), false).unwrap_or(false);
        bind.allow_when_locked =
            parse_bool(values, &format!("{prefix}allow_when_locked"), false).unwrap_or(false);
        bind.layout_dependent =
            parse_bool(values, &format!("{prefix}layout_dependent"), false).unwrap_or(false);
        bind.enabled = parse_bool(values, &format!("{prefix}enabled"), true).unwrap_or(true);
        bind.toggleable = parse_bool(values, &format!("{prefix}toggleable"), false).unwrap_or(false);
        bind.id = get("id").cloned();
        if let Some(list) = get("device_blacklist") {
            bind.device_blacklist = split_list(list);
        }
        if let Some(list) = get("device_whitelist") {
            bind.device_whitelist = split_list(list);
        }
        bind.condition_command = get("condition").cloned();
        if let Some(list) = get("condition_values") {
            bind.condition_values = split_list(list);
        }
        binds.push(bind);
    }
    binds
}

fn collect_window_rules(values: &BTreeMap<String, String>) -> Result<Vec<WindowRule>> {
    let mut rules = Vec::new();
    for index in indexed_entries(values, "window_rule.") {
        let prefix = format!("window_rule.{index}.");
        let get = |suffix: &str| values.get(&format!("{prefix}{suffix}"));

        let mut rule = WindowRule {
            app_id: get("app_id").cloned(),
            title: get("title").cloned(),
            ..Default::default()
        };
        if rule.app_id.is_none() && rule.title.is_none() {
            tracing::warn!("window_rule.{index}: no matcher, skipping");
            continue;
        }
        if let Some(value) = get("workspace") {
            rule.workspace = Some(value.parse().map_err(|_| {
                Error::Config(format!("window_rule.{index}.workspace: invalid `{value}`"))
            })?);
        }
        if get("focus").is_some() {
            rule.focus = Some(parse_bool(values, &format!("{prefix}focus"), true)?);
        }
        if get("fixed_position").is_some() {
            rule.fixed_position =
                Some(parse_bool(values, &format!("{prefix}fixed_position"), false)?);
        }
        if get("tile").is_some() {
            rule.tile = Some(parse_bool(values, &format!("{prefix}tile"), true)?);
        }
        if let Some(value) = get("tile_direction") {
            rule.tile_direction = Some(match value.as_str() {
                "vertical" => TileDirection::Vertical,
                "horizontal" => TileDirection::Horizontal,
                other => {
                    return Err(Error::Config(format!(
                        "window_rule.{index}.tile_direction: invalid `{other}`"
                    )))
                }
            });
        }
        rules.push(rule);
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_workspaces_and_binds() {
        let config = Config::default();
        assert_eq!(config.workspace_names.len(), 4);
        assert!(!config.keybinds.is_empty());
        assert!(config.keybinds.iter().all(|bind| bind.enabled));
    }

    #[test]
    fn parse_basic_values() {
        let config = parse(
            "gap = 16\n\
             workspaces.count = 2\n\
             workspaces.name.1 = \"web\"\n\
             tiling.enabled = yes\n",
        )
        .unwrap();
        assert_eq!(config.gap, 16);
        assert_eq!(config.workspace_names, vec!["web", "2"]);
        assert!(config.tiling_enabled);
        assert!(!config.tiling_grid_mode);
    }

    #[test]
    fn parse_keybind_with_condition_and_devices() {
        let config = parse(
            "keybind.1.trigger = \"W-Return\"\n\
             keybind.1.action = \"Execute foot\"\n\
             keybind.1.id = \"term\"\n\
             keybind.1.toggleable = yes\n\
             keybind.1.condition = \"echo on\"\n\
             keybind.1.condition_values = \"on, yes\"\n\
             keybind.1.device_whitelist = \"AT Translated Set 2 keyboard\"\n",
        )
        .unwrap();
        assert_eq!(config.keybinds.len(), 1);
        let bind = &config.keybinds[0];
        assert_eq!(bind.trigger, "W-Return");
        assert_eq!(bind.id.as_deref(), Some("term"));
        assert!(bind.toggleable);
        assert_eq!(bind.condition_command.as_deref(), Some("echo on"));
        assert_eq!(bind.condition_values, vec!["on", "yes"]);
        assert_eq!(bind.device_whitelist.len(), 1);
    }

    #[test]
    fn keybind_without_actions_is_skipped() {
        let config = parse("keybind.1.trigger = \"W-x\"\n").unwrap();
        // Falls back to the defaults because the only entry was dropped.
        assert!(config.keybinds.iter().all(|bind| bind.trigger != "W-x"));
    }

    #[test]
    fn window_rule_matching_is_case_insensitive() {
        let rule = WindowRule {
            app_id: Some("Firefox".to_owned()),
            title: Some("private".to_owned()),
            ..Default::default()
        };
        assert!(rule.matches(Some("firefox"), Some("Mozilla - Private Browsing")));
        assert!(!rule.matches(Some("firefox"), Some("Mozilla")));
        assert!(!rule.matches(None, Some("private")));
    }

    #[test]
    fn invalid_boolean_is_an_error() {
        assert!(parse("tiling.enabled = maybe\n").is_err());
    }
}
