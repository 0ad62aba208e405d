use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub theme: String,
    pub show_outline: bool,
    pub outline_width: u16,
    pub wrap: bool,
    pub tab_width: usize,
    pub bat_theme_dir: Option<PathBuf>,
    /// Headings at this level or above start a searchable section.
    pub section_level: u8,
    /// Replaces the generated hint under "No results found".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            theme: "base16-ocean.dark".to_string(),
            show_outline: true,
            outline_width: 28,
            wrap: true,
            tab_width: 4,
            bat_theme_dir: dirs::config_dir().map(|dir| dir.join("bat").join("themes")),
            section_level: 2,
            banner_hint: None,
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PartialConfig {
    theme: Option<String>,
    show_outline: Option<bool>,
    outline_width: Option<u16>,
    wrap: Option<bool>,
    tab_width: Option<usize>,
    bat_theme_dir: Option<PathBuf>,
    section_level: Option<u8>,
    banner_hint: Option<String>,
    log_file: Option<PathBuf>,
}

fn fill<T>(value: Option<T>, default: T, changed: &mut bool) -> T {
    match value {
        Some(v) => v,
        None => {
            *changed = true;
            default
        }
    }
}

impl PartialConfig {
    /// Fills missing keys from the defaults. The flag reports whether the
    /// file lacked a key that should be written back.
    fn apply_defaults(self) -> (Config, bool) {
        let defaults = Config::default();
        let mut changed = false;

        let bat_theme_dir = match self.bat_theme_dir {
            Some(dir) => Some(dir),
            None => {
                changed = true;
                defaults.bat_theme_dir
            }
        };
        let mut section_level = fill(self.section_level, defaults.section_level, &mut changed);
        if !(1..=6).contains(&section_level) {
            log::warn!("section_level {section_level} out of range, using 1..=6");
            section_level = section_level.clamp(1, 6);
            changed = true;
        }

        let cfg = Config {
            theme: fill(self.theme, defaults.theme, &mut changed),
            show_outline: fill(self.show_outline, defaults.show_outline, &mut changed),
            outline_width: fill(self.outline_width, defaults.outline_width, &mut changed),
            wrap: fill(self.wrap, defaults.wrap, &mut changed),
            tab_width: fill(self.tab_width, defaults.tab_width, &mut changed),
            bat_theme_dir,
            section_level,
            banner_hint: self.banner_hint,
            log_file: self.log_file,
        };
        (cfg, changed)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine config directory")?;
    Ok(base.join("marksift").join("config.toml"))
}

pub fn ensure_config_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

/// Reads `path`, creating it with defaults when absent and writing back
/// any keys the file was missing.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        write_config_to(path, &cfg)?;
        return Ok(cfg);
    }

    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let partial: PartialConfig =
        toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;
    let (cfg, changed) = partial.apply_defaults();
    if changed {
        log::info!("rewriting {} with filled or corrected keys", path.display());
        write_config_to(path, &cfg)?;
    }
    Ok(cfg)
}

pub fn write_config(cfg: &Config) -> Result<()> {
    write_config_to(&config_path()?, cfg)
}

pub fn write_config_to(path: &Path, cfg: &Config) -> Result<()> {
    ensure_config_dir(path)?;
    let text = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn open_config_in_editor() -> Result<()> {
    let path = config_path()?;
    if !path.exists() {
        write_config_to(&path, &Config::default())?;
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| "nvim".to_string());
    let mut parts = match shell_words::split(&editor) {
        Ok(p) if !p.is_empty() => p,
        _ => vec![editor],
    };
    let cmd = parts.remove(0);
    let status = Command::new(cmd)
        .args(parts)
        .arg(&path)
        .status()
        .with_context(|| format!("Failed to launch editor for {}", path.display()))?;
    if !status.success() {
        anyhow::bail!("Editor exited with status {}", status);
    }
    Ok(())
}
