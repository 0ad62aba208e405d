use crate::config::Config;
use crate::markdown::MarkdownStyles;
use anyhow::{Context, Result};
use ratatui::style::{Color, Modifier, Style};
use std::path::PathBuf;
use syntect::highlighting::{Theme, ThemeSet};

pub struct ThemeManager {
    theme_set: ThemeSet,
    theme_names: Vec<String>,
    fallback: Theme,
}

#[derive(Debug, Clone, Copy)]
pub struct UiPalette {
    pub base_fg: Color,
    pub base_bg: Option<Color>,
    pub accent: Color,
    pub muted: Color,
    pub code_bg: Option<Color>,
    pub border: Color,
}

impl ThemeManager {
    pub fn load(config: &Config) -> Result<Self> {
        let mut theme_set = ThemeSet::load_defaults();

        if let Some(dir) = resolve_bat_theme_dir(config) {
            if dir.exists() {
                let extra = ThemeSet::load_from_folder(&dir)
                    .with_context(|| format!("Failed to load themes from {}", dir.display()))?;
                log::debug!("loaded {} themes from {}", extra.themes.len(), dir.display());
                theme_set.themes.extend(extra.themes);
            }
        }

        let mut theme_names: Vec<String> = theme_set.themes.keys().cloned().collect();
        theme_names.sort();

        Ok(Self {
            theme_set,
            theme_names,
            fallback: Theme::default(),
        })
    }

    pub fn theme_names(&self) -> &[String] {
        &self.theme_names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.theme_set.themes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> &Theme {
        self.theme_set
            .themes
            .get(name)
            .or_else(|| self.theme_set.themes.get(self.fallback_name()))
            .unwrap_or(&self.fallback)
    }

    pub fn ui_palette(&self, name: &str) -> UiPalette {
        palette_from_theme(self.get(name))
    }

    pub fn fallback_name(&self) -> &str {
        self.theme_names
            .first()
            .map(|s| s.as_str())
            .unwrap_or("base16-ocean.dark")
    }
}

fn resolve_bat_theme_dir(config: &Config) -> Option<PathBuf> {
    if let Some(dir) = &config.bat_theme_dir {
        return Some(dir.clone());
    }
    let base = dirs::config_dir()?;
    Some(base.join("bat").join("themes"))
}

fn palette_from_theme(theme: &Theme) -> UiPalette {
    let settings = &theme.settings;
    let base_fg = settings.foreground.map(to_ratatui).unwrap_or(Color::Gray);
    let base_bg = settings.background.map(to_ratatui);
    let accent = settings
        .selection_foreground
        .or(settings.caret)
        .or(settings.foreground)
        .map(to_ratatui)
        .unwrap_or(Color::Cyan);
    let muted = settings
        .gutter_foreground
        .or(settings.foreground)
        .map(to_ratatui)
        .unwrap_or(Color::DarkGray);
    let code_bg = settings
        .line_highlight
        .or(settings.selection)
        .or(settings.background)
        .map(to_ratatui);

    UiPalette {
        base_fg,
        base_bg,
        accent,
        muted,
        code_bg,
        border: muted,
    }
}

fn to_ratatui(color: syntect::highlighting::Color) -> Color {
    Color::Rgb(color.r, color.g, color.b)
}

impl UiPalette {
    pub fn base_style(&self) -> Style {
        Style::default().fg(self.base_fg).bg(bg_or_reset(self.base_bg))
    }

    pub fn markdown_styles(&self) -> MarkdownStyles {
        let base = self.base_style();
        let heading_bold = Style::default().fg(self.accent).add_modifier(Modifier::BOLD);
        let code_bg = self.code_bg.or_else(|| adjust_bg(self.base_bg, -0.08));
        let muted = Style::default().fg(self.muted);

        MarkdownStyles {
            base,
            heading: [
                heading_bold.add_modifier(Modifier::UNDERLINED),
                heading_bold,
                heading_bold,
                Style::default().fg(self.accent),
                Style::default().fg(self.accent).add_modifier(Modifier::ITALIC),
                muted.add_modifier(Modifier::ITALIC),
            ],
            link_color: self.accent,
            inline_code: Style::default()
                .fg(self.accent)
                .bg(bg_or_reset(code_bg.or(self.base_bg))),
            prefix: muted,
            rule: muted,
            code_block_bg: code_bg.or(self.base_bg),
            code_border: Style::default().fg(self.border),
            code_header: muted.add_modifier(Modifier::BOLD),
            table_border: Style::default().fg(self.border),
            table_header: Style::default().add_modifier(Modifier::BOLD),
            mark: Style::default().add_modifier(Modifier::REVERSED),
            banner_title: heading_bold,
        }
    }
}

fn bg_or_reset(color: Option<Color>) -> Color {
    color.unwrap_or(Color::Reset)
}

fn adjust_bg(color: Option<Color>, delta: f32) -> Option<Color> {
    match color {
        Some(Color::Rgb(r, g, b)) => Some(Color::Rgb(
            adjust_channel(r, delta),
            adjust_channel(g, delta),
            adjust_channel(b, delta),
        )),
        _ => None,
    }
}

fn adjust_channel(value: u8, delta: f32) -> u8 {
    let v = value as f32 / 255.0;
    ((v + delta).clamp(0.0, 1.0) * 255.0).round() as u8
}
