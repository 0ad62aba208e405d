use crate::config::{self, Config};
use crate::document::Page;
use crate::filter::{run_pass, PassOutcome};
use crate::input::SearchBar;
use crate::markdown::{parse_page, render_page, MarkdownStyles, OutlineEntry, RenderContext, RenderedPage};
use crate::notice::Notifier;
use crate::theme::{ThemeManager, UiPalette};
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Stylize;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, ExecutableCommand};
use notify::{RecursiveMode, Watcher};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, List, ListItem, ListState, Paragraph};
use ratatui::Terminal;
use std::fs;
use std::io::{self, IsTerminal, Stdout, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use syntect::parsing::SyntaxSet;
use unicode_width::UnicodeWidthStr;

const SEARCH_PROMPT: &str = " Search: ";
const MATCH_MARGIN: usize = 2;

pub fn run_app(path: PathBuf, mut config: Config, query: Option<String>) -> Result<()> {
    let theme_manager = load_themes(&mut config)?;
    let mut app = App::new(path, config, theme_manager, query)?;

    let mut terminal = setup_terminal()?;
    let _guard = TerminalGuard;

    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;
    watcher
        .watch(&app.file_path, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", app.file_path.display()))?;

    let tick_rate = Duration::from_millis(50);

    loop {
        let size = terminal.size()?;
        let layout = app.layout(size);
        app.ensure_rendered(layout.body_width);
        app.clamp_scroll(layout.body_height);

        terminal.draw(|f| ui(f, &app, &layout))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && app.handle_key(key, layout.body_height) {
                    break;
                }
            }
        }

        while let Ok(msg) = rx.try_recv() {
            match msg {
                Ok(event) => app.on_fs_event(event),
                Err(err) => log::warn!("watch error: {err}"),
            }
        }

        app.handle_pending_reload();
    }

    Ok(())
}

/// Runs a single pass and writes the visible page to stdout. Highlights
/// are shown reversed when stdout is a terminal.
pub fn print_page(path: &Path, mut config: Config, query: Option<String>) -> Result<()> {
    let theme_manager = load_themes(&mut config)?;
    let width = crossterm::terminal::size().map(|(w, _)| w).unwrap_or(80);
    let mut app = App::new(path.to_path_buf(), config, theme_manager, query)?;
    app.refresh_render(width);

    let stdout = io::stdout();
    let styled = stdout.is_terminal();
    let mut out = stdout.lock();
    write_lines(&mut out, &app.rendered.lines, styled)?;
    out.flush()?;
    Ok(())
}

fn write_lines(out: &mut impl Write, lines: &[Line<'static>], styled: bool) -> Result<()> {
    for line in lines {
        let mut text = String::new();
        for span in &line.spans {
            let content = span.content.as_ref();
            if styled && span.style.add_modifier.contains(Modifier::REVERSED) {
                text.push_str(&content.reverse().to_string());
            } else {
                text.push_str(content);
            }
        }
        writeln!(out, "{}", text.trim_end())?;
    }
    Ok(())
}

fn load_themes(config: &mut Config) -> Result<ThemeManager> {
    let theme_manager = ThemeManager::load(config)?;
    if !theme_manager.contains(&config.theme) {
        let fallback = theme_manager.fallback_name().to_string();
        log::warn!("theme {:?} not found, using {fallback}", config.theme);
        config.theme = fallback;
        config::write_config(config)?;
    }
    Ok(theme_manager)
}

struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = stdout.execute(LeaveAlternateScreen);
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

#[derive(Default)]
struct FsReload {
    pending: bool,
    deadline: Option<Instant>,
}

struct LayoutInfo {
    search: Rect,
    status: Rect,
    outline: Option<Rect>,
    body: Rect,
    body_width: u16,
    body_height: u16,
}

struct App {
    file_path: PathBuf,
    config: Config,
    theme_manager: ThemeManager,
    syntax_set: SyntaxSet,
    page: Page,
    notifier: Notifier,
    search: SearchBar,
    outcome: Option<PassOutcome>,
    rendered: RenderedPage,
    ui: UiPalette,
    markdown_styles: MarkdownStyles,
    base_style: Style,
    scroll: usize,
    show_outline: bool,
    current_match: usize,
    last_width: u16,
    status: Option<String>,
    reload: FsReload,
}

impl App {
    fn new(path: PathBuf, config: Config, theme_manager: ThemeManager, query: Option<String>) -> Result<Self> {
        let source = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_source(path, &source, config, theme_manager, query)
    }

    fn from_source(
        path: PathBuf,
        source: &str,
        config: Config,
        theme_manager: ThemeManager,
        query: Option<String>,
    ) -> Result<Self> {
        let ui = theme_manager.ui_palette(&config.theme);
        let page = parse_page(source, config.section_level);
        let notifier = Notifier::for_content(&page.main, config.banner_hint.as_deref());
        let search = SearchBar::with_value(query.unwrap_or_default());
        let show_outline = config.show_outline;

        let mut app = Self {
            file_path: path,
            config,
            theme_manager,
            syntax_set: SyntaxSet::load_defaults_newlines(),
            page,
            notifier,
            search,
            outcome: None,
            rendered: RenderedPage::default(),
            ui,
            markdown_styles: ui.markdown_styles(),
            base_style: ui.base_style(),
            scroll: 0,
            show_outline,
            current_match: 0,
            last_width: 0,
            status: None,
            reload: FsReload::default(),
        };
        let outcome = run_pass(&mut app.page.main, app.search.value(), &app.notifier)?;
        app.outcome = Some(outcome);
        app.refresh_render(80);
        Ok(app)
    }

    fn layout(&self, size: Rect) -> LayoutInfo {
        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Min(1), Constraint::Length(1)])
            .split(size);
        let search = vertical[0];
        let main = vertical[1];
        let status = vertical[2];

        let (outline, body) = if self.show_outline {
            let outline_width = self.config.outline_width.min(main.width.saturating_sub(20));
            let horiz = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Length(outline_width), Constraint::Min(20)])
                .split(main);
            (Some(horiz[0]), horiz[1])
        } else {
            (None, main)
        };

        LayoutInfo {
            search,
            status,
            outline,
            body,
            body_width: body.width.saturating_sub(2).max(1),
            body_height: body.height.saturating_sub(2).max(1),
        }
    }

    fn ensure_rendered(&mut self, width: u16) {
        if width == 0 {
            return;
        }
        if self.last_width != width {
            self.last_width = width;
            self.refresh_render(width);
        }
    }

    fn refresh_render(&mut self, width: u16) {
        let theme = self.theme_manager.get(&self.config.theme);
        let ctx = RenderContext {
            styles: &self.markdown_styles,
            syntax_set: &self.syntax_set,
            theme,
            tab_width: self.config.tab_width,
        };
        let width = if self.config.wrap { width } else { u16::MAX };
        self.rendered = render_page(&self.page, &ctx, width);
        if self.current_match >= self.rendered.matches.len() {
            self.current_match = 0;
        }
    }

    fn render_width(&self) -> u16 {
        if self.last_width == 0 { 80 } else { self.last_width }
    }

    fn clamp_scroll(&mut self, height: u16) {
        let max_scroll = self.rendered.lines.len().saturating_sub(height as usize);
        if self.scroll > max_scroll {
            self.scroll = max_scroll;
        }
    }

    /// Runs a pass for the current search value and scrolls to the first
    /// highlight. A failed pass leaves the page untouched.
    fn apply_query(&mut self) {
        match run_pass(&mut self.page.main, self.search.value(), &self.notifier) {
            Ok(outcome) => {
                self.outcome = Some(outcome);
                self.status = None;
                self.current_match = 0;
                self.refresh_render(self.render_width());
                self.scroll = self
                    .rendered
                    .matches
                    .first()
                    .map_or(0, |line| line.saturating_sub(MATCH_MARGIN));
            }
            Err(err) => {
                log::error!("search pass failed: {err:#}");
                self.status = Some(format!("Search failed: {err}"));
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent, content_height: u16) -> bool {
        if self.search.is_focused() {
            self.handle_search_input(key);
            return false;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let page = content_height.max(1) as isize;
        match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Char('c') if ctrl => return true,
            KeyCode::Char('k') if ctrl => self.search.focus(),
            KeyCode::Char('/') => self.search.focus(),
            KeyCode::Char('j') | KeyCode::Down => self.scroll_by(1),
            KeyCode::Char('k') | KeyCode::Up => self.scroll_by(-1),
            KeyCode::PageDown | KeyCode::Char(' ') => self.scroll_by(page),
            KeyCode::PageUp => self.scroll_by(-page),
            KeyCode::Char('g') | KeyCode::Home => self.scroll = 0,
            KeyCode::Char('G') | KeyCode::End => self.scroll = self.rendered.lines.len(),
            KeyCode::Char('n') => self.jump_match(1),
            KeyCode::Char('N') => self.jump_match(-1),
            KeyCode::Char(']') => self.jump_section(true),
            KeyCode::Char('[') => self.jump_section(false),
            KeyCode::Char('o') => self.show_outline = !self.show_outline,
            _ => {}
        }
        false
    }

    fn handle_search_input(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let changed = match key.code {
            KeyCode::Esc => {
                self.search.clear();
                self.search.blur();
                true
            }
            KeyCode::Enter => {
                self.search.blur();
                false
            }
            KeyCode::Backspace => self.search.backspace(),
            KeyCode::Char('u') if ctrl => self.search.clear(),
            KeyCode::Char(c) if !ctrl && !key.modifiers.contains(KeyModifiers::ALT) => {
                self.search.insert(c)
            }
            _ => false,
        };
        if changed {
            self.apply_query();
        }
    }

    fn scroll_by(&mut self, delta: isize) {
        self.scroll = self.scroll.saturating_add_signed(delta);
    }

    fn jump_match(&mut self, delta: isize) {
        let len = self.rendered.matches.len();
        if len == 0 {
            return;
        }
        let idx = self.current_match as isize + delta;
        self.current_match = idx.rem_euclid(len as isize) as usize;
        if let Some(line) = self.rendered.matches.get(self.current_match) {
            self.scroll = line.saturating_sub(MATCH_MARGIN);
        }
    }

    fn jump_section(&mut self, forward: bool) {
        let mut lines = self.rendered.outline.iter().filter_map(|entry| entry.line);
        let target = if forward {
            lines.find(|&line| line > self.scroll)
        } else {
            lines.filter(|&line| line < self.scroll).last()
        };
        if let Some(line) = target {
            self.scroll = line;
        }
    }

    fn request_reload(&mut self) {
        self.reload.pending = true;
        self.reload.deadline = Some(Instant::now() + Duration::from_millis(150));
    }

    fn on_fs_event(&mut self, event: notify::Event) {
        if event.kind.is_access() {
            return;
        }
        self.request_reload();
    }

    fn handle_pending_reload(&mut self) {
        if !self.reload.pending {
            return;
        }
        if let Some(deadline) = self.reload.deadline {
            if Instant::now() < deadline {
                return;
            }
        }
        self.reload.pending = false;
        self.reload.deadline = None;
        self.reload_file();
    }

    fn reload_file(&mut self) {
        let anchor = self
            .rendered
            .plain_lines
            .get(self.scroll)
            .cloned()
            .unwrap_or_default();
        let source = match fs::read_to_string(&self.file_path) {
            Ok(text) => text,
            Err(err) => {
                log::warn!("reload of {} failed: {err}", self.file_path.display());
                self.status = Some(format!("Failed to reload: {err}"));
                return;
            }
        };
        match self.load_source(&source) {
            Ok(()) => {
                log::info!("reloaded {}", self.file_path.display());
                self.status = Some("Reloaded".to_string());
                if let Some(idx) = find_anchor(&anchor, &self.rendered.plain_lines, self.scroll) {
                    self.scroll = idx;
                }
            }
            Err(err) => self.status = Some(format!("Reload failed: {err}")),
        }
    }

    /// Swaps in a freshly parsed page with the current query applied.
    fn load_source(&mut self, source: &str) -> Result<()> {
        let mut page = parse_page(source, self.config.section_level);
        let notifier = Notifier::for_content(&page.main, self.config.banner_hint.as_deref());
        log::debug!("{} sections, hint {:?}", page.main.sections.len(), notifier.hint());
        let outcome = run_pass(&mut page.main, self.search.value(), &notifier)?;
        self.page = page;
        self.notifier = notifier;
        self.outcome = Some(outcome);
        self.current_match = 0;
        self.refresh_render(self.render_width());
        Ok(())
    }
}

fn current_section_index(scroll: usize, outline: &[OutlineEntry]) -> Option<usize> {
    outline
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.line.is_some_and(|line| line <= scroll))
        .map(|(idx, _)| idx)
        .last()
        .or_else(|| outline.iter().position(|entry| entry.line.is_some()))
}

fn find_anchor(anchor: &str, lines: &[String], prev_scroll: usize) -> Option<usize> {
    if anchor.trim().is_empty() {
        return None;
    }
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.as_str() == anchor)
        .min_by_key(|(idx, _)| idx.abs_diff(prev_scroll))
        .map(|(idx, _)| idx)
}

fn ui(f: &mut ratatui::Frame, app: &App, layout: &LayoutInfo) {
    let highlight_fg = app.ui.base_bg.unwrap_or(app.ui.base_fg);
    let highlight_style = Style::default().bg(app.ui.accent).fg(highlight_fg);
    let muted = Style::default().fg(app.ui.muted);

    f.render_widget(
        Paragraph::new(app.search_line()).style(app.base_style),
        layout.search,
    );
    if app.search.is_focused() {
        let offset = UnicodeWidthStr::width(SEARCH_PROMPT) + UnicodeWidthStr::width(app.search.value());
        let x = layout.search.x.saturating_add(offset as u16);
        f.set_cursor(x.min(layout.search.right().saturating_sub(1)), layout.search.y);
    }

    f.render_widget(
        Paragraph::new(app.status_line()).style(app.base_style),
        layout.status,
    );

    if let Some(outline_area) = layout.outline {
        let items: Vec<ListItem> = app
            .rendered
            .outline
            .iter()
            .map(|entry| {
                let indent = "  ".repeat(entry.level.saturating_sub(1) as usize);
                let item = ListItem::new(format!("{indent}{}", entry.title));
                if entry.line.is_some() {
                    item
                } else {
                    item.style(muted.add_modifier(Modifier::DIM))
                }
            })
            .collect();
        let mut state = ListState::default();
        state.select(current_section_index(app.scroll, &app.rendered.outline));
        let list = List::new(items)
            .block(
                Block::bordered()
                    .title("Outline")
                    .border_type(BorderType::Rounded)
                    .border_style(Style::default().fg(app.ui.border))
                    .style(app.base_style),
            )
            .style(app.base_style)
            .highlight_style(highlight_style);
        f.render_stateful_widget(list, outline_area, &mut state);
    }

    let file_name = app
        .file_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("marksift");
    let start = app.scroll.min(app.rendered.lines.len());
    let end = (start + layout.body_height as usize).min(app.rendered.lines.len());
    let body = Paragraph::new(Text::from(app.rendered.lines[start..end].to_vec()))
        .block(
            Block::bordered()
                .title(format!(" {file_name} "))
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(app.ui.border))
                .style(app.base_style),
        )
        .style(app.base_style);
    f.render_widget(body, layout.body);
}

impl App {
    fn search_line(&self) -> Line<'static> {
        let prompt_style = if self.search.is_focused() {
            Style::default().fg(self.ui.accent).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(self.ui.muted)
        };
        let mut spans = vec![Span::styled(SEARCH_PROMPT, prompt_style)];
        if self.search.value().is_empty() && !self.search.is_focused() {
            spans.push(Span::styled(
                "press / to search",
                Style::default().fg(self.ui.muted).add_modifier(Modifier::ITALIC),
            ));
        } else {
            spans.push(Span::styled(self.search.value().to_string(), self.base_style));
        }
        Line::from(spans)
    }

    fn status_line(&self) -> Line<'static> {
        let sep = || Span::styled(" | ", Style::default().fg(self.ui.muted));
        let mut parts = vec![Span::styled(
            "marksift",
            Style::default().fg(self.ui.accent).add_modifier(Modifier::BOLD),
        )];
        parts.push(sep());
        parts.push(Span::styled(
            self.file_path.to_string_lossy().to_string(),
            self.base_style,
        ));
        parts.push(sep());
        parts.push(Span::styled(
            format!("theme: {}", self.config.theme),
            Style::default().fg(self.ui.muted),
        ));
        if let Some(outcome) = &self.outcome {
            let color = if outcome.any_visible() { self.ui.muted } else { self.ui.accent };
            parts.push(sep());
            parts.push(Span::styled(
                format!("sections {}/{}", outcome.visible, outcome.total),
                Style::default().fg(color),
            ));
        }
        if !self.search.value().trim().is_empty() {
            let total = self.rendered.matches.len();
            let current = if total == 0 { 0 } else { self.current_match + 1 };
            parts.push(sep());
            parts.push(Span::styled(
                format!("match {current}/{total}"),
                Style::default().fg(self.ui.muted),
            ));
        }
        if let Some(msg) = &self.status {
            parts.push(sep());
            parts.push(Span::styled(msg.clone(), Style::default().fg(self.ui.accent)));
        }
        Line::from(parts)
    }
}
