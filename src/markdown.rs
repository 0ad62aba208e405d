use crate::document::{
    leaves, normalize, text_content, ColumnAlign, Element, Leaf, MainContent, Node, Opaque,
    OpaqueKind, Page, Section, Tag,
};
use crate::notice::Banner;
use pulldown_cmark::{Alignment, CodeBlockKind, Event, Options, Parser, Tag as MdTag, TagEnd};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use std::borrow::Cow;
use std::ops::Range;
use syntect::easy::HighlightLines;
use syntect::highlighting::{FontStyle, Theme};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

#[derive(Debug, Clone, Copy)]
pub struct MarkdownStyles {
    pub base: Style,
    pub heading: [Style; 6],
    pub link_color: Color,
    pub inline_code: Style,
    pub prefix: Style,
    pub rule: Style,
    pub code_block_bg: Option<Color>,
    pub code_border: Style,
    pub code_header: Style,
    pub table_border: Style,
    pub table_header: Style,
    pub mark: Style,
    pub banner_title: Style,
}

pub struct RenderContext<'a> {
    pub styles: &'a MarkdownStyles,
    pub syntax_set: &'a SyntaxSet,
    pub theme: &'a Theme,
    pub tab_width: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    pub section: usize,
    pub level: u8,
    pub title: String,
    /// First rendered line, `None` while the section is hidden.
    pub line: Option<usize>,
}

#[derive(Default)]
pub struct RenderedPage {
    pub lines: Vec<Line<'static>>,
    pub plain_lines: Vec<String>,
    pub outline: Vec<OutlineEntry>,
    /// Rendered lines carrying at least one search highlight.
    pub matches: Vec<usize>,
}

/// Parses markdown into a [`Page`]. Every heading of level `section_level`
/// or above opens a new section that runs until the next such heading.
pub fn parse_page(input: &str, section_level: u8) -> Page {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_YAML_STYLE_METADATA_BLOCKS);

    let normalized = normalize_line_endings(input);
    let parser = Parser::new_ext(normalized.as_ref(), options);

    let mut tree = TreeBuilder::new();
    for event in parser {
        if tree.skip_depth > 0 {
            match event {
                Event::Start(MdTag::MetadataBlock(_)) => tree.skip_depth += 1,
                Event::End(TagEnd::MetadataBlock(_)) => tree.skip_depth -= 1,
                _ => {}
            }
            continue;
        }
        match event {
            Event::Start(tag) => match tag {
                MdTag::Paragraph => tree.open(Tag::Paragraph),
                MdTag::Heading { level, .. } => tree.open(Tag::Heading(level as u8)),
                MdTag::BlockQuote => tree.open(Tag::BlockQuote),
                MdTag::CodeBlock(kind) => tree.open(Tag::CodeBlock(code_language(kind))),
                MdTag::HtmlBlock => tree.html = Some(String::new()),
                MdTag::List(start) => tree.open(Tag::List(start)),
                MdTag::Item => tree.open(Tag::Item),
                MdTag::FootnoteDefinition(label) => {
                    tree.open(Tag::FootnoteDefinition(label.to_string()))
                }
                MdTag::Table(alignments) => tree.open(Tag::Table(
                    alignments.into_iter().map(ColumnAlign::from).collect(),
                )),
                MdTag::TableHead => tree.open(Tag::TableHead),
                MdTag::TableRow => tree.open(Tag::TableRow),
                MdTag::TableCell => tree.open(Tag::TableCell),
                MdTag::Emphasis => tree.open(Tag::Emphasis),
                MdTag::Strong => tree.open(Tag::Strong),
                MdTag::Strikethrough => tree.open(Tag::Strikethrough),
                MdTag::Link { dest_url, .. } => tree.open(Tag::Link(dest_url.to_string())),
                MdTag::Image { dest_url, .. } => tree.open(Tag::Image(dest_url.to_string())),
                MdTag::MetadataBlock(_) => tree.skip_depth += 1,
            },
            Event::End(tag) => match tag {
                TagEnd::HtmlBlock => tree.finish_html(),
                _ => tree.close(),
            },
            Event::Text(text) => match tree.html.as_mut() {
                Some(html) => html.push_str(&text),
                None => tree.push_text(&text),
            },
            Event::Code(text) if tree.raw_inline.is_some() => tree.push_text(&text),
            Event::Code(text) => tree.push(Node::element(Tag::Code, vec![Node::text(text.to_string())])),
            Event::Html(text) => match tree.html.as_mut() {
                Some(html) => html.push_str(&text),
                None => tree.push(Node::element(Tag::HtmlBlock, html_nodes(&text))),
            },
            Event::InlineHtml(text) => tree.push_inline_html(&text),
            Event::FootnoteReference(label) => tree.push_text(&format!("[{label}]")),
            Event::SoftBreak => tree.push_text(" "),
            Event::HardBreak => tree.push(Node::Element(Element::new(Tag::HardBreak))),
            Event::Rule => tree.push(Node::Element(Element::new(Tag::Rule))),
            Event::TaskListMarker(checked) => {
                tree.push(Node::Element(Element::new(Tag::TaskMarker(checked))))
            }
        }
    }

    split_sections(tree.finish(), section_level.clamp(1, 6))
}

fn normalize_line_endings(input: &str) -> Cow<'_, str> {
    if input.contains('\r') {
        Cow::Owned(input.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(input)
    }
}

fn code_language(kind: CodeBlockKind) -> Option<String> {
    match kind {
        CodeBlockKind::Fenced(lang) => {
            let trimmed = lang.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        CodeBlockKind::Indented => None,
    }
}

/// Kind of the HTML construct that `html` opens with.
fn classify_html(html: &str) -> OpaqueKind {
    let head = html
        .trim_start()
        .chars()
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();
    if opens_tag(&head, "script") {
        OpaqueKind::Script
    } else if opens_tag(&head, "style") {
        OpaqueKind::Style
    } else if head.starts_with("<!--") {
        OpaqueKind::Comment
    } else {
        OpaqueKind::Markup
    }
}

fn opens_tag(head: &str, name: &str) -> bool {
    head.strip_prefix('<')
        .and_then(|rest| rest.strip_prefix(name))
        .is_some_and(|rest| !rest.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '-'))
}

/// Byte offset just past the `</name ...>` closing tag.
fn closing_tag_end(html: &str, name: &str) -> Option<usize> {
    let lower = html.to_ascii_lowercase();
    let close = lower.find(&format!("</{name}"))?;
    lower[close..].find('>').map(|end| close + end + 1)
}

fn is_unclosed_raw_element(html: &str) -> bool {
    match classify_html(html) {
        OpaqueKind::Script => closing_tag_end(html, "script").is_none(),
        OpaqueKind::Style => closing_tag_end(html, "style").is_none(),
        OpaqueKind::Comment | OpaqueKind::Markup => false,
    }
}

/// Splits raw HTML into tag, comment and script/style leaves with the
/// readable text between them kept as ordinary text.
fn html_nodes(raw: &str) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut rest = raw;
    while let Some(open) = rest.find('<') {
        let (text, tail) = rest.split_at(open);
        if !text.is_empty() {
            nodes.push(Node::text(text));
        }
        let is_tag = tail[1..]
            .starts_with(|c: char| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'));
        if !is_tag {
            nodes.push(Node::text("<"));
            rest = &tail[1..];
            continue;
        }
        let kind = classify_html(tail);
        let end = match kind {
            OpaqueKind::Script => closing_tag_end(tail, "script"),
            OpaqueKind::Style => closing_tag_end(tail, "style"),
            OpaqueKind::Comment => tail.find("-->").map(|idx| idx + 3),
            OpaqueKind::Markup => tail.find('>').map(|idx| idx + 1),
        }
        .unwrap_or(tail.len());
        nodes.push(Node::opaque(kind, &tail[..end]));
        rest = &tail[end..];
    }
    if !rest.is_empty() {
        nodes.push(Node::text(rest));
    }
    normalize(&mut nodes);
    nodes
}

impl From<Alignment> for ColumnAlign {
    fn from(align: Alignment) -> Self {
        match align {
            Alignment::None => ColumnAlign::None,
            Alignment::Left => ColumnAlign::Left,
            Alignment::Center => ColumnAlign::Center,
            Alignment::Right => ColumnAlign::Right,
        }
    }
}

/// Builds the node tree from parser events, merging adjacent text as it goes.
struct TreeBuilder {
    root: Vec<Node>,
    open: Vec<Element>,
    html: Option<String>,
    /// Inline `<script>`/`<style>` markup waiting for its closing tag.
    raw_inline: Option<String>,
    skip_depth: usize,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            root: Vec::new(),
            open: Vec::new(),
            html: None,
            raw_inline: None,
            skip_depth: 0,
        }
    }

    fn children_mut(&mut self) -> &mut Vec<Node> {
        match self.open.last_mut() {
            Some(element) => &mut element.children,
            None => &mut self.root,
        }
    }

    fn open(&mut self, tag: Tag) {
        self.flush_inline_html();
        self.open.push(Element::new(tag));
    }

    fn close(&mut self) {
        self.flush_inline_html();
        if let Some(element) = self.open.pop() {
            self.push(Node::Element(element));
        }
    }

    fn push(&mut self, node: Node) {
        self.flush_inline_html();
        self.children_mut().push(node);
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(raw) = self.raw_inline.as_mut() {
            raw.push_str(text);
            return;
        }
        let children = self.children_mut();
        if let Some(Node::Text(prev)) = children.last_mut() {
            prev.push_str(text);
        } else {
            children.push(Node::text(text));
        }
    }

    /// Inline HTML arrives one tag per event. A `<script>` or `<style>`
    /// opener holds back everything up to its closing tag so the body
    /// becomes a single opaque leaf.
    fn push_inline_html(&mut self, fragment: &str) {
        let pending = match self.raw_inline.take() {
            Some(mut raw) => {
                raw.push_str(fragment);
                raw
            }
            None => fragment.to_string(),
        };
        if is_unclosed_raw_element(&pending) {
            self.raw_inline = Some(pending);
        } else {
            self.push_html(&pending);
        }
    }

    fn flush_inline_html(&mut self) {
        if let Some(raw) = self.raw_inline.take() {
            self.push_html(&raw);
        }
    }

    fn push_html(&mut self, raw: &str) {
        for node in html_nodes(raw) {
            match node {
                Node::Text(text) => self.push_text(&text),
                other => self.push(other),
            }
        }
    }

    fn finish_html(&mut self) {
        if let Some(html) = self.html.take() {
            self.push(Node::element(Tag::HtmlBlock, html_nodes(&html)));
        }
    }

    fn finish(mut self) -> Vec<Node> {
        self.finish_html();
        self.flush_inline_html();
        while !self.open.is_empty() {
            self.close();
        }
        self.root
    }
}

fn split_sections(nodes: Vec<Node>, section_level: u8) -> Page {
    let mut preamble = Vec::new();
    let mut sections = Vec::new();
    let mut current: Option<Section> = None;

    for node in nodes {
        let heading_level = match &node {
            Node::Element(Element {
                tag: Tag::Heading(level),
                ..
            }) if *level <= section_level => Some(*level),
            _ => None,
        };
        if let Some(level) = heading_level {
            sections.extend(current.take());
            let label = text_content(std::slice::from_ref(&node)).trim().to_string();
            current = Some(Section::new(label, level, vec![node]));
            continue;
        }
        match current.as_mut() {
            Some(section) => section.nodes_mut().push(node),
            None => preamble.push(node),
        }
    }
    sections.extend(current);

    Page {
        preamble,
        main: MainContent::new(sections),
    }
}

/// Renders the preamble, the visible sections and the no-results banner,
/// wrapped to `width`.
pub fn render_page(page: &Page, ctx: &RenderContext<'_>, width: u16) -> RenderedPage {
    let mut renderer = Renderer::new(ctx);
    renderer.render_nodes(&page.preamble);

    let mut section_starts = Vec::with_capacity(page.main.sections.len());
    for section in &page.main.sections {
        if !section.is_visible() {
            section_starts.push(None);
            continue;
        }
        renderer.flush();
        let start = renderer.raw_lines.len();
        renderer.render_nodes(section.nodes());
        renderer.flush();
        let start = first_non_blank(&renderer.raw_lines, start);
        section_starts.push(Some(start));
    }

    if let Some(banner) = page.main.banner() {
        renderer.render_banner(banner);
    }
    let raw_lines = renderer.finish();

    let width = width.max(1) as usize;
    let mut lines: Vec<Line<'static>> = Vec::new();
    let mut raw_to_wrapped: Vec<usize> = Vec::with_capacity(raw_lines.len());
    for line in &raw_lines {
        raw_to_wrapped.push(lines.len());
        let mut wrapped = wrap_line(line, width);
        if wrapped.is_empty() {
            wrapped.push(Line::from(""));
        }
        lines.extend(wrapped);
    }

    let outline = page
        .main
        .sections
        .iter()
        .zip(section_starts)
        .enumerate()
        .map(|(idx, (section, start))| OutlineEntry {
            section: idx,
            level: section.level(),
            title: section.label().to_string(),
            line: start.map(|raw| raw_to_wrapped.get(raw).copied().unwrap_or(lines.len())),
        })
        .collect();

    let matches = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.spans.iter().any(|span| is_mark(span.style)))
        .map(|(idx, _)| idx)
        .collect();
    let plain_lines = lines.iter().map(line_to_plain).collect();

    RenderedPage {
        lines,
        plain_lines,
        outline,
        matches,
    }
}

fn is_mark(style: Style) -> bool {
    style.add_modifier.contains(Modifier::REVERSED)
}

fn first_non_blank(lines: &[Line<'static>], from: usize) -> usize {
    let mut idx = from;
    while idx + 1 < lines.len() && line_to_plain(&lines[idx]).trim().is_empty() {
        idx += 1;
    }
    idx
}

struct Renderer<'a> {
    ctx: &'a RenderContext<'a>,
    raw_lines: Vec<Line<'static>>,
    line: LineBuilder,
    base: Style,
    inline: Style,
    in_code: bool,
    list_stack: Vec<ListKind>,
    pending_list_prefix: Option<String>,
    blockquote_level: usize,
    in_table: bool,
}

impl<'a> Renderer<'a> {
    fn new(ctx: &'a RenderContext<'a>) -> Self {
        Self {
            ctx,
            raw_lines: Vec::new(),
            line: LineBuilder::new(),
            base: ctx.styles.base,
            inline: Style::default(),
            in_code: false,
            list_stack: Vec::new(),
            pending_list_prefix: None,
            blockquote_level: 0,
            in_table: false,
        }
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        self.flush();
        while self
            .raw_lines
            .last()
            .is_some_and(|line| line_to_plain(line).is_empty())
        {
            self.raw_lines.pop();
        }
        self.raw_lines
    }

    fn flush(&mut self) {
        if let Some(line) = self.line.take_line() {
            self.raw_lines.push(line);
        }
    }

    fn blank(&mut self) {
        self.raw_lines.push(Line::from(""));
    }

    fn ensure_prefix(&mut self) {
        if self.in_table {
            return;
        }
        let prefix = current_prefix(self.blockquote_level, self.pending_list_prefix.as_deref());
        self.line.ensure_prefix(&prefix, self.ctx.styles.prefix);
    }

    fn push_inline(&mut self, text: &str, style: Style) {
        self.ensure_prefix();
        self.line.push_text(text, style, self.ctx.tab_width);
    }

    fn text_style(&self) -> Style {
        if self.in_code {
            self.ctx.styles.inline_code.patch(self.inline)
        } else if self.in_table {
            self.inline
        } else {
            self.base.patch(self.inline)
        }
    }

    /// Renders `children` with the inline style adjusted by `apply`.
    fn render_styled(&mut self, children: &[Node], apply: impl FnOnce(Style) -> Style) {
        let saved = self.inline;
        self.inline = apply(saved);
        self.render_nodes(children);
        self.inline = saved;
    }

    fn render_nodes(&mut self, nodes: &[Node]) {
        for node in nodes {
            self.render_node(node);
        }
    }

    fn render_node(&mut self, node: &Node) {
        match node {
            Node::Text(text) => self.push_inline(text, self.text_style()),
            Node::Mark(text) => self.push_inline(text, self.text_style().patch(self.ctx.styles.mark)),
            Node::Opaque(opaque) => self.render_opaque(opaque),
            Node::Element(element) => self.render_element(element),
        }
    }

    fn render_opaque(&mut self, opaque: &Opaque) {
        if opaque.kind.is_displayed() {
            self.push_inline(&opaque.text, self.ctx.styles.prefix);
        }
    }

    /// Displayed markup is muted; text between tags keeps its line breaks.
    fn render_html_block(&mut self, children: &[Node]) {
        self.flush();
        let start = self.raw_lines.len();
        let text_style = self.text_style();
        for node in children {
            let (text, style) = match node {
                Node::Text(text) => (text.as_str(), text_style),
                Node::Mark(text) => (text.as_str(), text_style.patch(self.ctx.styles.mark)),
                Node::Opaque(opaque) if opaque.kind.is_displayed() => {
                    (opaque.text.as_str(), self.ctx.styles.prefix)
                }
                _ => continue,
            };
            for (idx, piece) in text.split('\n').enumerate() {
                if idx > 0 {
                    self.flush();
                }
                if !piece.is_empty() {
                    self.push_inline(piece, style);
                }
            }
        }
        self.flush();
        if self.raw_lines.len() > start {
            self.blank();
        }
    }

    fn render_element(&mut self, element: &Element) {
        let children = element.children.as_slice();
        match &element.tag {
            Tag::Paragraph => {
                self.ensure_prefix();
                self.render_nodes(children);
                if !self.in_table {
                    self.flush();
                    self.blank();
                }
            }
            Tag::Heading(level) => self.render_heading(*level, children),
            Tag::BlockQuote => {
                self.blockquote_level += 1;
                self.ensure_prefix();
                self.render_nodes(children);
                self.blockquote_level = self.blockquote_level.saturating_sub(1);
                self.flush();
                self.blank();
            }
            Tag::CodeBlock(language) => {
                self.flush();
                self.render_code_block(language.as_deref(), children);
                self.blank();
            }
            Tag::List(start) => {
                self.list_stack.push(ListKind::from(*start));
                self.render_nodes(children);
                self.list_stack.pop();
                self.flush();
            }
            Tag::Item => {
                self.flush();
                self.pending_list_prefix = Some(list_prefix(&mut self.list_stack));
                self.ensure_prefix();
                self.render_nodes(children);
                self.pending_list_prefix = None;
                self.flush();
            }
            Tag::FootnoteDefinition(label) => {
                self.flush();
                self.push_inline(&format!("[{label}]: "), self.ctx.styles.prefix);
                self.render_nodes(children);
                self.flush();
                self.blank();
            }
            Tag::Table(alignments) => {
                self.flush();
                self.render_table_element(alignments, children);
                self.blank();
            }
            Tag::TableHead | Tag::TableRow | Tag::TableCell => self.render_nodes(children),
            Tag::Emphasis => {
                self.render_styled(children, |style| style.add_modifier(Modifier::ITALIC))
            }
            Tag::Strong => self.render_styled(children, |style| style.add_modifier(Modifier::BOLD)),
            Tag::Strikethrough => {
                self.render_styled(children, |style| style.add_modifier(Modifier::CROSSED_OUT))
            }
            Tag::Link(_) | Tag::Image(_) => {
                let link = self.ctx.styles.link_color;
                self.render_styled(children, |style| {
                    style.fg(link).add_modifier(Modifier::UNDERLINED)
                })
            }
            Tag::Code => {
                let was_code = std::mem::replace(&mut self.in_code, true);
                self.render_nodes(children);
                self.in_code = was_code;
            }
            Tag::TaskMarker(checked) => {
                let marker = if *checked { "[x] " } else { "[ ] " };
                self.push_inline(marker, self.ctx.styles.prefix);
            }
            Tag::HardBreak => {
                if self.in_table {
                    self.push_inline(" ", self.text_style());
                } else {
                    self.flush();
                }
            }
            Tag::HtmlBlock => self.render_html_block(children),
            Tag::Rule => {
                self.flush();
                self.raw_lines
                    .push(Line::from(Span::styled("─".repeat(48), self.ctx.styles.rule)));
                self.blank();
            }
        }
    }

    fn render_heading(&mut self, level: u8, children: &[Node]) {
        self.flush();
        if level <= 2 && !self.raw_lines.is_empty() {
            self.blank();
        }
        let saved = std::mem::replace(&mut self.base, heading_style(self.ctx.styles, level));
        self.render_nodes(children);
        self.base = saved;

        let width = self.line.plain.trim().chars().count();
        self.flush();
        if level <= 2 {
            let ch = if level == 1 { '═' } else { '─' };
            let underline = ch.to_string().repeat(width.clamp(4, 48));
            self.raw_lines
                .push(Line::from(Span::styled(underline, self.ctx.styles.rule)));
        }
        self.blank();
    }

    fn render_banner(&mut self, banner: &Banner) {
        self.flush();
        if !self.raw_lines.is_empty() {
            self.blank();
        }
        self.raw_lines.push(Line::from(Span::styled(
            banner.title.clone(),
            self.ctx.styles.banner_title,
        )));
        self.raw_lines
            .push(Line::from(Span::styled(banner.hint.clone(), self.ctx.styles.prefix)));
        self.blank();
    }

    fn render_table_element(&mut self, alignments: &[ColumnAlign], children: &[Node]) {
        let mut table = Table {
            alignments: alignments.to_vec(),
            rows: Vec::new(),
            header_rows: 0,
        };
        for child in children {
            let Node::Element(element) = child else {
                continue;
            };
            match element.tag {
                Tag::TableHead => {
                    let has_rows = element
                        .children
                        .iter()
                        .any(|node| matches!(node, Node::Element(row) if row.tag == Tag::TableRow));
                    if !has_rows {
                        self.push_table_row(&mut table, &element.children, true);
                        continue;
                    }
                    for node in &element.children {
                        if let Node::Element(row) = node {
                            self.push_table_row(&mut table, &row.children, true);
                        }
                    }
                }
                Tag::TableRow => self.push_table_row(&mut table, &element.children, false),
                _ => {}
            }
        }
        table.render(self.ctx.styles, &mut self.raw_lines);
    }

    fn push_table_row(&mut self, table: &mut Table, cells: &[Node], header: bool) {
        let row: Vec<TableCell> = cells
            .iter()
            .filter_map(|cell| match cell {
                Node::Element(element) if element.tag == Tag::TableCell => {
                    Some(self.table_cell(&element.children))
                }
                _ => None,
            })
            .collect();
        if row.is_empty() {
            return;
        }
        if header {
            table.header_rows += 1;
        }
        table.rows.push(row);
    }

    fn table_cell(&mut self, children: &[Node]) -> TableCell {
        let saved_line = std::mem::replace(&mut self.line, LineBuilder::new());
        let was_in_table = std::mem::replace(&mut self.in_table, true);
        self.render_nodes(children);
        self.in_table = was_in_table;
        let builder = std::mem::replace(&mut self.line, saved_line);

        let spans = trim_cell(builder.spans);
        let width = spans
            .iter()
            .map(|span| UnicodeWidthStr::width(span.content.as_ref()))
            .sum();
        TableCell { width, spans }
    }

    fn render_code_block(&mut self, language: Option<&str>, children: &[Node]) {
        let mut text = String::new();
        let mut marks: Vec<Range<usize>> = Vec::new();
        for leaf in leaves(children) {
            let start = text.len();
            text.push_str(leaf.content());
            if matches!(leaf, Leaf::Mark(_)) {
                marks.push(start..text.len());
            }
        }

        let ctx = self.ctx;
        let styles = ctx.styles;
        let syntax = resolve_code_syntax(ctx.syntax_set, language);
        let mut highlighter = HighlightLines::new(syntax, ctx.theme);
        let code_bg = styles.code_block_bg;
        let border_style = styles.code_border;
        let pad_style = Style::default().bg(code_bg.unwrap_or(Color::Reset));

        let max_width = LinesWithEndings::from(&text)
            .map(|line| UnicodeWidthStr::width(line.trim_end_matches('\n')))
            .max()
            .unwrap_or(0);
        let inner_width = max_width.saturating_add(2);

        let label = language.filter(|s| !s.is_empty()).unwrap_or("code");
        let header = format!(" {label} ");
        let header_width = UnicodeWidthStr::width(header.as_str());
        if header_width + 2 <= inner_width {
            let dashes = inner_width - header_width;
            let left = dashes / 2;
            let right = dashes - left;
            self.raw_lines.push(Line::from(vec![
                Span::styled("┌", border_style),
                Span::styled("─".repeat(left), border_style),
                Span::styled(header, styles.code_header),
                Span::styled("─".repeat(right), border_style),
                Span::styled("┐", border_style),
            ]));
        } else {
            self.raw_lines.push(Line::from(Span::styled(
                format!("┌{}┐", "─".repeat(inner_width)),
                border_style,
            )));
        }
        let padding_line = Line::from(vec![
            Span::styled("│", border_style),
            Span::styled(" ".repeat(inner_width), pad_style),
            Span::styled("│", border_style),
        ]);
        self.raw_lines.push(padding_line.clone());

        let mut offset = 0usize;
        for line in LinesWithEndings::from(&text) {
            let line_start = offset;
            offset += line.len();
            let content_len = line.trim_end_matches('\n').len();

            let ranges = match highlighter.highlight_line(line, ctx.syntax_set) {
                Ok(r) => r,
                Err(_) => vec![(syntect::highlighting::Style::default(), line)],
            };
            let mut code_spans = Vec::new();
            let mut line_width = 0usize;
            for (style, fragment) in ranges {
                let fragment = fragment.trim_end_matches('\n');
                if fragment.is_empty() {
                    continue;
                }
                line_width += UnicodeWidthStr::width(fragment);
                code_spans.push(Span::styled(
                    fragment.to_string(),
                    syntect_to_ratatui(style, code_bg),
                ));
            }
            let local: Vec<Range<usize>> = marks
                .iter()
                .filter(|r| r.end > line_start && r.start < line_start + content_len)
                .map(|r| {
                    r.start.max(line_start) - line_start
                        ..r.end.min(line_start + content_len) - line_start
                })
                .collect();
            let code_line = apply_highlight(Line::from(code_spans), &local, styles.mark);

            let mut spans = vec![Span::styled("│", border_style), Span::styled(" ", pad_style)];
            spans.extend(code_line.spans);
            if line_width < max_width {
                spans.push(Span::styled(" ".repeat(max_width - line_width), pad_style));
            }
            spans.push(Span::styled(" ", pad_style));
            spans.push(Span::styled("│", border_style));
            self.raw_lines.push(Line::from(spans));
        }

        self.raw_lines.push(padding_line);
        let bottom = format!("└{}┘", "─".repeat(inner_width));
        self.raw_lines.push(Line::from(Span::styled(bottom, border_style)));
    }
}

fn heading_style(styles: &MarkdownStyles, level: u8) -> Style {
    let idx = level.saturating_sub(1).min(5) as usize;
    styles.heading[idx]
}

/// Patches `mark` onto the byte `ranges` of `line`, splitting spans at the
/// range edges.
fn apply_highlight(line: Line<'static>, ranges: &[Range<usize>], mark: Style) -> Line<'static> {
    if ranges.is_empty() {
        return line;
    }

    let mut out_spans: Vec<Span<'static>> = Vec::new();
    let mut cursor = 0usize;

    for span in &line.spans {
        let text = span.content.as_ref();
        let span_start = cursor;
        let span_end = cursor + text.len();

        let mut local_idx = 0usize;
        for range in ranges.iter().filter(|r| r.end > span_start && r.start < span_end) {
            let local_start = range.start.max(span_start) - span_start;
            let local_end = range.end.min(span_end) - span_start;

            if local_start > local_idx {
                out_spans.push(Span::styled(
                    text[local_idx..local_start].to_string(),
                    span.style,
                ));
            }
            out_spans.push(Span::styled(
                text[local_start..local_end].to_string(),
                span.style.patch(mark),
            ));
            local_idx = local_end;
        }

        if local_idx < text.len() {
            out_spans.push(Span::styled(text[local_idx..].to_string(), span.style));
        }
        cursor = span_end;
    }

    Line::from(out_spans)
}

fn wrap_line(line: &Line<'static>, width: usize) -> Vec<Line<'static>> {
    if width == 0 {
        return vec![line.clone()];
    }
    let mut wrapper = Wrapper::new(line, width);
    for span in &line.spans {
        for (is_space, run) in split_runs(&span.content) {
            if is_space {
                wrapper.push_space(run, span.style);
            } else {
                wrapper.push_word(run, span.style);
            }
        }
    }
    wrapper.finish()
}

/// Greedy word wrapper over styled spans. Rows of a line with one uniform
/// background are padded to the full width.
struct Wrapper {
    width: usize,
    fill: Option<Style>,
    out: Vec<Line<'static>>,
    row: Vec<Span<'static>>,
    row_width: usize,
}

impl Wrapper {
    fn new(line: &Line<'static>, width: usize) -> Self {
        let fill = uniform_bg(line)
            .filter(|_| width <= 500)
            .map(|bg| Style::default().bg(bg));
        Self {
            width,
            fill,
            out: Vec::new(),
            row: Vec::new(),
            row_width: 0,
        }
    }

    fn push_word(&mut self, text: &str, style: Style) {
        let text_width = UnicodeWidthStr::width(text);
        if text_width > self.width {
            self.push_long_word(text, style);
            return;
        }
        if self.row_width + text_width > self.width && !self.row.is_empty() {
            self.break_row();
        }
        self.push_span(text.to_string(), style, text_width);
    }

    fn push_space(&mut self, text: &str, style: Style) {
        if self.row.is_empty() {
            return;
        }
        let text_width = UnicodeWidthStr::width(text);
        if self.row_width + text_width > self.width {
            self.break_row();
        } else {
            self.push_span(text.to_string(), style, text_width);
        }
    }

    /// Breaks a word wider than the row by character.
    fn push_long_word(&mut self, text: &str, style: Style) {
        if !self.row.is_empty() {
            self.break_row();
        }
        let mut chunk = String::new();
        let mut chunk_width = 0usize;
        for ch in text.chars() {
            let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
            if chunk_width + ch_width > self.width && !chunk.is_empty() {
                self.out.push(Line::from(Span::styled(std::mem::take(&mut chunk), style)));
                chunk_width = 0;
            }
            chunk.push(ch);
            chunk_width += ch_width;
        }
        if !chunk.is_empty() {
            self.push_span(chunk, style, chunk_width);
        }
    }

    fn push_span(&mut self, text: String, style: Style, width: usize) {
        self.row.push(Span::styled(text, style));
        self.row_width += width;
    }

    fn break_row(&mut self) {
        let mut row = std::mem::take(&mut self.row);
        self.row_width = 0;
        trim_trailing_spaces(&mut row);
        if let Some(style) = self.fill {
            let used: usize = row
                .iter()
                .map(|span| UnicodeWidthStr::width(span.content.as_ref()))
                .sum();
            if used < self.width {
                row.push(Span::styled(" ".repeat(self.width - used), style));
            }
        }
        self.out.push(Line::from(row));
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        self.break_row();
        self.out
    }
}

/// Splits text into maximal runs of whitespace and non-whitespace.
fn split_runs(text: &str) -> impl Iterator<Item = (bool, &str)> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let is_space = first.is_whitespace();
        let end = rest
            .find(|c: char| c.is_whitespace() != is_space)
            .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        rest = tail;
        Some((is_space, run))
    })
}

fn trim_trailing_spaces(spans: &mut Vec<Span<'static>>) {
    while let Some(last) = spans.last_mut() {
        let kept = last.content.trim_end_matches(' ').len();
        if kept == last.content.len() {
            break;
        }
        if kept == 0 {
            spans.pop();
        } else {
            last.content = last.content[..kept].to_string().into();
            break;
        }
    }
}

fn uniform_bg(line: &Line<'static>) -> Option<Color> {
    let mut colors = line
        .spans
        .iter()
        .filter(|span| !span.content.is_empty())
        .map(|span| span.style.bg);
    let first = colors.next()??;
    if first == Color::Reset {
        return None;
    }
    colors.all(|bg| bg == Some(first)).then_some(first)
}

pub fn line_to_plain(line: &Line<'static>) -> String {
    line.spans.iter().map(|span| span.content.as_ref()).collect()
}

/// Cells collected from a table element, laid out with box-drawing borders.
struct Table {
    alignments: Vec<ColumnAlign>,
    rows: Vec<Vec<TableCell>>,
    header_rows: usize,
}

struct TableCell {
    width: usize,
    spans: Vec<Span<'static>>,
}

impl Table {
    fn column_widths(&self) -> Vec<usize> {
        let columns = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        (0..columns)
            .map(|col| {
                self.rows
                    .iter()
                    .filter_map(|row| row.get(col))
                    .map(|cell| cell.width)
                    .max()
                    .unwrap_or(0)
            })
            .collect()
    }

    fn render(&self, styles: &MarkdownStyles, out: &mut Vec<Line<'static>>) {
        let widths = self.column_widths();
        if widths.is_empty() {
            return;
        }
        let border = styles.table_border;
        out.push(border_line(&widths, ['┌', '┬', '┐'], border));
        for (idx, row) in self.rows.iter().enumerate() {
            let style = if idx < self.header_rows {
                styles.table_header
            } else {
                styles.base
            };
            out.push(self.row_line(row, &widths, style, border));
            if idx + 1 == self.header_rows && idx + 1 < self.rows.len() {
                out.push(border_line(&widths, ['├', '┼', '┤'], border));
            }
        }
        out.push(border_line(&widths, ['└', '┴', '┘'], border));
    }

    fn row_line(&self, row: &[TableCell], widths: &[usize], style: Style, border: Style) -> Line<'static> {
        let mut spans = vec![Span::styled("│", border)];
        for (col, width) in widths.iter().enumerate() {
            let cell = row.get(col);
            let pad = width.saturating_sub(cell.map_or(0, |cell| cell.width));
            let (left, right) = match self.alignments.get(col) {
                Some(ColumnAlign::Right) => (pad, 0),
                Some(ColumnAlign::Center) => (pad / 2, pad - pad / 2),
                _ => (0, pad),
            };
            spans.push(Span::styled(" ".repeat(left + 1), style));
            if let Some(cell) = cell {
                spans.extend(
                    cell.spans
                        .iter()
                        .map(|span| Span::styled(span.content.clone(), style.patch(span.style))),
                );
            }
            spans.push(Span::styled(" ".repeat(right + 1), style));
            spans.push(Span::styled("│", border));
        }
        Line::from(spans)
    }
}

fn border_line(widths: &[usize], [left, joint, right]: [char; 3], style: Style) -> Line<'static> {
    let mut text = String::from(left);
    for (idx, width) in widths.iter().enumerate() {
        if idx > 0 {
            text.push(joint);
        }
        text.extend(std::iter::repeat_n('─', width + 2));
    }
    text.push(right);
    Line::from(Span::styled(text, style))
}

/// Strips whitespace around a cell's content, dropping spans left empty.
fn trim_cell(mut spans: Vec<Span<'static>>) -> Vec<Span<'static>> {
    spans.retain(|span| !span.content.is_empty());
    while let Some(first) = spans.first_mut() {
        let trimmed = first.content.trim_start();
        if trimmed.is_empty() {
            spans.remove(0);
            continue;
        }
        if trimmed.len() != first.content.len() {
            first.content = trimmed.to_string().into();
        }
        break;
    }
    while let Some(last) = spans.last_mut() {
        let trimmed = last.content.trim_end();
        if trimmed.is_empty() {
            spans.pop();
            continue;
        }
        if trimmed.len() != last.content.len() {
            last.content = trimmed.to_string().into();
        }
        break;
    }
    spans
}

fn resolve_code_syntax<'a>(
    syntax_set: &'a SyntaxSet,
    lang: Option<&str>,
) -> &'a syntect::parsing::SyntaxReference {
    let Some(lang) = lang.map(str::trim).filter(|l| !l.is_empty()) else {
        return syntax_set.find_syntax_plain_text();
    };
    let token = lang.strip_prefix("language-").unwrap_or(lang);
    syntax_set
        .find_syntax_by_token(token)
        .or_else(|| syntax_set.find_syntax_by_extension(token))
        .unwrap_or_else(|| syntax_set.find_syntax_plain_text())
}

fn syntect_to_ratatui(style: syntect::highlighting::Style, code_bg: Option<Color>) -> Style {
    let rgb = |color: syntect::highlighting::Color| Color::Rgb(color.r, color.g, color.b);
    let mut out = Style::default().fg(rgb(style.foreground));
    if let Some(bg) = code_bg.or_else(|| (style.background.a > 0).then(|| rgb(style.background))) {
        out = out.bg(bg);
    }
    let modifiers = [
        (FontStyle::BOLD, Modifier::BOLD),
        (FontStyle::ITALIC, Modifier::ITALIC),
        (FontStyle::UNDERLINE, Modifier::UNDERLINED),
    ];
    for (font, modifier) in modifiers {
        if style.font_style.contains(font) {
            out = out.add_modifier(modifier);
        }
    }
    out
}

struct LineBuilder {
    spans: Vec<Span<'static>>,
    plain: String,
}

impl LineBuilder {
    fn new() -> Self {
        Self {
            spans: Vec::new(),
            plain: String::new(),
        }
    }

    fn ensure_prefix(&mut self, prefix: &str, style: Style) {
        if self.plain.is_empty() && !prefix.is_empty() {
            self.spans.push(Span::styled(prefix.to_string(), style));
            self.plain.push_str(prefix);
        }
    }

    fn push_text(&mut self, text: &str, style: Style, tab_width: usize) {
        let expanded = expand_tabs(text, tab_width);
        self.plain.push_str(&expanded);
        self.spans.push(Span::styled(expanded, style));
    }

    fn take_line(&mut self) -> Option<Line<'static>> {
        if self.plain.is_empty() {
            return None;
        }
        self.plain.clear();
        Some(Line::from(std::mem::take(&mut self.spans)))
    }
}

fn list_prefix(stack: &mut [ListKind]) -> String {
    let depth = stack.len().max(1);
    let indent = "  ".repeat(depth.saturating_sub(1));
    let marker = match stack.last_mut() {
        Some(ListKind::Bullet) => format!("{} ", bullet_for_depth(depth)),
        Some(ListKind::Ordered { next }) => {
            let current = *next;
            *next = next.saturating_add(1);
            format!("{current}. ")
        }
        None => "- ".to_string(),
    };
    format!("{indent}{marker}")
}

fn current_prefix(blockquote_level: usize, list_prefix: Option<&str>) -> String {
    let mut out = "│ ".repeat(blockquote_level);
    if let Some(prefix) = list_prefix {
        out.push_str(prefix);
    }
    out
}

fn expand_tabs(text: &str, tab_width: usize) -> String {
    if !text.contains('\t') {
        return text.to_string();
    }
    text.replace('\t', &" ".repeat(tab_width.max(1)))
}

#[derive(Clone, Copy)]
enum ListKind {
    Bullet,
    Ordered { next: u64 },
}

impl ListKind {
    fn from(start: Option<u64>) -> Self {
        match start {
            Some(num) => Self::Ordered { next: num },
            None => Self::Bullet,
        }
    }
}

fn bullet_for_depth(depth: usize) -> &'static str {
    match depth % 3 {
        1 => "•",
        2 => "◦",
        _ => "▪",
    }
}
