use crate::notice::Banner;

/// A node of the document tree. Leaves are `Text`, `Mark` and `Opaque`;
/// everything structural is an `Element`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    /// Search highlight wrapped around a substring of a former text leaf.
    Mark(String),
    Opaque(Opaque),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: Tag,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    Heading(u8),
    Paragraph,
    BlockQuote,
    CodeBlock(Option<String>),
    List(Option<u64>),
    Item,
    FootnoteDefinition(String),
    Table(Vec<ColumnAlign>),
    TableHead,
    TableRow,
    TableCell,
    Emphasis,
    Strong,
    Strikethrough,
    Link(String),
    Image(String),
    /// Raw HTML block split into markup, text and raw-element leaves.
    HtmlBlock,
    Code,
    TaskMarker(bool),
    HardBreak,
    Rule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnAlign {
    None,
    Left,
    Center,
    Right,
}

/// Raw markup carried through verbatim and never split by the highlighter.
/// `text` is the markup as written; `content` is what it adds to the
/// section's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opaque {
    pub kind: OpaqueKind,
    pub text: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpaqueKind {
    /// `<script>` element, body included.
    Script,
    /// `<style>` element, body included.
    Style,
    Comment,
    /// A single tag such as `<div class="box">` or `</span>`.
    Markup,
}

impl OpaqueKind {
    pub fn is_displayed(self) -> bool {
        matches!(self, Self::Markup)
    }
}

impl Opaque {
    pub fn new(kind: OpaqueKind, text: impl Into<String>) -> Self {
        let text = text.into();
        let content = match kind {
            OpaqueKind::Script | OpaqueKind::Style => element_body(&text).to_string(),
            OpaqueKind::Comment | OpaqueKind::Markup => String::new(),
        };
        Self {
            kind,
            text,
            content,
        }
    }
}

/// Text between the opening tag and the closing tag, or to the end when
/// the element is unterminated.
fn element_body(raw: &str) -> &str {
    let start = raw.find('>').map_or(raw.len(), |idx| idx + 1);
    let end = raw
        .rfind("</")
        .filter(|&end| end >= start)
        .unwrap_or(raw.len());
    &raw[start..end]
}

impl Element {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            children: Vec::new(),
        }
    }

    pub fn with_children(tag: Tag, children: Vec<Node>) -> Self {
        Self { tag, children }
    }
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn element(tag: Tag, children: Vec<Node>) -> Self {
        Self::Element(Element::with_children(tag, children))
    }

    pub fn opaque(kind: OpaqueKind, text: impl Into<String>) -> Self {
        Self::Opaque(Opaque::new(kind, text))
    }
}

/// Borrowed view of a leaf yielded by [`leaves`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leaf<'a> {
    Text(&'a str),
    Mark(&'a str),
    Opaque(&'a Opaque),
}

impl<'a> Leaf<'a> {
    /// The leaf's contribution to its section's text content.
    pub fn content(self) -> &'a str {
        match self {
            Leaf::Text(text) | Leaf::Mark(text) => text,
            Leaf::Opaque(opaque) => &opaque.content,
        }
    }
}

/// Pre-order, depth-first walk over the leaves below `nodes`.
pub struct Leaves<'a> {
    stack: Vec<std::slice::Iter<'a, Node>>,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = Leaf<'a>;

    fn next(&mut self) -> Option<Leaf<'a>> {
        loop {
            let iter = self.stack.last_mut()?;
            match iter.next() {
                None => {
                    self.stack.pop();
                }
                Some(Node::Element(element)) => self.stack.push(element.children.iter()),
                Some(Node::Text(text)) => return Some(Leaf::Text(text)),
                Some(Node::Mark(text)) => return Some(Leaf::Mark(text)),
                Some(Node::Opaque(opaque)) => return Some(Leaf::Opaque(opaque)),
            }
        }
    }
}

pub fn leaves(nodes: &[Node]) -> Leaves<'_> {
    Leaves {
        stack: vec![nodes.iter()],
    }
}

pub fn text_content(nodes: &[Node]) -> String {
    leaves(nodes).map(Leaf::content).collect()
}

pub fn count_marks(nodes: &[Node]) -> usize {
    leaves(nodes)
        .filter(|leaf| matches!(leaf, Leaf::Mark(_)))
        .count()
}

/// Merges adjacent text siblings and drops empty ones, recursively.
pub fn normalize(nodes: &mut Vec<Node>) {
    let mut out: Vec<Node> = Vec::with_capacity(nodes.len());
    for node in nodes.drain(..) {
        match node {
            Node::Text(text) if text.is_empty() => {}
            Node::Text(text) => {
                if let Some(Node::Text(prev)) = out.last_mut() {
                    prev.push_str(&text);
                } else {
                    out.push(Node::Text(text));
                }
            }
            Node::Element(mut element) => {
                normalize(&mut element.children);
                out.push(Node::Element(element));
            }
            other => out.push(other),
        }
    }
    *nodes = out;
}

/// A labeled block of the page that search shows or hides as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    label: String,
    level: u8,
    nodes: Vec<Node>,
    visible: bool,
}

impl Section {
    pub fn new(label: impl Into<String>, level: u8, nodes: Vec<Node>) -> Self {
        Self {
            label: label.into(),
            level,
            nodes,
            visible: true,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut Vec<Node> {
        &mut self.nodes
    }

    pub fn leaves(&self) -> Leaves<'_> {
        leaves(&self.nodes)
    }

    /// Full text content, rebuilt from the tree on every call.
    pub fn text(&self) -> String {
        self.leaves().map(Leaf::content).collect()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn mark_count(&self) -> usize {
        count_marks(&self.nodes)
    }
}

/// The container holding every section plus the no-results banner slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MainContent {
    pub sections: Vec<Section>,
    banner: Option<Banner>,
}

impl MainContent {
    pub fn new(sections: Vec<Section>) -> Self {
        Self {
            sections,
            banner: None,
        }
    }

    pub fn banner(&self) -> Option<&Banner> {
        self.banner.as_ref()
    }

    pub fn insert_banner(&mut self, banner: Banner) {
        self.banner = Some(banner);
    }

    pub fn remove_banner(&mut self) -> Option<Banner> {
        self.banner.take()
    }

    pub fn visible_count(&self) -> usize {
        self.sections.iter().filter(|s| s.is_visible()).count()
    }

    pub fn mark_count(&self) -> usize {
        self.sections.iter().map(Section::mark_count).sum()
    }
}

/// A parsed document: content ahead of the first section, then the sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub preamble: Vec<Node>,
    pub main: MainContent,
}

#[cfg(test)]
mod tests {
    use super::{leaves, normalize, text_content, Element, Leaf, Node, OpaqueKind, Section, Tag};

    fn paragraph(children: Vec<Node>) -> Node {
        Node::element(Tag::Paragraph, children)
    }

    #[test]
    fn leaves_walk_in_document_order() {
        let nodes = vec![
            Node::element(Tag::Heading(2), vec![Node::text("Title")]),
            paragraph(vec![
                Node::text("one "),
                Node::element(Tag::Strong, vec![Node::text("two")]),
                Node::text(" three"),
            ]),
        ];
        let texts: Vec<&str> = leaves(&nodes).map(Leaf::content).collect();
        assert_eq!(texts, vec!["Title", "one ", "two", " three"]);
    }

    #[test]
    fn leaves_is_restartable() {
        let nodes = vec![paragraph(vec![Node::text("a"), Node::Mark("b".into())])];
        assert_eq!(leaves(&nodes).count(), 2);
        assert_eq!(leaves(&nodes).count(), 2);
    }

    #[test]
    fn text_content_includes_script_bodies_but_no_markup() {
        let nodes = vec![
            Node::opaque(OpaqueKind::Script, "<script type=\"module\">let quanten = 1;</script>"),
            Node::opaque(OpaqueKind::Comment, "<!-- hidden -->"),
            Node::opaque(OpaqueKind::Markup, "<div class=\"box\">"),
            paragraph(vec![Node::text("body")]),
            Node::opaque(OpaqueKind::Markup, "</div>"),
        ];
        assert_eq!(text_content(&nodes), "let quanten = 1;body");
    }

    #[test]
    fn unterminated_style_body_runs_to_the_end() {
        let Node::Opaque(style) = Node::opaque(OpaqueKind::Style, "<style>p { color: red }") else {
            panic!("expected opaque node");
        };
        assert_eq!(style.content, "p { color: red }");
        assert_eq!(style.text, "<style>p { color: red }");
    }

    #[test]
    fn empty_element_has_no_leaves() {
        let nodes = vec![Node::Element(Element::new(Tag::Rule))];
        assert_eq!(leaves(&nodes).next(), None);
        assert_eq!(text_content(&nodes), "");
    }

    #[test]
    fn normalize_merges_adjacent_text_and_drops_empty() {
        let mut nodes = vec![paragraph(vec![
            Node::text("a"),
            Node::text(""),
            Node::text("b"),
            Node::element(Tag::Emphasis, vec![Node::text("c"), Node::text("d")]),
            Node::text("e"),
        ])];
        normalize(&mut nodes);
        assert_eq!(
            nodes,
            vec![paragraph(vec![
                Node::text("ab"),
                Node::element(Tag::Emphasis, vec![Node::text("cd")]),
                Node::text("e"),
            ])]
        );
    }

    #[test]
    fn section_text_is_derived_from_current_tree() {
        let mut section = Section::new("Welle", 2, vec![paragraph(vec![Node::text("alt")])]);
        assert_eq!(section.text(), "alt");
        section.nodes_mut().push(paragraph(vec![Node::text("neu")]));
        assert_eq!(section.text(), "altneu");
        assert!(section.is_visible());
    }
}
