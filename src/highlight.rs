use crate::document::{normalize, Node, Section};
use crate::query::Matcher;

/// Rebuilds the highlight wrappers of `section` for `matcher` and returns
/// how many were created.
pub fn highlight_section(section: &mut Section, matcher: &Matcher) -> usize {
    remove_highlights(section.nodes_mut());
    highlight_nodes(section.nodes_mut(), matcher)
}

/// Turns every wrapper back into plain text and re-merges the text runs.
/// Returns the number of wrappers removed; with none present the tree is
/// left untouched.
pub fn remove_highlights(nodes: &mut Vec<Node>) -> usize {
    let removed = unwrap_marks(nodes);
    if removed > 0 {
        normalize(nodes);
    }
    removed
}

fn unwrap_marks(nodes: &mut [Node]) -> usize {
    let mut removed = 0;
    for node in nodes.iter_mut() {
        match node {
            Node::Mark(text) => {
                let text = std::mem::take(text);
                *node = Node::Text(text);
                removed += 1;
            }
            Node::Element(element) => removed += unwrap_marks(&mut element.children),
            Node::Text(_) | Node::Opaque(_) => {}
        }
    }
    removed
}

fn highlight_nodes(nodes: &mut Vec<Node>, matcher: &Matcher) -> usize {
    let mut created = 0;
    let mut idx = 0;
    while idx < nodes.len() {
        if let Node::Element(element) = &mut nodes[idx] {
            created += highlight_nodes(&mut element.children, matcher);
            idx += 1;
            continue;
        }
        // Opaque leaves are never split.
        let run = match &nodes[idx] {
            Node::Text(text) => split_matches(text, matcher),
            _ => None,
        };
        match run {
            Some(run) => {
                created += run.iter().filter(|n| matches!(n, Node::Mark(_))).count();
                let len = run.len();
                nodes.splice(idx..idx + 1, run);
                idx += len;
            }
            None => idx += 1,
        }
    }
    created
}

/// Replacement run for one text leaf, or `None` when nothing matches.
fn split_matches(text: &str, matcher: &Matcher) -> Option<Vec<Node>> {
    let ranges = matcher.find_ranges(text);
    if ranges.is_empty() {
        return None;
    }
    let mut run = Vec::with_capacity(ranges.len() * 2 + 1);
    let mut cursor = 0usize;
    for range in ranges {
        if range.start > cursor {
            run.push(Node::Text(text[cursor..range.start].to_string()));
        }
        run.push(Node::Mark(text[range.clone()].to_string()));
        cursor = range.end;
    }
    if cursor < text.len() {
        run.push(Node::Text(text[cursor..].to_string()));
    }
    Some(run)
}

#[cfg(test)]
mod tests {
    use super::{highlight_section, remove_highlights};
    use crate::document::{Leaf, Node, OpaqueKind, Section, Tag};
    use crate::query::{Matcher, Query};

    fn matcher(raw: &str) -> Matcher {
        Matcher::new(&Query::normalize(raw))
            .expect("matcher builds")
            .expect("query is not empty")
    }

    fn section(children: Vec<Node>) -> Section {
        Section::new("test", 2, vec![Node::element(Tag::Paragraph, children)])
    }

    fn marks(section: &Section) -> Vec<String> {
        section
            .leaves()
            .filter_map(|leaf| match leaf {
                Leaf::Mark(text) => Some(text.to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn wraps_every_occurrence_and_keeps_the_rest() {
        let mut s = section(vec![Node::text("Welle und welle und WELLE")]);
        let created = highlight_section(&mut s, &matcher("welle"));
        assert_eq!(created, 3);
        assert_eq!(
            s.nodes()[0],
            Node::element(
                Tag::Paragraph,
                vec![
                    Node::Mark("Welle".into()),
                    Node::text(" und "),
                    Node::Mark("welle".into()),
                    Node::text(" und "),
                    Node::Mark("WELLE".into()),
                ]
            )
        );
    }

    #[test]
    fn query_casing_does_not_change_the_wrapped_span() {
        let mut upper = section(vec![Node::text("Quantenphysik")]);
        let mut lower = upper.clone();
        highlight_section(&mut upper, &matcher("Quanten"));
        highlight_section(&mut lower, &matcher("quanten"));
        assert_eq!(marks(&upper), vec!["Quanten"]);
        assert_eq!(upper, lower);
    }

    #[test]
    fn nested_leaves_are_wrapped_in_place() {
        let mut s = section(vec![
            Node::text("Die "),
            Node::element(Tag::Strong, vec![Node::text("Feldlinien")]),
            Node::text(" im Feld"),
        ]);
        highlight_section(&mut s, &matcher("feld"));
        assert_eq!(marks(&s), vec!["Feld", "Feld"]);
        let text: String = s.leaves().map(Leaf::content).collect();
        assert_eq!(text, "Die Feldlinien im Feld");
    }

    #[test]
    fn opaque_leaves_are_never_split() {
        let script = Node::opaque(OpaqueKind::Script, "<script>var welle;</script>");
        let mut s = Section::new("s", 2, vec![script.clone()]);
        assert_eq!(highlight_section(&mut s, &matcher("welle")), 0);
        assert_eq!(s.nodes(), &[script]);
    }

    #[test]
    fn match_split_by_markup_is_not_detected() {
        let mut s = section(vec![
            Node::text("Quan"),
            Node::element(Tag::Emphasis, vec![Node::text("ten")]),
        ]);
        assert_eq!(highlight_section(&mut s, &matcher("quanten")), 0);
        assert!(marks(&s).is_empty());
    }

    #[test]
    fn rehighlighting_with_a_new_query_drops_old_wrappers() {
        let mut s = section(vec![Node::text("Schwingung und Welle")]);
        highlight_section(&mut s, &matcher("schwingung"));
        highlight_section(&mut s, &matcher("welle"));
        assert_eq!(marks(&s), vec!["Welle"]);
    }

    #[test]
    fn highlighting_twice_is_idempotent() {
        let mut once = section(vec![Node::text("a.b.a")]);
        highlight_section(&mut once, &matcher("a"));
        let mut twice = once.clone();
        highlight_section(&mut twice, &matcher("a"));
        assert_eq!(once, twice);
    }

    #[test]
    fn removal_restores_the_original_tree() {
        let original = section(vec![
            Node::text("Interferenz an der Welle "),
            Node::element(Tag::Code, vec![Node::text("welle()")]),
            Node::text(" und mehr"),
        ]);
        for q in ["welle", "e", "n d", "(", "mehr"] {
            let mut s = original.clone();
            highlight_section(&mut s, &matcher(q));
            remove_highlights(s.nodes_mut());
            assert_eq!(s, original, "query {q:?}");
        }
    }

    #[test]
    fn removal_without_wrappers_is_a_no_op() {
        let mut nodes = vec![Node::text("a"), Node::text("b")];
        assert_eq!(remove_highlights(&mut nodes), 0);
        assert_eq!(nodes, vec![Node::text("a"), Node::text("b")]);
    }

    #[test]
    fn section_without_text_leaves_is_a_no_op() {
        let mut s = Section::new("s", 2, vec![Node::element(Tag::Rule, Vec::new())]);
        let before = s.clone();
        assert_eq!(highlight_section(&mut s, &matcher("x")), 0);
        assert_eq!(s, before);
    }
}
