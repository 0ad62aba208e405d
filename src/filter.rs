use crate::document::{MainContent, Section};
use crate::highlight::{highlight_section, remove_highlights};
use crate::notice::{NoticeState, Notifier};
use crate::query::{fold, Matcher, Query};
use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassOutcome {
    pub visible: usize,
    pub total: usize,
    pub marks: usize,
    pub notice: NoticeState,
}

impl PassOutcome {
    pub fn any_visible(&self) -> bool {
        self.visible > 0
    }
}

/// Runs one full pass for `raw` over every section of `main`.
///
/// The matcher is compiled before any section is touched, so an error
/// leaves the content exactly as it was.
pub fn run_pass(main: &mut MainContent, raw: &str, notifier: &Notifier) -> Result<PassOutcome> {
    let query = Query::normalize(raw);
    let matcher = Matcher::new(&query)?;

    let mut marks = 0;
    for section in &mut main.sections {
        let (_, created) = apply_to_section(section, &query, matcher.as_ref());
        marks += created;
    }
    let visible = main.visible_count();
    debug_assert_eq!(marks, main.mark_count());

    let notice = notifier.update(main, query.is_empty(), visible > 0);
    let outcome = PassOutcome {
        visible,
        total: main.sections.len(),
        marks,
        notice,
    };
    log::debug!(
        "pass query={:?} visible={}/{} marks={} notice={:?}",
        query.as_str(),
        outcome.visible,
        outcome.total,
        outcome.marks,
        outcome.notice
    );
    Ok(outcome)
}

/// Shows or hides one section and rebuilds its highlights. Returns whether
/// it is visible and how many wrappers it now carries.
pub fn apply_to_section(section: &mut Section, query: &Query, matcher: Option<&Matcher>) -> (bool, usize) {
    let Some(matcher) = matcher.filter(|_| !query.is_empty()) else {
        remove_highlights(section.nodes_mut());
        section.set_visible(true);
        return (true, 0);
    };

    if query.is_contained_in(&fold(&section.text())) {
        section.set_visible(true);
        let created = highlight_section(section, matcher);
        (true, created)
    } else {
        remove_highlights(section.nodes_mut());
        section.set_visible(false);
        (false, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::{run_pass, PassOutcome};
    use crate::document::{Leaf, MainContent, Node, OpaqueKind, Section, Tag};
    use crate::notice::{NoticeState, Notifier};
    use crate::query::fold;

    fn section(label: &str, body: &str) -> Section {
        Section::new(
            label,
            2,
            vec![
                Node::element(Tag::Heading(2), vec![Node::text(label)]),
                Node::element(Tag::Paragraph, vec![Node::text(body)]),
            ],
        )
    }

    fn physics() -> MainContent {
        MainContent::new(vec![
            section("Schwingung und Welle", "Harmonische Oszillatoren (Feder)."),
            section("Quantenphysik Grundlagen", "Das Quantenobjekt im Feld."),
            Section::new(
                "Elektrisches Feld",
                2,
                vec![
                    Node::element(Tag::Heading(2), vec![Node::text("Elektrisches Feld")]),
                    Node::element(Tag::Paragraph, vec![Node::text("Kondensator")]),
                    Node::opaque(OpaqueKind::Script, "<script>plot('spannung')</script>"),
                ],
            ),
        ])
    }

    fn pass(main: &mut MainContent, raw: &str) -> PassOutcome {
        run_pass(main, raw, &Notifier::new("hint")).expect("pass succeeds")
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

    fn visibility(main: &MainContent) -> Vec<bool> {
        main.sections.iter().map(Section::is_visible).collect()
    }

    fn assert_invariants(main: &MainContent, raw: &str) {
        let q = raw.trim().to_lowercase();
        for s in &main.sections {
            let expected = q.is_empty() || fold(&s.text()).contains(&q);
            assert_eq!(s.is_visible(), expected, "visibility of {:?} for {raw:?}", s.label());
            if !s.is_visible() || q.is_empty() {
                assert_eq!(s.mark_count(), 0, "stale wrappers in {:?}", s.label());
            }
        }
        let banner_expected = !q.is_empty() && main.visible_count() == 0;
        assert_eq!(main.banner().is_some(), banner_expected);
    }

    #[test]
    fn scenario_single_matching_section() {
        let mut main = MainContent::new(vec![
            Section::new(
                "Schwingung und Welle",
                2,
                vec![Node::element(Tag::Paragraph, vec![Node::text("Schwingung und Welle")])],
            ),
            Section::new(
                "Quantenphysik Grundlagen",
                2,
                vec![Node::element(Tag::Paragraph, vec![Node::text("Quantenphysik Grundlagen")])],
            ),
        ]);
        let outcome = pass(&mut main, "quanten");
        assert_eq!(visibility(&main), vec![false, true]);
        assert_eq!(marks(&main.sections[1]), vec!["Quanten"]);
        assert_eq!(outcome.notice, NoticeState::Hidden);
        assert!(main.banner().is_none());
    }

    #[test]
    fn scenario_no_match_then_reset() {
        let mut main = physics();
        let outcome = pass(&mut main, "xyz123");
        assert_eq!(visibility(&main), vec![false, false, false]);
        assert_eq!(outcome.notice, NoticeState::Shown);
        assert!(!outcome.any_visible());
        assert!(main.banner().is_some());

        let outcome = pass(&mut main, "");
        assert_eq!(visibility(&main), vec![true, true, true]);
        assert_eq!(main.mark_count(), 0);
        assert_eq!(outcome.notice, NoticeState::Hidden);
        assert!(main.banner().is_none());
    }

    #[test]
    fn reset_after_any_query_restores_everything() {
        let original = physics();
        for raw in ["feld", "quanten", "(", "e", "xyz", "  FELD  "] {
            let mut main = original.clone();
            pass(&mut main, raw);
            pass(&mut main, "   ");
            assert_eq!(main, original, "after {raw:?}");
        }
    }

    #[test]
    fn invariants_hold_across_a_typing_sequence() {
        let mut main = physics();
        for raw in ["f", "fe", "fel", "feld", "feldx", "feld", "", "Q", "qu.", "(feder)", "spannung"] {
            pass(&mut main, raw);
            assert_invariants(&main, raw);
        }
    }

    #[test]
    fn passes_are_idempotent() {
        let mut once = physics();
        pass(&mut once, "feld");
        let mut twice = once.clone();
        pass(&mut twice, "feld");
        assert_eq!(once, twice);
    }

    #[test]
    fn result_depends_only_on_the_current_query() {
        let mut direct = physics();
        pass(&mut direct, "welle");
        let mut via_history = physics();
        for raw in ["quanten", "xyz", "feld", "welle"] {
            pass(&mut via_history, raw);
        }
        assert_eq!(direct, via_history);
    }

    #[test]
    fn opaque_text_makes_a_section_visible_without_highlights() {
        let mut main = physics();
        let outcome = pass(&mut main, "spannung");
        assert_eq!(visibility(&main), vec![false, false, true]);
        assert_eq!(outcome.marks, 0);
        assert!(main.banner().is_none());
    }

    #[test]
    fn tag_names_are_not_searchable() {
        let mut main = physics();
        let outcome = pass(&mut main, "script");
        assert_eq!(visibility(&main), vec![false, false, false]);
        assert!(!outcome.any_visible());
        assert!(main.banner().is_some());
    }

    #[test]
    fn metacharacter_query_matches_literally() {
        let mut main = physics();
        pass(&mut main, "(");
        assert_eq!(visibility(&main), vec![true, false, true]);
        assert_eq!(marks(&main.sections[0]), vec!["("]);

        pass(&mut main, ".");
        assert_eq!(visibility(&main), vec![true, true, false]);
    }

    #[test]
    fn outcome_counts_visible_sections_and_marks() {
        let mut main = physics();
        let outcome = pass(&mut main, "feld");
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.visible, 2);
        assert_eq!(outcome.marks, main.mark_count());
        assert_eq!(outcome.marks, 2);
    }

    #[test]
    fn empty_content_shows_banner_for_any_query() {
        let mut main = MainContent::default();
        assert_eq!(pass(&mut main, "x").notice, NoticeState::Shown);
        assert_eq!(pass(&mut main, "").notice, NoticeState::Hidden);
    }
}
