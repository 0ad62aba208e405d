use crate::document::MainContent;

pub const NO_RESULTS_TITLE: &str = "No results found";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub title: String,
    pub hint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeState {
    Hidden,
    Shown,
}

/// Owns the banner text and toggles the no-results banner in a
/// [`MainContent`].
#[derive(Debug, Clone)]
pub struct Notifier {
    hint: String,
}

impl Notifier {
    pub fn new(hint: impl Into<String>) -> Self {
        Self { hint: hint.into() }
    }

    /// Uses `hint` when configured, otherwise suggests a few section labels.
    pub fn for_content(main: &MainContent, hint: Option<&str>) -> Self {
        match hint.map(str::trim).filter(|h| !h.is_empty()) {
            Some(hint) => Self::new(hint),
            None => Self::new(suggestion_hint(main)),
        }
    }

    pub fn hint(&self) -> &str {
        &self.hint
    }

    pub fn state(main: &MainContent) -> NoticeState {
        if main.banner().is_some() {
            NoticeState::Shown
        } else {
            NoticeState::Hidden
        }
    }

    pub fn update(&self, main: &mut MainContent, query_empty: bool, any_visible: bool) -> NoticeState {
        if !query_empty && !any_visible {
            self.show(main);
        } else {
            Self::hide(main);
        }
        Self::state(main)
    }

    pub fn show(&self, main: &mut MainContent) {
        Self::hide(main);
        main.insert_banner(Banner {
            title: NO_RESULTS_TITLE.to_string(),
            hint: self.hint.clone(),
        });
    }

    pub fn hide(main: &mut MainContent) {
        main.remove_banner();
    }
}

fn suggestion_hint(main: &MainContent) -> String {
    let mut terms: Vec<&str> = Vec::new();
    for section in &main.sections {
        let Some(word) = section.label().split_whitespace().next() else {
            continue;
        };
        if word.chars().count() >= 3 && !terms.contains(&word) {
            terms.push(word);
        }
        if terms.len() == 4 {
            break;
        }
    }
    if terms.is_empty() {
        return "Try a different search term".to_string();
    }
    let quoted: Vec<String> = terms.iter().map(|t| format!("\"{t}\"")).collect();
    format!("Try other search terms such as {} etc.", quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::{Notifier, NoticeState, NO_RESULTS_TITLE};
    use crate::document::{MainContent, Section};

    fn content(labels: &[&str]) -> MainContent {
        MainContent::new(
            labels
                .iter()
                .map(|label| Section::new(*label, 2, Vec::new()))
                .collect(),
        )
    }

    #[test]
    fn shows_only_for_a_non_empty_query_without_matches() {
        let notifier = Notifier::new("hint");
        let mut main = content(&["A"]);
        assert_eq!(notifier.update(&mut main, true, false), NoticeState::Hidden);
        assert_eq!(notifier.update(&mut main, false, true), NoticeState::Hidden);
        assert_eq!(notifier.update(&mut main, false, false), NoticeState::Shown);
        let banner = main.banner().expect("banner inserted");
        assert_eq!(banner.title, NO_RESULTS_TITLE);
        assert_eq!(banner.hint, "hint");
    }

    #[test]
    fn repeated_show_keeps_a_single_fresh_banner() {
        let mut main = content(&[]);
        Notifier::new("old").show(&mut main);
        Notifier::new("new").show(&mut main);
        assert_eq!(main.banner().map(|b| b.hint.as_str()), Some("new"));
    }

    #[test]
    fn hide_without_banner_is_a_no_op() {
        let mut main = content(&["A"]);
        let before = main.clone();
        Notifier::hide(&mut main);
        assert_eq!(main, before);
    }

    #[test]
    fn leaving_the_no_match_state_removes_the_banner() {
        let notifier = Notifier::new("hint");
        let mut main = content(&["A"]);
        notifier.update(&mut main, false, false);
        assert_eq!(notifier.update(&mut main, false, true), NoticeState::Hidden);
        assert!(main.banner().is_none());
    }

    #[test]
    fn default_hint_suggests_section_labels() {
        let main = content(&["Schwingung und Welle", "Feld", "Quantenphysik", "Feld"]);
        let notifier = Notifier::for_content(&main, None);
        assert_eq!(
            notifier.hint(),
            "Try other search terms such as \"Schwingung\", \"Feld\", \"Quantenphysik\" etc."
        );
    }

    #[test]
    fn configured_hint_wins_unless_blank() {
        let main = content(&["Feld"]);
        assert_eq!(Notifier::for_content(&main, Some("Nothing here")).hint(), "Nothing here");
        assert!(Notifier::for_content(&main, Some("  ")).hint().contains("\"Feld\""));
    }
}
