/// The search bar: current value plus focus state. Every mutator reports
/// whether the value changed so the caller can run a pass per change.
#[derive(Debug, Clone, Default)]
pub struct SearchBar {
    value: String,
    focused: bool,
}

impl SearchBar {
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            focused: false,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn focus(&mut self) {
        self.focused = true;
    }

    pub fn blur(&mut self) {
        self.focused = false;
    }

    pub fn insert(&mut self, c: char) -> bool {
        self.value.push(c);
        true
    }

    pub fn backspace(&mut self) -> bool {
        self.value.pop().is_some()
    }

    pub fn clear(&mut self) -> bool {
        if self.value.is_empty() {
            return false;
        }
        self.value.clear();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::SearchBar;

    #[test]
    fn edits_report_changes() {
        let mut bar = SearchBar::default();
        assert!(!bar.backspace());
        assert!(bar.insert('q'));
        assert!(bar.insert('u'));
        assert_eq!(bar.value(), "qu");
        assert!(bar.backspace());
        assert_eq!(bar.value(), "q");
        assert!(bar.clear());
        assert!(!bar.clear());
    }

    #[test]
    fn backspace_removes_a_whole_char() {
        let mut bar = SearchBar::with_value("Wärme");
        bar.backspace();
        bar.backspace();
        bar.backspace();
        assert_eq!(bar.value(), "Wä");
        bar.backspace();
        assert_eq!(bar.value(), "W");
    }

    #[test]
    fn focus_toggles() {
        let mut bar = SearchBar::with_value("x");
        assert!(!bar.is_focused());
        bar.focus();
        assert!(bar.is_focused());
        bar.blur();
        assert!(!bar.is_focused());
        assert_eq!(bar.value(), "x");
    }
}
