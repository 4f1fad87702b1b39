//! Field-path cursor kept in lock-step with recursion depth.
//!
//! Every `push` is paired with a `pop` by the walker that pushed. Union trial
//! takes a [`Checkpoint`] and truncates back to it when an alternative is
//! rejected, so a failed attempt never leaves segments behind.

/// Stack depth captured before a speculative descent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathCursor {
    segments: Vec<String>,
}

impl PathCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: impl Into<String>) {
        self.segments.push(segment.into());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.segments.pop()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.segments.len())
    }

    pub fn restore(&mut self, cp: Checkpoint) {
        self.segments.truncate(cp.0);
    }

    /// Dotted path of the whole stack, each segment with a lower-case first
    /// character (`Name.Given` → `name.given`).
    pub fn absolute_path(&self) -> String {
        join_segments(&self.segments)
    }

    /// Dotted path of the first `depth` segments. Asking for more segments
    /// than the stack holds returns `None`.
    pub fn navigate(&self, depth: usize) -> Option<String> {
        self.segments.get(..depth).map(join_segments)
    }
}

fn join_segments(segments: &[String]) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&uncapitalize(seg));
    }
    out
}

/// Lower-case the first character only; property names differ from schema
/// field names in nothing else.
pub fn uncapitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Case-folded comparison used for property lookup.
pub fn same_property(a: &str, b: &str) -> bool {
    a == b || uncapitalize(a) == uncapitalize(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(segs: &[&str]) -> PathCursor {
        let mut c = PathCursor::new();
        for s in segs {
            c.push(*s);
        }
        c
    }

    #[test]
    fn absolute_path_joins_and_uncapitalizes() {
        assert_eq!(cursor(&["Identifier", "period", "Start"]).absolute_path(), "identifier.period.start");
        assert_eq!(PathCursor::new().absolute_path(), "");
    }

    #[test]
    fn navigate_returns_prefixes() {
        let c = cursor(&["identifier", "period", "start"]);
        assert_eq!(c.navigate(2).as_deref(), Some("identifier.period"));
        assert_eq!(c.navigate(1).as_deref(), Some("identifier"));
        assert_eq!(c.navigate(0).as_deref(), Some(""));
        assert_eq!(c.navigate(4), None);
    }

    #[test]
    fn checkpoint_restore_discards_speculative_segments() {
        let mut c = cursor(&["name"]);
        let cp = c.checkpoint();
        c.push("given");
        c.push("extra");
        c.restore(cp);
        assert_eq!(c.absolute_path(), "name");
        assert_eq!(c.depth(), 1);
    }

    #[test]
    fn property_names_fold_first_character_only() {
        assert!(same_property("Given", "given"));
        assert!(same_property("multipleBirth", "MultipleBirth"));
        assert!(!same_property("multipleBirth", "multiplebirth"));
    }
}
