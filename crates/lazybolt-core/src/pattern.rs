//! String-or-regex patterns used as handler registration keys.

use regex::Regex;

/// An identifier constraint: an exact string or a regular expression.
///
/// # Examples
///
/// ```
/// use lazybolt_core::Pattern;
///
/// let exact = Pattern::from("approve");
/// assert!(exact.matches("approve"));
/// assert!(!exact.matches("approve_all"));
///
/// let re = Pattern::from(regex::Regex::new("^approve").unwrap());
/// assert!(re.matches("approve_all"));
/// ```
#[derive(Debug, Clone)]
pub enum Pattern {
    Exact(String),
    Regex(Regex),
}

impl Pattern {
    /// Whole-value match: equality for strings, `is_match` for regexes.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(s) => s == value,
            Self::Regex(re) => re.is_match(value),
        }
    }

    /// Text match used for message bodies: strings match when contained.
    pub fn matches_within(&self, text: &str) -> bool {
        match self {
            Self::Exact(s) => text.contains(s.as_str()),
            Self::Regex(re) => re.is_match(text),
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(s) => f.write_str(s),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<&str> for Pattern {
    fn from(value: &str) -> Self {
        Self::Exact(value.to_string())
    }
}

impl From<String> for Pattern {
    fn from(value: String) -> Self {
        Self::Exact(value)
    }
}

impl From<Regex> for Pattern {
    fn from(value: Regex) -> Self {
        Self::Regex(value)
    }
}

/// Constraints on a block element: its `action_id` and/or `block_id`.
///
/// A bare string converts to an `action_id` constraint.
#[derive(Debug, Clone, Default)]
pub struct ActionConstraints {
    pub action_id: Option<Pattern>,
    pub block_id: Option<Pattern>,
}

impl ActionConstraints {
    pub fn action_id(pattern: impl Into<Pattern>) -> Self {
        Self {
            action_id: Some(pattern.into()),
            block_id: None,
        }
    }

    pub fn with_block_id(mut self, pattern: impl Into<Pattern>) -> Self {
        self.block_id = Some(pattern.into());
        self
    }

    /// Unset constraints match anything; a set `block_id` requires one.
    pub fn matches(&self, action_id: &str, block_id: Option<&str>) -> bool {
        let action_ok = self.action_id.as_ref().is_none_or(|p| p.matches(action_id));
        let block_ok = match (&self.block_id, block_id) {
            (None, _) => true,
            (Some(p), Some(b)) => p.matches(b),
            (Some(_), None) => false,
        };
        action_ok && block_ok
    }
}

impl std::fmt::Display for ActionConstraints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.action_id, &self.block_id) {
            (Some(a), Some(b)) => write!(f, "{b}/{a}"),
            (Some(a), None) => write!(f, "{a}"),
            (None, Some(b)) => write!(f, "{b}/*"),
            (None, None) => f.write_str("*"),
        }
    }
}

impl From<&str> for ActionConstraints {
    fn from(value: &str) -> Self {
        Self::action_id(value)
    }
}

impl From<Regex> for ActionConstraints {
    fn from(value: Regex) -> Self {
        Self::action_id(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_match_exact_string() {
        let p = Pattern::from("/todo");
        assert!(p.matches("/todo"));
        assert!(!p.matches("/todos"));
    }

    #[test]
    fn test_should_match_text_by_containment() {
        let p = Pattern::from("hello");
        assert!(p.matches_within("well hello there"));
        assert!(!p.matches_within("goodbye"));
    }

    #[test]
    fn test_should_match_regex() {
        let p = Pattern::from(Regex::new(r"^select_\d+$").expect("regex"));
        assert!(p.matches("select_12"));
        assert!(!p.matches("select_x"));
        assert_eq!(p.to_string(), r"/^select_\d+$/");
    }

    #[test]
    fn test_should_require_block_id_when_constrained() {
        let c = ActionConstraints::action_id("approve").with_block_id("review");
        assert!(c.matches("approve", Some("review")));
        assert!(!c.matches("approve", Some("other")));
        assert!(!c.matches("approve", None));
        assert_eq!(c.to_string(), "review/approve");
    }

    #[test]
    fn test_should_match_anything_without_constraints() {
        let c = ActionConstraints::default();
        assert!(c.matches("whatever", None));
        assert_eq!(c.to_string(), "*");
    }
}
