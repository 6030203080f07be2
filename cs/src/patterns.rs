//! Fixed regex dictionary for classifying a failure payload into error patterns.
//!
//! The dictionary order is normative: `classify` returns matches in dictionary order,
//! not match position, so heuristics derived from the result are deterministic
//! regardless of where in the error text each pattern happens to appear.

use regex::Regex;
use std::sync::LazyLock;

/// One named pattern in the fixed dictionary.
struct ErrorPattern {
    name: &'static str,
    regex: LazyLock<Regex>,
}

macro_rules! pattern {
    ($name:literal, $re:literal) => {
        ErrorPattern {
            name: $name,
            regex: LazyLock::new(|| Regex::new($re).expect("static error pattern regex")),
        }
    };
}

static PATTERNS: &[ErrorPattern] = &[
    pattern!("typescript_error_code", r"\bTS\d{4,5}\b"),
    pattern!("cannot_find_module", r"(?i)cannot find module"),
    pattern!("cannot_find_name", r"(?i)cannot find name"),
    pattern!("reference_error", r"(?i)\bReferenceError\b"),
    pattern!("type_error", r"(?i)\bTypeError\b"),
    pattern!("syntax_error", r"(?i)\bSyntaxError\b"),
    pattern!("import_resolution_error", r"(?i)(module not found|unresolved import|could not resolve)"),
    pattern!("assertion_failure", r"(?i)(assertion (failed|error)|expected .* (to equal|to be)|assert_eq)"),
];

/// Returns the names of every pattern in the dictionary that matches `text`, in fixed
/// dictionary order.
pub fn classify(text: &str) -> Vec<String> {
    PATTERNS
        .iter()
        .filter(|p| p.regex.is_match(text))
        .map(|p| p.name.to_string())
        .collect()
}

/// Heuristic booleans derived from a classified pattern set.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternHeuristics {
    pub has_missing_imports: bool,
    pub has_type_errors: bool,
    pub has_test_assertions: bool,
}

pub fn derive_heuristics(patterns: &[String]) -> PatternHeuristics {
    let has = |name: &str| patterns.iter().any(|p| p == name);
    PatternHeuristics {
        has_missing_imports: has("cannot_find_module") || has("import_resolution_error"),
        has_type_errors: has("typescript_error_code") || has("type_error") || has("cannot_find_name"),
        has_test_assertions: has("assertion_failure"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_typescript_error_codes() {
        let patterns = classify("error TS2304: cannot find name 'foo'");
        assert!(patterns.contains(&"typescript_error_code".to_string()));
        assert!(patterns.contains(&"cannot_find_name".to_string()));
    }

    #[test]
    fn classifies_assertion_failures() {
        let patterns = classify("assertion failed: expected 1 to equal 2");
        assert!(patterns.contains(&"assertion_failure".to_string()));
    }

    #[test]
    fn empty_text_has_no_patterns() {
        assert!(classify("").is_empty());
    }

    #[test]
    fn heuristics_derive_from_pattern_set() {
        let patterns = classify("Cannot find module './missing'");
        let h = derive_heuristics(&patterns);
        assert!(h.has_missing_imports);
        assert!(!h.has_test_assertions);
    }

    #[test]
    fn dictionary_order_is_preserved_regardless_of_match_position() {
        let patterns = classify("SyntaxError near token; also TS1005 expected");
        assert_eq!(patterns, vec!["typescript_error_code".to_string(), "syntax_error".to_string()]);
    }
}
