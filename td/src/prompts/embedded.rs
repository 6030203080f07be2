//! Embedded prompts
//!
//! Compiled into the binary from `.pmt` files at build time; overridable per
//! `PromptLoader`'s embed-then-override chain.

use tracing::debug;

pub const FIX_TYPECHECK_ERRORS: &str = include_str!("../../prompts/fix_typecheck_errors.pmt");
pub const FIX_TEST_ERRORS: &str = include_str!("../../prompts/fix_test_errors.pmt");

pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "fix_typecheck_errors" => Some(FIX_TYPECHECK_ERRORS),
        "fix_test_errors" => Some(FIX_TEST_ERRORS),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_typecheck_prompt_mentions_scenario_and_errors() {
        let prompt = get_embedded("fix_typecheck_errors").unwrap();
        assert!(prompt.contains("{{scenario}}"));
        assert!(prompt.contains("{{error_summary}}"));
    }

    #[test]
    fn unknown_template_returns_none() {
        assert!(get_embedded("nonexistent").is_none());
    }
}
