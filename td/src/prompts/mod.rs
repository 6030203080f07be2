//! Prompt Template System
//!
//! Loads and renders `.pmt` (prompt template) files for the two worker-invoking
//! spells, `fix_typecheck_errors` and `fix_test_errors`.
//!
//! Template loading chain:
//! 1. `.openagents/prompts/{name}.pmt` (user override)
//! 2. `prompts/{name}.pmt` (repo default)
//! 3. Embedded fallback compiled into the binary
//!
//! Templates use Handlebars syntax for variable substitution.

pub mod embedded;
mod loader;

pub use loader::{FileExcerpt, PromptLoader, SpellPromptContext};
