//! Prompt Loader
//!
//! Loads the worker-invoking spells' prompt templates from files, falling back to
//! embedded defaults — the same embed-then-override chain as everywhere else in
//! the workspace that reads project-overridable assets.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// One excerpt handed to the template as supporting context for a fix.
#[derive(Debug, Clone, Serialize)]
pub struct FileExcerpt {
    pub path: String,
    pub content: String,
}

/// Render context for a worker-invoking spell's prompt.
#[derive(Debug, Clone, Serialize)]
pub struct SpellPromptContext {
    pub scenario: String,
    pub error_summary: String,
    pub error_patterns: Vec<String>,
    pub file_excerpts: Vec<FileExcerpt>,
}

impl SpellPromptContext {
    pub fn new(scenario: impl Into<String>, error_summary: impl Into<String>, error_patterns: Vec<String>) -> Self {
        Self {
            scenario: scenario.into(),
            error_summary: error_summary.into(),
            error_patterns,
            file_excerpts: Vec::new(),
        }
    }

    pub fn with_excerpts(mut self, excerpts: Vec<FileExcerpt>) -> Self {
        self.file_excerpts = excerpts;
        self
    }
}

/// Loads and renders prompt templates.
pub struct PromptLoader {
    hbs: Handlebars<'static>,
    /// User override directory (`.openagents/prompts/`).
    user_dir: Option<PathBuf>,
    /// Repo default directory (`prompts/`).
    repo_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Creates a loader rooted at `worktree` (used to find `.openagents/prompts/`
    /// and `prompts/`).
    pub fn new(worktree: impl AsRef<Path>) -> Self {
        let worktree = worktree.as_ref();
        debug!(?worktree, "PromptLoader::new: called");
        let user_dir = worktree.join(".openagents/prompts");
        let repo_dir = worktree.join("prompts");

        Self {
            hbs: Handlebars::new(),
            user_dir: user_dir.exists().then_some(user_dir),
            repo_dir: repo_dir.exists().then_some(repo_dir),
        }
    }

    /// A loader that only uses embedded prompts, for tests.
    pub fn embedded_only() -> Self {
        Self {
            hbs: Handlebars::new(),
            user_dir: None,
            repo_dir: None,
        }
    }

    fn load_template(&self, name: &str) -> Result<String> {
        debug!(%name, "PromptLoader::load_template: called");
        if let Some(ref user_dir) = self.user_dir {
            let path = user_dir.join(format!("{name}.pmt"));
            if path.exists() {
                return std::fs::read_to_string(&path).map_err(|e| eyre!("failed to read user prompt {}: {e}", path.display()));
            }
        }
        if let Some(ref repo_dir) = self.repo_dir {
            let path = repo_dir.join(format!("{name}.pmt"));
            if path.exists() {
                return std::fs::read_to_string(&path).map_err(|e| eyre!("failed to read repo prompt {}: {e}", path.display()));
            }
        }
        embedded::get_embedded(name).map(str::to_string).ok_or_else(|| eyre!("prompt template not found: {name}"))
    }

    pub fn render(&self, template_name: &str, context: &SpellPromptContext) -> Result<String> {
        debug!(%template_name, scenario = %context.scenario, "PromptLoader::render: called");
        let template = self.load_template(template_name)?;
        self.hbs
            .render_template(&template, context)
            .map_err(|e| eyre!("failed to render template {template_name}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_the_typecheck_prompt_with_context() {
        let loader = PromptLoader::embedded_only();
        let ctx = SpellPromptContext::new("InitScriptTypecheckFailure", "TS2304: cannot find name 'foo'", vec!["typescript_error_code".to_string()]);
        let rendered = loader.render("fix_typecheck_errors", &ctx).unwrap();
        assert!(rendered.contains("InitScriptTypecheckFailure"));
        assert!(rendered.contains("cannot find name"));
        assert!(rendered.contains("typescript_error_code"));
    }

    #[test]
    fn unknown_template_is_an_error() {
        let loader = PromptLoader::embedded_only();
        let ctx = SpellPromptContext::new("s", "e", vec![]);
        assert!(loader.render("nonexistent-template", &ctx).is_err());
    }

    #[test]
    fn file_excerpts_render_when_present() {
        let loader = PromptLoader::embedded_only();
        let ctx = SpellPromptContext::new("s", "e", vec![]).with_excerpts(vec![FileExcerpt {
            path: "src/lib.rs".to_string(),
            content: "fn broken() {}".to_string(),
        }]);
        let rendered = loader.render("fix_test_errors", &ctx).unwrap();
        assert!(rendered.contains("src/lib.rs"));
        assert!(rendered.contains("fn broken()"));
    }
}
