//! Prompt templates for every role.
//!
//! Built-in templates are embedded at compile time. A file named
//! `<template>.md` in the workspace prompt directory replaces the built-in
//! template of the same name.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::Environment;
use serde::Serialize;
use tracing::{debug, info};

pub const EXECUTOR_FIRST: &str = "executor_first";
pub const EXECUTOR_CONTINUE: &str = "executor_continue";
pub const EXECUTOR_REFINE: &str = "executor_refine";
pub const ASSIGNER: &str = "assigner";
pub const MONITOR: &str = "monitor";
pub const AUDITOR: &str = "auditor";
pub const RESUBMIT: &str = "resubmit";

const BUILTIN: &[(&str, &str)] = &[
    (EXECUTOR_FIRST, include_str!("prompts/executor_first.md")),
    (EXECUTOR_CONTINUE, include_str!("prompts/executor_continue.md")),
    (EXECUTOR_REFINE, include_str!("prompts/executor_refine.md")),
    (ASSIGNER, include_str!("prompts/assigner.md")),
    (MONITOR, include_str!("prompts/monitor.md")),
    (AUDITOR, include_str!("prompts/auditor.md")),
    (RESUBMIT, include_str!("prompts/resubmit.md")),
];

/// Template engine wrapper around minijinja.
pub struct PromptLibrary {
    env: Environment<'static>,
}

impl PromptLibrary {
    /// Library with only the embedded templates.
    pub fn builtin() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        for &(name, source) in BUILTIN {
            env.add_template(name, source)
                .expect("built-in prompt template should be valid");
        }
        Self { env }
    }

    /// Embedded templates, replaced by any `<name>.md` found in `dir`.
    pub fn with_overrides(dir: &Path) -> Result<Self> {
        let mut library = Self::builtin();
        for &(name, _) in BUILTIN {
            let path = dir.join(format!("{name}.md"));
            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("read prompt {}", path.display()));
                }
            };
            library
                .env
                .add_template_owned(name.to_string(), source)
                .with_context(|| format!("parse prompt {}", path.display()))?;
            info!(template = name, path = %path.display(), "using prompt override");
        }
        Ok(library)
    }

    /// Render `name` with `ctx`, trimming surrounding whitespace.
    pub fn render<S: Serialize>(&self, name: &str, ctx: S) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .with_context(|| format!("unknown prompt template {name}"))?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render prompt template {name}"))?;
        debug!(template = name, chars = rendered.len(), "rendered prompt");
        Ok(rendered.trim().to_string())
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    #[test]
    fn builtin_first_round_mentions_deletion_contract() {
        let prompts = PromptLibrary::builtin();
        let rendered = prompts
            .render(
                EXECUTOR_FIRST,
                context! {
                    role => "alice",
                    workspace => "/work",
                    task_name => "fix-login",
                    task_path => "/work/.foreman/agents/alice/ongoing/fix-login.md",
                    report_path => "/work/.foreman/agents/alice/reports/fix-login-report.md",
                    content => "Fix the login redirect.",
                    min_time_secs => 0,
                },
            )
            .expect("render");
        assert!(rendered.contains("Fix the login redirect."));
        assert!(rendered.contains("fix-login-report.md"));
        assert!(rendered.contains("delete the task file"));
        assert!(!rendered.contains("minimum working time"));
    }

    #[test]
    fn auditor_prompt_requests_structured_verdict() {
        let prompts = PromptLibrary::builtin();
        let rendered = prompts
            .render(
                AUDITOR,
                context! { role => "auditor", task_name => "t", report => "did it" },
            )
            .expect("render");
        assert!(rendered.contains("VERDICT: accepted"));
        assert!(rendered.contains("REASON:"));
    }

    #[test]
    fn override_file_replaces_builtin() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join("executor_continue.md"),
            "Keep going on {{ task_name }}.",
        )
        .expect("write override");

        let prompts = PromptLibrary::with_overrides(temp.path()).expect("load");
        let rendered = prompts
            .render(EXECUTOR_CONTINUE, context! { task_name => "t1" })
            .expect("render");
        assert_eq!(rendered, "Keep going on t1.");

        let untouched = prompts
            .render(EXECUTOR_REFINE, context! { task_name => "t1", remaining => "5m 0s" })
            .expect("render");
        assert!(untouched.contains("5m 0s"));
    }

    #[test]
    fn broken_override_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("monitor.md"), "{% if %}").expect("write override");
        assert!(PromptLibrary::with_overrides(temp.path()).is_err());
    }

    #[test]
    fn unknown_template_is_an_error() {
        let prompts = PromptLibrary::builtin();
        assert!(prompts.render("nope", context! {}).is_err());
    }
}
