//! Prompt rendering for the process-backed reasoning oracle.

use anyhow::{Context, Result};
use minijinja::Environment;
use serde::Serialize;
use tracing::debug;

const PRECONDITION_TEMPLATE: &str = include_str!("prompts/precondition.md");
const SELECT_TEMPLATE: &str = include_str!("prompts/select.md");
const STATE_TEMPLATE: &str = include_str!("prompts/state.md");
const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const INITIAL_TEMPLATE: &str = include_str!("prompts/initial.md");

/// One template per oracle capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Precondition,
    Select,
    State,
    Plan,
    InitialTasks,
}

impl PromptKind {
    fn template_name(self) -> &'static str {
        match self {
            PromptKind::Precondition => "precondition",
            PromptKind::Select => "select",
            PromptKind::State => "state",
            PromptKind::Plan => "plan",
            PromptKind::InitialTasks => "initial",
        }
    }
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("precondition", PRECONDITION_TEMPLATE),
            ("select", SELECT_TEMPLATE),
            ("state", STATE_TEMPLATE),
            ("plan", PLAN_TEMPLATE),
            ("initial", INITIAL_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("embedded prompt templates should be valid");
        }
        Self { env }
    }

    /// Render the template for `kind` with the query's fields as context.
    pub fn render<S: Serialize>(&self, kind: PromptKind, query: &S) -> Result<String> {
        let name = kind.template_name();
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(query)
            .with_context(|| format!("render {name} prompt"))?;
        debug!(template = name, bytes = rendered.len(), "rendered prompt");
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}
