//! Minijinja template rendering for notification messages.
//!
//! Templates are arbitrary strings (not pre-registered), so a fresh
//! [`minijinja::Environment`] is created per render call.

use serde::Serialize;

use crate::traits::{JobNotice, ModerationNotice, NotifyError};

/// Default text for a finished job.
pub const JOB_TEMPLATE: &str = "{% if message %}Could not import {{ subject_url }}: {{ status | upper }} ({{ message }}){% else %}Imported {{ subject_url }}{% if result and result.title %}: {{ result.title }}{% endif %} [{{ status }}]{% endif %}";

/// Default text for a moderation alert.
pub const MODERATION_TEMPLATE: &str = "Rejected {{ subject_url }}{% if requester %} (requested by {{ requester }}){% endif %}: {{ reason }}";

/// Renders notification templates using minijinja.
#[derive(Debug)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("upper", upper_filter);
        env
    }

    /// Render a template string with any serializable context.
    pub fn render<S: Serialize>(&self, template_str: &str, ctx: &S) -> Result<String, NotifyError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Check that a template string parses without evaluating it.
    pub fn validate(&self, template_str: &str) -> Result<(), NotifyError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(())
    }

    pub fn job_text(&self, notice: &JobNotice) -> Result<String, NotifyError> {
        self.render(JOB_TEMPLATE, notice)
    }

    pub fn moderation_text(&self, notice: &ModerationNotice) -> Result<String, NotifyError> {
        self.render(MODERATION_TEMPLATE, notice)
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}
