//! `{{ name }}` placeholder rendering for object names and SQL.
//!
//! Only plain variable substitution is supported. Any `{{` that does not
//! open a well-formed placeholder, or a placeholder with no value, is an error
//! rather than being passed through.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("invalid placeholder pattern")
});

/// Errors raised while rendering a template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unknown template variable '{name}' in '{template}'")]
    UnknownVariable { name: String, template: String },

    #[error("Malformed placeholder in '{0}'")]
    Malformed(String),
}

/// Replaces every `{{ name }}` in `template` with its value from `vars`.
///
/// # Errors
///
/// Returns `UnknownVariable` for a name missing from `vars` and `Malformed`
/// for a stray `{{`.
pub fn render(template: &str, vars: &HashMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let literal = &template[last..whole.start()];
        if literal.contains("{{") {
            return Err(TemplateError::Malformed(template.to_string()));
        }
        out.push_str(literal);

        let value = vars.get(name.as_str()).ok_or_else(|| TemplateError::UnknownVariable {
            name: name.as_str().to_string(),
            template: template.to_string(),
        })?;
        out.push_str(value);
        last = whole.end();
    }

    let tail = &template[last..];
    if tail.contains("{{") {
        return Err(TemplateError::Malformed(template.to_string()));
    }
    out.push_str(tail);
    Ok(out)
}

/// Names of the placeholders used in `template`, in order of appearance.
#[must_use]
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}
