use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

/// Any key without braces, e.g. `{{name}}` or `{{first-name}}`.
#[allow(clippy::unwrap_used)]
static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").unwrap());

/// Text substituted for a value: strings as-is, anything else as JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fills `{{name}}` placeholders in template subjects and bodies.
pub struct TemplateRenderer {
    pattern: &'static Regex,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self {
            pattern: &PLACEHOLDER_PATTERN,
        }
    }

    /// Placeholder names in order of first appearance, without duplicates.
    pub fn placeholders(&self, text: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for cap in self.pattern.captures_iter(text) {
            let name = cap[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Replaces every placeholder that has a value; unknown ones are left as written.
    pub fn render(&self, template: &str, values: &HashMap<String, Value>) -> String {
        self.pattern
            .replace_all(template, |caps: &regex::Captures| {
                values
                    .get(&caps[1])
                    .map(value_text)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .to_string()
    }

    pub fn has_placeholders(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}
