//! `{{fieldId}}` placeholder interpolation for text-mode fields

use crate::types::ValueContext;
use regex::Regex;
use std::sync::OnceLock;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A display text split into literal runs and field placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut last_end = 0;

        for capture in placeholder_regex().captures_iter(source) {
            let (Some(whole), Some(id)) = (capture.get(0), capture.get(1)) else {
                continue;
            };
            if whole.start() > last_end {
                segments.push(Segment::Literal(source[last_end..whole.start()].to_string()));
            }
            segments.push(Segment::Placeholder(id.as_str().to_string()));
            last_end = whole.end();
        }

        if last_end < source.len() {
            segments.push(Segment::Literal(source[last_end..].to_string()));
        }

        Self {
            source: source.to_string(),
            segments,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Field ids referenced by placeholders, in first-occurrence order.
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(id) = segment {
                if !fields.contains(id) {
                    fields.push(id.clone());
                }
            }
        }
        fields
    }

    /// Render against the current values. Unknown ids render as an empty string.
    pub fn render(&self, context: &ValueContext) -> String {
        let mut output = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => output.push_str(text),
                Segment::Placeholder(id) => {
                    if let Some(value) = context.value(id) {
                        output.push_str(&value.to_string());
                    } else {
                        log::trace!("Placeholder '{{{{{}}}}}' has no value, rendering empty", id);
                    }
                }
            }
        }
        output
    }
}

/// One-shot interpolation of a template string.
pub fn interpolate(template: &str, context: &ValueContext) -> String {
    Template::parse(template).render(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn test_extract_placeholders() {
        let test_cases = vec![
            ("{{x}}", vec!["x"]),
            ("Total: {{ total }}", vec!["total"]),
            ("{{a}} and {{b}} and {{a}}", vec!["a", "b"]),
            ("No placeholders here", vec![]),
            ("{single} {{ }} {{1x}}", vec![]),
            ("{{_private}}", vec!["_private"]),
        ];

        for (input, expected) in test_cases {
            let result = Template::parse(input).referenced_fields();
            assert_eq!(result, expected, "Failed for input: '{}'", input);
        }
    }

    #[test]
    fn test_render_selected_and_doubled() {
        let context: ValueContext = vec![("x", 25.0), ("y", 50.0)].into_iter().collect();
        assert_eq!(
            interpolate("You selected {{x}} — doubled is {{y}}", &context),
            "You selected 25 — doubled is 50"
        );
    }

    #[test]
    fn test_unknown_placeholder_renders_empty() {
        let context: ValueContext = vec![("x", 25.0)].into_iter().collect();
        assert_eq!(
            interpolate("You selected {{x}} — doubled is {{y}}", &context),
            "You selected 25 — doubled is "
        );
    }

    #[test]
    fn test_render_mixed_values() {
        let mut context = ValueContext::new();
        context.set_value("name", Value::from("Ada"));
        context.set_value("adult", Value::Boolean(true));
        context.set_value("ratio", Value::Number(f64::NAN));
        assert_eq!(
            interpolate("{{name}}/{{adult}}/{{ratio}}", &context),
            "Ada/true/NaN"
        );
    }

    #[test]
    fn test_segments_preserve_literals() {
        let template = Template::parse("a{{x}}b");
        assert_eq!(
            template.segments(),
            &[
                Segment::Literal("a".to_string()),
                Segment::Placeholder("x".to_string()),
                Segment::Literal("b".to_string()),
            ]
        );
    }
}
