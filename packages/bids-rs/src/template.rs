//! Flat `{placeholder}` templates.
//!
//! Only named substitution is supported. `{{` and `}}` produce literal
//! braces. Rendering fails on the first placeholder the context cannot
//! supply; a missing (or null) field is never rendered as an empty string.

use crate::error::{BidsError, Result};
use crate::fields::Fields;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let syntax = |reason: &str| BidsError::TemplateSyntax {
            template: source.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') => return Err(syntax("nested '{' in placeholder")),
                            Some(ch) => name.push(ch),
                            None => return Err(syntax("unclosed placeholder")),
                        }
                    }
                    if name.is_empty() {
                        return Err(syntax("empty placeholder"));
                    }
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Field(name));
                }
                '}' => return Err(syntax("unmatched '}'")),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of appearance (duplicates kept)
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            Part::Field(name) => Some(name.as_str()),
            Part::Literal(_) => None,
        })
    }

    pub fn render_with<F>(&self, lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Field(name) => {
                    let value = lookup(name)
                        .ok_or_else(|| BidsError::MissingTemplateField(name.clone()))?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }

    pub fn render(&self, context: &Fields) -> Result<String> {
        self.render_with(|name| context.get_str(name).map(str::to_string))
    }
}

/// Parse and render in one step.
pub fn render(template: &str, context: &Fields) -> Result<String> {
    Template::parse(template)?.render(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::AttrValue;

    #[test]
    fn test_render_all_fields() {
        let ctx: Fields = [("segment_key", "run01"), ("field", "id")].into_iter().collect();
        assert_eq!(render("{segment_key}_{field}", &ctx).unwrap(), "run01_id");
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let ctx: Fields = [("participant_id", "01")].into_iter().collect();
        let err = render("sub-{participant_id}_run-{run_id}.edf", &ctx).unwrap_err();
        match err {
            BidsError::MissingTemplateField(name) => assert_eq!(name, "run_id"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_null_field_is_missing() {
        let mut ctx = Fields::new();
        ctx.insert("task", AttrValue::Null);
        assert!(matches!(
            render("task-{task}", &ctx),
            Err(BidsError::MissingTemplateField(_))
        ));
    }

    #[test]
    fn test_escaped_braces() {
        let ctx: Fields = [("x", "1")].into_iter().collect();
        assert_eq!(render("{{literal}}_{x}", &ctx).unwrap(), "{literal}_1");
    }

    #[test]
    fn test_syntax_errors() {
        for bad in ["{unclosed", "stray}", "{}", "{a{b}}"] {
            assert!(
                matches!(Template::parse(bad), Err(BidsError::TemplateSyntax { .. })),
                "expected syntax error for {bad}"
            );
        }
    }

    #[test]
    fn test_placeholders_in_order() {
        let t = Template::parse("sub-{participant_id}_ses-{session_id}_{modality}").unwrap();
        assert_eq!(
            t.placeholders().collect::<Vec<_>>(),
            vec!["participant_id", "session_id", "modality"]
        );
    }
}
