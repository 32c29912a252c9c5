//! Prompt template registry
//!
//! Templates are role-tagged message lists registered by name at startup.
//! Message contents may reference variables as `${name}` or `$name`
//! (`$$` is a literal dollar sign). Rendering a chat prompt appends the
//! worked examples and the target passage after the template messages.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use triplex_core::{ChatMessage, Result, Role, ShotPair, TriplexError};

use crate::templates;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(?:(\$)|\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("placeholder pattern is a valid regex")
});

/// Replace `${var}` / `$var` placeholders; an unbound variable is an error
pub fn substitute(text: &str, vars: &HashMap<String, String>) -> Result<String> {
    let mut missing = None;

    let rendered = PLACEHOLDER.replace_all(text, |caps: &Captures| {
        if caps.get(1).is_some() {
            return "$".to_string();
        }
        let name = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())
            .unwrap_or_default();
        match vars.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(TriplexError::InvalidInput(format!(
            "template variable `{name}` is not bound"
        ))),
        None => Ok(rendered.into_owned()),
    }
}

// ============================================================================
// Templates
// ============================================================================

/// A named list of role-tagged message templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    messages: Vec<ChatMessage>,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Vec::new(),
        }
    }

    /// Append a message template
    pub fn message(mut self, role: Role, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
        });
        self
    }

    pub fn system(self, content: impl Into<String>) -> Self {
        self.message(Role::System, content)
    }

    /// Append a fixed worked example
    pub fn example(self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.message(Role::User, input).message(Role::Assistant, output)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Substitute variables into every message, each followed by a newline
    pub fn render(&self, vars: &HashMap<String, String>) -> Result<Vec<ChatMessage>> {
        self.messages
            .iter()
            .map(|m| {
                Ok(ChatMessage {
                    role: m.role,
                    content: format!("{}\n", substitute(&m.content, vars)?),
                })
            })
            .collect()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Name -> template lookup
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, PromptTemplate>,
}

impl TemplateRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in templates
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(
            PromptTemplate::new("openie")
                .system(templates::OPENIE_SYSTEM)
                .example(templates::OPENIE_EXAMPLE_INPUT, templates::OPENIE_EXAMPLE_OUTPUT),
        );
        registry.register(PromptTemplate::new("openie_dynamic").system(templates::OPENIE_DYNAMIC_SYSTEM));
        registry.register(
            PromptTemplate::new("ner")
                .system(templates::NER_SYSTEM)
                .example(templates::NER_EXAMPLE_INPUT, templates::NER_EXAMPLE_OUTPUT),
        );
        registry.register(
            PromptTemplate::new("triple_from_entities").system(templates::TRIPLE_FROM_ENTITIES_SYSTEM),
        );

        registry
    }

    /// Add or replace a template
    pub fn register(&mut self, template: PromptTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> Result<&PromptTemplate> {
        self.templates
            .get(name)
            .ok_or_else(|| TriplexError::NotFound(format!("prompt template `{name}`")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Assemble the message list for one passage
    ///
    /// A string passage is used verbatim; anything else is sent as JSON.
    /// `passage` is always bound for substitution, on top of `extra_vars`.
    pub fn build_chat_prompt(
        &self,
        name: &str,
        passage: &Value,
        few_shot: &[ShotPair],
        extra_vars: &HashMap<String, String>,
        max_few_shot: usize,
    ) -> Result<Vec<ChatMessage>> {
        let template = self.get(name)?;

        let (inline, standalone) = match passage {
            Value::String(text) => (text.clone(), text.clone()),
            other => (other.to_string(), to_pretty(other)?),
        };

        let mut vars = extra_vars.clone();
        vars.insert("passage".to_string(), inline);

        let mut messages = template.render(&vars)?;

        for shot in few_shot.iter().take(max_few_shot) {
            let input = serde_json::to_value(&shot.input)
                .map_err(|e| TriplexError::parse("few-shot input", e))?;
            messages.push(ChatMessage::user(to_pretty(&input)?));
            messages.push(ChatMessage::assistant(to_pretty(&shot.output_document())?));
        }

        messages.push(ChatMessage::user(format!("{standalone}\n")));
        Ok(messages)
    }
}

fn to_pretty(value: &Value) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| TriplexError::parse("prompt JSON", e))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use triplex_core::{ExampleRow, Mention, Triple};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitute_forms() {
        let v = vars(&[("who", "world"), ("n", "3")]);
        assert_eq!(
            substitute("hello ${who}, $n items, $$5", &v).unwrap(),
            "hello world, 3 items, $5"
        );
    }

    #[test]
    fn test_substitute_missing_variable() {
        let err = substitute("hello ${who}", &HashMap::new()).unwrap_err();
        assert!(matches!(err, TriplexError::InvalidInput(ref m) if m.contains("who")));
    }

    #[test]
    fn test_builtin_names() {
        let registry = TemplateRegistry::builtin();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["ner", "openie", "openie_dynamic", "triple_from_entities"]);
    }

    #[test]
    fn test_unknown_template() {
        let registry = TemplateRegistry::builtin();
        assert!(matches!(
            registry.get("missing"),
            Err(TriplexError::NotFound(_))
        ));
    }

    #[test]
    fn test_builtin_templates_render_without_variables() {
        let registry = TemplateRegistry::builtin();
        for name in registry.names() {
            let messages = registry
                .build_chat_prompt(name, &json!("text"), &[], &HashMap::new(), 3)
                .unwrap();
            assert_eq!(messages[0].role, Role::System);
        }
    }

    #[test]
    fn test_prompt_layout() {
        let registry = TemplateRegistry::builtin();
        let shots: Vec<ShotPair> = (0..4)
            .map(|i| {
                ExampleRow::new(format!("shot {i}"))
                    .with_schema(["capital"])
                    .with_triple(Triple::new(
                        Mention::new("A", "loc", "city"),
                        "capital",
                        Mention::new("B", "loc", "country"),
                    ))
                    .to_shot_pair()
            })
            .collect();
        let passage = json!({"sentence": "target", "schema": [], "coarse_types": []});

        let messages = registry
            .build_chat_prompt("openie_dynamic", &passage, &shots, &HashMap::new(), 3)
            .unwrap();

        // system, three shot pairs, passage
        assert_eq!(messages.len(), 1 + 3 * 2 + 1);
        assert!(messages[0].content.ends_with('\n'));
        assert_eq!(messages[1].role, Role::User);
        assert!(messages[1].content.contains("\"shot 0\""));
        assert_eq!(messages[2].role, Role::Assistant);

        let answer: Value = serde_json::from_str(&messages[2].content).unwrap();
        assert_eq!(answer["output"][0]["subject"], json!(["A", "loc", "city"]));

        let last = messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.content.contains("\"target\""));
        assert!(last.content.ends_with('\n'));
    }

    #[test]
    fn test_custom_template_variables() {
        let mut registry = TemplateRegistry::new();
        registry.register(
            PromptTemplate::new("custom")
                .system("Domain: ${domain}")
                .message(Role::User, "Passage: ${passage}"),
        );

        let messages = registry
            .build_chat_prompt(
                "custom",
                &json!("Paris is in France."),
                &[],
                &vars(&[("domain", "geography")]),
                3,
            )
            .unwrap();

        assert_eq!(messages[0].content, "Domain: geography\n");
        assert_eq!(messages[1].content, "Passage: Paris is in France.\n");
        assert_eq!(messages[2].content, "Paris is in France.\n");

        let err = registry
            .build_chat_prompt("custom", &json!("x"), &[], &HashMap::new(), 3)
            .unwrap_err();
        assert!(matches!(err, TriplexError::InvalidInput(_)));
    }
}
