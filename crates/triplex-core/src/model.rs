//! Corpus data model
//!
//! Example rows, triples and the (input, output) shot pairs built from them.
//! Annotated corpora are heterogeneous, so every type here parses leniently
//! from JSON: fields with the wrong shape are treated as absent instead of
//! failing the whole row.

use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Mention
// ============================================================================

/// One side of a triple: `[name, coarse_type, fine_type]`
///
/// Object-form mentions (`{"name", "coarse_type", "fine_type"}`) are read as
/// well, but only the array form is a source of coarse index labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Mention {
    pub name: String,
    pub coarse_type: Option<String>,
    pub fine_type: Option<String>,
    positional: bool,
}

impl Mention {
    /// Create a fully typed mention
    pub fn new(
        name: impl Into<String>,
        coarse_type: impl Into<String>,
        fine_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            coarse_type: Some(coarse_type.into()),
            fine_type: Some(fine_type.into()),
            positional: true,
        }
    }

    /// Mention with only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            positional: true,
            ..Default::default()
        }
    }

    /// Parse from either the array form or a `{name, coarse_type, fine_type}` object
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Array(items) => Self {
                name: items
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                coarse_type: items.get(1).and_then(Value::as_str).map(str::to_string),
                fine_type: items.get(2).and_then(Value::as_str).map(str::to_string),
                positional: true,
            },
            Value::Object(fields) => Self {
                name: fields
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                coarse_type: fields
                    .get("coarse_type")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                fine_type: fields
                    .get("fine_type")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                positional: false,
            },
            Value::String(name) => Self {
                name: name.clone(),
                ..Default::default()
            },
            _ => Self::default(),
        }
    }

    /// Coarse type, or an empty string when absent
    pub fn coarse(&self) -> &str {
        self.coarse_type.as_deref().unwrap_or_default()
    }

    /// Fine type, or an empty string when absent
    pub fn fine(&self) -> &str {
        self.fine_type.as_deref().unwrap_or_default()
    }

    /// Coarse type usable as an index label: array form with a string at index 1
    pub fn index_coarse_type(&self) -> Option<&str> {
        self.coarse_type.as_deref().filter(|_| self.positional)
    }
}

impl Serialize for Mention {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.fine_type.is_some() {
            3
        } else if self.coarse_type.is_some() {
            2
        } else {
            1
        };

        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.name)?;
        if len >= 2 {
            seq.serialize_element(&self.coarse_type)?;
        }
        if len == 3 {
            seq.serialize_element(&self.fine_type)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Mention {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

// ============================================================================
// Triple
// ============================================================================

/// A (subject, relationship, object) extraction
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Triple {
    pub subject: Mention,
    pub relationship: String,
    pub object: Mention,
}

impl Triple {
    /// Create a new triple
    pub fn new(subject: Mention, relationship: impl Into<String>, object: Mention) -> Self {
        Self {
            subject,
            relationship: relationship.into(),
            object,
        }
    }

    /// Parse a triple object; anything that is not a JSON object yields `None`
    pub fn from_value(value: &Value) -> Option<Self> {
        let fields = value.as_object()?;
        Some(Self {
            subject: fields
                .get("subject")
                .map(Mention::from_value)
                .unwrap_or_default(),
            relationship: fields
                .get("relationship")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            object: fields
                .get("object")
                .map(Mention::from_value)
                .unwrap_or_default(),
        })
    }

    /// Relationship label, if present and non-empty
    pub fn relationship_label(&self) -> Option<&str> {
        Some(self.relationship.as_str()).filter(|r| !r.is_empty())
    }

    /// Index labels from subject and object coarse types
    pub fn coarse_labels(&self) -> impl Iterator<Item = &str> {
        [&self.subject, &self.object]
            .into_iter()
            .filter_map(Mention::index_coarse_type)
    }
}

impl<'de> Deserialize<'de> for Triple {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value).unwrap_or_default())
    }
}

// ============================================================================
// Example Row
// ============================================================================

/// One annotated corpus entry
///
/// Fields other than `sentence`, `schema`, `coarse_types` and `output`
/// (`id`, `source`, `domain`, ...) are kept in `extra` and written back
/// unchanged. Rows parsed from JSON also keep their `output` value as read,
/// which is what shot pairs show the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExampleRow {
    pub sentence: String,
    pub schema: Vec<String>,
    pub coarse_types: Vec<String>,
    pub output: Vec<Triple>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip)]
    raw_output: Option<Value>,
}

impl ExampleRow {
    /// Create a row without annotations
    pub fn new(sentence: impl Into<String>) -> Self {
        Self {
            sentence: sentence.into(),
            ..Default::default()
        }
    }

    /// Set the relation schema
    pub fn with_schema<I, S>(mut self, schema: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema = schema.into_iter().map(Into::into).collect();
        self
    }

    /// Set the coarse types
    pub fn with_coarse_types<I, S>(mut self, coarse_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.coarse_types = coarse_types.into_iter().map(Into::into).collect();
        self
    }

    /// Append a triple to the output
    pub fn with_triple(mut self, triple: Triple) -> Self {
        self.output.push(triple);
        self.raw_output = None;
        self
    }

    /// Replace the output
    pub fn with_output(mut self, output: Vec<Triple>) -> Self {
        self.output = output;
        self.raw_output = None;
        self
    }

    /// Parse a row; a non-object value becomes an empty row so that corpus
    /// positions stay aligned with the source file
    pub fn from_value(value: &Value) -> Self {
        let Some(fields) = value.as_object() else {
            return Self {
                raw_output: Some(Value::Null),
                ..Self::default()
            };
        };

        let strings = |key: &str| -> Vec<String> {
            fields
                .get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        let output = fields
            .get("output")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Triple::from_value).collect())
            .unwrap_or_default();

        let extra = fields
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "sentence" | "schema" | "coarse_types" | "output"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            sentence: fields
                .get("sentence")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            schema: strings("schema"),
            coarse_types: strings("coarse_types"),
            output,
            extra,
            raw_output: Some(fields.get("output").cloned().unwrap_or(Value::Null)),
        }
    }

    /// True when the row was read from JSON and its `output` is missing or
    /// not an array
    pub fn has_malformed_output(&self) -> bool {
        matches!(&self.raw_output, Some(raw) if !raw.is_array())
    }

    /// Row identifier, if the corpus carries one
    pub fn id(&self) -> Option<String> {
        match self.extra.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Project the prompt input of this row
    pub fn input(&self) -> ShotInput {
        ShotInput {
            sentence: self.sentence.clone(),
            schema: self.schema.clone(),
            coarse_types: self.coarse_types.clone(),
        }
    }

    /// Convert to an (input, output) pair for in-context prompting
    ///
    /// The output entries are the row's `output` list exactly as read; rows
    /// assembled in code serialize their triples.
    pub fn to_shot_pair(&self) -> ShotPair {
        let output = match &self.raw_output {
            Some(Value::Array(items)) => items.clone(),
            _ => self.output.iter().map(|t| serde_json::json!(t)).collect(),
        };
        ShotPair {
            input: self.input(),
            output,
        }
    }
}

impl<'de> Deserialize<'de> for ExampleRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

// ============================================================================
// Shot Pairs
// ============================================================================

/// The input half of a worked example
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotInput {
    pub sentence: String,
    #[serde(default)]
    pub schema: Vec<String>,
    #[serde(default)]
    pub coarse_types: Vec<String>,
}

/// A worked (input, output) example shown to the model before the target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotPair {
    pub input: ShotInput,
    /// Triple entries as they appear in the corpus
    pub output: Vec<Value>,
}

impl ShotPair {
    /// Output wrapped the way the model is asked to answer
    pub fn output_document(&self) -> Value {
        serde_json::json!({ "output": self.output })
    }
}

// ============================================================================
// Tests
// ============================================================================
