//! Instance values and the text-interpolation compiler.
//!
//! A template's editable elements form a value tree: element id → either a
//! text value or a nested map (generator options, group children). Before
//! rendering a record, the raw tree is *compiled*: every scalar string runs
//! through a small `{field}` interpolation pass with the record as context.
//!
//! ## Interpolation syntax
//!
//! ```text
//! Hello {first_name}!      → Hello Ada!
//! {{literal braces}}       → {literal braces}
//! ```
//!
//! A placeholder names a record field. Unknown fields and unclosed
//! placeholders are interpolation failures. [`compile`] recovers from them
//! per key: the failing key keeps its raw value and sibling keys are
//! unaffected — a batch render never dies on one bad cell.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

/// One data record, as delivered by the external record store.
pub type Record = BTreeMap<String, String>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValueError {
    #[error("unclosed placeholder starting at byte {0}")]
    UnclosedPlaceholder(usize),
    #[error("empty placeholder at byte {0}")]
    EmptyPlaceholder(usize),
    #[error("stray '}}' at byte {0}")]
    StrayBrace(usize),
    #[error("unknown field: {0}")]
    UnknownField(String),
}

/// Per-record instance values, shaped like the template's editable subtree.
///
/// Serialized form is untagged: a JSON string is a text value, a JSON
/// object is a nested map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn map() -> Self {
        Value::Map(BTreeMap::new())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Text(_) => None,
            Value::Map(m) => Some(m),
        }
    }

    /// Look up a nested entry; `None` on text values.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        if let Value::Map(m) = self {
            m.insert(key.into(), value);
        }
    }
}

/// One lexed piece of an interpolation string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Literal(&'a str),
    Field(&'a str),
}

/// Lex `text` into literal runs and `{field}` placeholders.
///
/// `{{` and `}}` escape literal braces and come back as separate literal
/// tokens (the caller just concatenates literals, so the split is
/// harmless).
pub fn tokenize(text: &str) -> Result<Vec<Token<'_>>, ValueError> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut pos = 0;
    let mut literal_start = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'{' => {
                if literal_start < pos {
                    tokens.push(Token::Literal(&text[literal_start..pos]));
                }
                if bytes.get(pos + 1) == Some(&b'{') {
                    tokens.push(Token::Literal("{"));
                    pos += 2;
                } else {
                    let close = text[pos + 1..]
                        .find('}')
                        .ok_or(ValueError::UnclosedPlaceholder(pos))?;
                    let field = &text[pos + 1..pos + 1 + close];
                    if field.trim().is_empty() {
                        return Err(ValueError::EmptyPlaceholder(pos));
                    }
                    tokens.push(Token::Field(field.trim()));
                    pos += close + 2;
                }
                literal_start = pos;
            }
            b'}' => {
                if bytes.get(pos + 1) == Some(&b'}') {
                    if literal_start < pos {
                        tokens.push(Token::Literal(&text[literal_start..pos]));
                    }
                    tokens.push(Token::Literal("}"));
                    pos += 2;
                    literal_start = pos;
                } else {
                    return Err(ValueError::StrayBrace(pos));
                }
            }
            _ => pos += 1,
        }
    }
    if literal_start < bytes.len() {
        tokens.push(Token::Literal(&text[literal_start..]));
    }
    Ok(tokens)
}

/// Substitute `{field}` placeholders in `text` with record fields.
pub fn interpolate(text: &str, record: &Record) -> Result<String, ValueError> {
    let tokens = tokenize(text)?;
    let mut out = String::with_capacity(text.len());
    for token in tokens {
        match token {
            Token::Literal(s) => out.push_str(s),
            Token::Field(name) => {
                let value = record
                    .get(name)
                    .ok_or_else(|| ValueError::UnknownField(name.to_string()))?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}

/// Whether `text` contains any interpolation syntax at all.
///
/// Callers use this to skip the substitution pass for plain strings. A
/// string that fails to tokenize still *contains* syntax, so it counts as
/// dynamic.
pub fn is_dynamic(text: &str) -> bool {
    match tokenize(text) {
        Ok(tokens) => tokens.iter().any(|t| matches!(t, Token::Field(_))),
        Err(_) => true,
    }
}

/// Compile a raw value tree against a record.
///
/// Never fails: an interpolation failure for one key keeps that key's raw
/// value (logged) and leaves sibling keys untouched.
pub fn compile(values: &Value, record: &Record) -> Value {
    match values {
        Value::Text(raw) => {
            if !is_dynamic(raw) {
                return Value::Text(raw.clone());
            }
            match interpolate(raw, record) {
                Ok(cooked) => Value::Text(cooked),
                Err(err) => {
                    warn!(value = %raw, %err, "interpolation failed, keeping raw value");
                    Value::Text(raw.clone())
                }
            }
        }
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(key, v)| (key.clone(), compile(v, record)))
                .collect(),
        ),
    }
}
