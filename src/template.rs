//! Template data model: canvas, element tree, identity hashing.
//!
//! A template is a versioned document: canvas settings (size, optional
//! background image reference), a `variables` declaration that is carried
//! through round-trips untouched, and an ordered tree of elements. Element
//! kinds are a closed sum type — adding a kind is a compile-time-checked
//! extension point, not a string branch.
//!
//! ## Identity
//!
//! A template's identity for cache purposes is the SHA-256 of its name plus
//! its canonical JSON form (sorted keys, no whitespace). Identical
//! serialized content hashes identically; any content difference changes
//! the hash with overwhelming probability. This is a cache-invalidation
//! heuristic, not cryptographic identity.
//!
//! ## Editability
//!
//! Only `Text` and `Generated` elements (and, transitively, the `Group`
//! wrappers above them) participate in the per-record value map. Everything
//! else is static scenery.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::values::Value;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate element id: {0}")]
    DuplicateElementId(String),
    #[error("invalid color: {0}")]
    InvalidColor(String),
}

/// RGBA color, serialized as `#rrggbb` / `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn parse(s: &str) -> Result<Self, TemplateError> {
        let hex = s
            .strip_prefix('#')
            .filter(|h| h.is_ascii())
            .ok_or_else(|| TemplateError::InvalidColor(s.to_string()))?;
        let byte = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16)
                .map_err(|_| TemplateError::InvalidColor(s.to_string()))
        };
        match hex.len() {
            6 => Ok(Self {
                r: byte(0..2)?,
                g: byte(2..4)?,
                b: byte(4..6)?,
                a: 255,
            }),
            8 => Ok(Self {
                r: byte(0..2)?,
                g: byte(2..4)?,
                b: byte(4..6)?,
                a: byte(6..8)?,
            }),
            _ => Err(TemplateError::InvalidColor(s.to_string())),
        }
    }

    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Color {
    type Error = TemplateError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Color::parse(&s)
    }
}

impl From<Color> for String {
    fn from(c: Color) -> String {
        c.to_hex()
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Color::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// How an element composites over what's beneath it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

/// Font and paint attributes of a text element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    pub family: String,
    pub size: f32,
    pub weight: u16,
    pub italic: bool,
    pub color: Color,
    pub align: Align,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            family: "sans-serif".to_string(),
            size: 16.0,
            weight: 400,
            italic: false,
            color: Color::BLACK,
            align: Align::Left,
        }
    }
}

/// Position and size shared by every element kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextElement {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub frame: Frame,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub style: TextStyle,
    #[serde(default, skip_serializing_if = "is_normal_blend")]
    pub blend: BlendMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageElement {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub frame: Frame,
    /// URI-like reference to raster content (`content://`, `data:`, http).
    pub src: String,
    #[serde(default, skip_serializing_if = "is_normal_blend")]
    pub blend: BlendMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedElement {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub frame: Frame,
    /// Name of a registered generator.
    pub generator: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "is_normal_blend")]
    pub blend: BlendMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupElement {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub frame: Frame,
    #[serde(default)]
    pub children: Vec<Element>,
}

fn is_normal_blend(b: &BlendMode) -> bool {
    *b == BlendMode::Normal
}

/// One visual unit in a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Element {
    Text(TextElement),
    Image(ImageElement),
    Generated(GeneratedElement),
    Group(GroupElement),
}

impl Element {
    pub fn id(&self) -> &str {
        match self {
            Element::Text(e) => &e.id,
            Element::Image(e) => &e.id,
            Element::Generated(e) => &e.id,
            Element::Group(e) => &e.id,
        }
    }

    fn id_mut(&mut self) -> &mut String {
        match self {
            Element::Text(e) => &mut e.id,
            Element::Image(e) => &mut e.id,
            Element::Generated(e) => &mut e.id,
            Element::Group(e) => &mut e.id,
        }
    }

    pub fn frame(&self) -> &Frame {
        match self {
            Element::Text(e) => &e.frame,
            Element::Image(e) => &e.frame,
            Element::Generated(e) => &e.frame,
            Element::Group(e) => &e.frame,
        }
    }

    /// Whether this element's value can vary per record.
    pub fn is_editable(&self) -> bool {
        matches!(self, Element::Text(_) | Element::Generated(_))
    }

    pub fn children(&self) -> &[Element] {
        match self {
            Element::Group(g) => &g.children,
            _ => &[],
        }
    }
}

/// Declared template variable. Carried through parse → serialize untouched;
/// the core engine does not consult it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Canvas settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    /// Optional background-image reference (resolved like any image src).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

/// A visual template: authored once, instantiated per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub canvas: Canvas,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub elements: Vec<Element>,
}

fn default_version() -> u32 {
    1
}

impl Template {
    /// Parse a `template.json` document: deserialize, assign synthetic ids
    /// to elements lacking one, and validate id uniqueness.
    pub fn from_json(json: &str) -> Result<Self, TemplateError> {
        let mut template: Template = serde_json::from_str(json)?;
        template.assign_ids();
        template.validate_ids()?;
        Ok(template)
    }

    pub fn to_json(&self) -> Result<String, TemplateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Give every element lacking an id a deterministic `element_<n>` id,
    /// where `n` is the element's depth-first visit index. Stable across
    /// repeated parses of the same document.
    fn assign_ids(&mut self) {
        let mut counter = 0usize;
        fn visit(elements: &mut [Element], counter: &mut usize) {
            for element in elements {
                if element.id().is_empty() {
                    *element.id_mut() = format!("element_{counter}");
                }
                *counter += 1;
                if let Element::Group(g) = element {
                    visit(&mut g.children, counter);
                }
            }
        }
        visit(&mut self.elements, &mut counter);
    }

    fn validate_ids(&self) -> Result<(), TemplateError> {
        let mut seen = BTreeSet::new();
        fn visit(
            elements: &[Element],
            seen: &mut BTreeSet<String>,
        ) -> Result<(), TemplateError> {
            for element in elements {
                if !seen.insert(element.id().to_string()) {
                    return Err(TemplateError::DuplicateElementId(element.id().to_string()));
                }
                visit(element.children(), seen)?;
            }
            Ok(())
        }
        visit(&self.elements, &mut seen)
    }

    /// Content hash combining the template name with its canonical JSON
    /// form. Equal content → equal hash; any difference changes it with
    /// overwhelming probability.
    pub fn identity_hash(&self) -> String {
        // serde_json's default Map is sorted, but sort explicitly so the
        // canonical form doesn't depend on a feature flag.
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        let canonical = sorted_json(&value).to_string();
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(b":");
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Build a fresh instance-value tree from element defaults, mirroring
    /// the editable subtree shape.
    pub fn default_values(&self) -> Value {
        fn collect(elements: &[Element]) -> BTreeMap<String, Value> {
            let mut map = BTreeMap::new();
            for element in elements {
                match element {
                    Element::Text(e) => {
                        map.insert(e.id.clone(), Value::Text(e.value.clone()));
                    }
                    Element::Generated(e) => {
                        map.insert(e.id.clone(), Value::Map(e.options.clone()));
                    }
                    Element::Group(g) => {
                        let nested = collect(&g.children);
                        if !nested.is_empty() {
                            map.insert(g.id.clone(), Value::Map(nested));
                        }
                    }
                    Element::Image(_) => {}
                }
            }
            map
        }
        Value::Map(collect(&self.elements))
    }

    /// Depth-first iteration over the whole element tree.
    pub fn walk(&self) -> impl Iterator<Item = &Element> {
        let mut stack: Vec<&Element> = self.elements.iter().rev().collect();
        std::iter::from_fn(move || {
            let element = stack.pop()?;
            for child in element.children().iter().rev() {
                stack.push(child);
            }
            Some(element)
        })
    }

    pub fn element_count(&self) -> usize {
        self.walk().count()
    }
}

fn sorted_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted_json(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sorted_json).collect())
        }
        other => other.clone(),
    }
}
