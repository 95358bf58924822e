//! Font library: variant cache, availability probe, pluggable source.
//!
//! Text elements name a font by `(family, weight, italic)`. The library
//! memoizes parsed faces per variant and answers "make this variant
//! usable" in two phases:
//!
//! 1. exact variant cache hit — nothing to do;
//! 2. width probe — a fixed alphanumeric string is measured against an
//!    already-loaded face of the same family and against the fallback
//!    face; a differing width means the family is renderable without
//!    loading anything new, so the nearest loaded variant is aliased in.
//!
//! Only then is the pluggable [`FontSource`] asked for bytes. Load and
//! parse failures are logged and degrade to the fallback face; a missing
//! font never fails a render.
//!
//! The library is a per-session object (a field of the rasterizer), not a
//! process global, and notifies new loads through a direct callback rather
//! than an event bus.

use std::collections::HashMap;
use std::sync::Mutex;

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use thiserror::Error;
use tracing::{debug, warn};

use crate::content::ContentStore;

/// String measured by the availability probe. Large enough that any
/// metric difference between faces shows up.
const PROBE_TEXT: &str = "abcdefghijklmnopqrstuvwxyz0123456789";
const PROBE_SIZE: f32 = 72.0;

#[derive(Error, Debug)]
pub enum FontError {
    #[error("font source failed for {family}: {message}")]
    Source { family: String, message: String },
    #[error("invalid font data for {0}")]
    InvalidData(String),
}

/// Cache key for one font variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FontVariant {
    pub family: String,
    pub weight: u16,
    pub italic: bool,
}

impl FontVariant {
    pub fn new(family: &str, weight: u16, italic: bool) -> Self {
        Self {
            family: family.to_lowercase(),
            weight,
            italic,
        }
    }
}

impl std::fmt::Display for FontVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}{}", self.family, self.weight, if self.italic { " italic" } else { "" })
    }
}

/// Outcome of [`FontLibrary::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontReadiness {
    /// The exact variant is loaded.
    Exact,
    /// Another variant of the family stands in (probe matched).
    Aliased,
    /// Degraded to the fallback face.
    Fallback,
}

/// Where font bytes come from when a variant isn't cached.
///
/// The asset-backed implementation reads from the content store; remote
/// providers are external collaborators behind the same trait.
pub trait FontSource {
    /// Return the raw font file for the variant, or `None` if this source
    /// doesn't carry it.
    fn load(
        &self,
        family: &str,
        weight: u16,
        italic: bool,
        store: &ContentStore,
    ) -> Result<Option<Vec<u8>>, FontError>;
}

/// A source that never provides anything; the library degrades to the
/// fallback face.
pub struct NullFontSource;

impl FontSource for NullFontSource {
    fn load(
        &self,
        _family: &str,
        _weight: u16,
        _italic: bool,
        _store: &ContentStore,
    ) -> Result<Option<Vec<u8>>, FontError> {
        Ok(None)
    }
}

/// Reads fonts shipped inside the template package:
/// `fonts/<family-slug>-<weight>[-italic].(ttf|otf)`.
pub struct AssetFontSource;

impl AssetFontSource {
    fn candidates(family: &str, weight: u16, italic: bool) -> Vec<String> {
        let slug = family.to_lowercase().replace(' ', "-");
        let suffix = if italic { "-italic" } else { "" };
        ["ttf", "otf"]
            .iter()
            .map(|ext| format!("fonts/{slug}-{weight}{suffix}.{ext}"))
            .collect()
    }
}

impl FontSource for AssetFontSource {
    fn load(
        &self,
        family: &str,
        weight: u16,
        italic: bool,
        store: &ContentStore,
    ) -> Result<Option<Vec<u8>>, FontError> {
        for name in Self::candidates(family, weight, italic) {
            if let Some(bytes) = store.get(&name) {
                return Ok(Some(bytes.as_ref().clone()));
            }
        }
        Ok(None)
    }
}

type ReadyCallback = Box<dyn Fn(&FontVariant) + Send + Sync>;

/// Per-session font cache and loader.
pub struct FontLibrary {
    faces: Mutex<HashMap<FontVariant, FontArc>>,
    fallback: Option<FontArc>,
    source: Box<dyn FontSource + Send + Sync>,
    on_ready: Option<ReadyCallback>,
}

impl FontLibrary {
    pub fn new(source: Box<dyn FontSource + Send + Sync>) -> Self {
        Self {
            faces: Mutex::new(HashMap::new()),
            fallback: None,
            source,
            on_ready: None,
        }
    }

    /// Library that resolves nothing and has no fallback — text measuring
    /// and drawing become no-ops.
    pub fn empty() -> Self {
        Self::new(Box::new(NullFontSource))
    }

    pub fn set_fallback(&mut self, face: FontArc) {
        self.fallback = Some(face);
    }

    /// Direct completion callback invoked when a variant is newly loaded
    /// from the source.
    pub fn set_on_ready(&mut self, callback: ReadyCallback) {
        self.on_ready = Some(callback);
    }

    pub fn fallback(&self) -> Option<&FontArc> {
        self.fallback.as_ref()
    }

    /// Make `(family, weight, italic)` usable, loading it if needed.
    pub fn ensure(
        &self,
        family: &str,
        weight: u16,
        italic: bool,
        store: &ContentStore,
    ) -> FontReadiness {
        let key = FontVariant::new(family, weight, italic);

        {
            let faces = self.faces.lock().unwrap();
            if faces.contains_key(&key) {
                return FontReadiness::Exact;
            }
            // Probe: a loaded sibling variant that measures differently
            // from the fallback proves the family renders without a load.
            if let Some(sibling) = nearest_variant(&faces, &key)
                && self.probe_distinct(&sibling.1)
            {
                let face = sibling.1.clone();
                drop(faces);
                self.faces.lock().unwrap().insert(key, face);
                return FontReadiness::Aliased;
            }
        }

        match self.source.load(family, weight, italic, store) {
            Ok(Some(bytes)) => match FontArc::try_from_vec(bytes) {
                Ok(face) => {
                    self.faces.lock().unwrap().insert(key.clone(), face);
                    debug!(variant = %key, "font loaded");
                    if let Some(on_ready) = &self.on_ready {
                        on_ready(&key);
                    }
                    FontReadiness::Exact
                }
                Err(_) => {
                    warn!(variant = %key, "font data unparseable, using fallback");
                    FontReadiness::Fallback
                }
            },
            Ok(None) => {
                debug!(variant = %key, "no source for font, using fallback");
                FontReadiness::Fallback
            }
            Err(err) => {
                warn!(variant = %key, %err, "font load failed, using fallback");
                FontReadiness::Fallback
            }
        }
    }

    /// Best available face for the variant: exact, then nearest loaded
    /// sibling of the family, then the fallback.
    pub fn face_for(&self, family: &str, weight: u16, italic: bool) -> Option<FontArc> {
        let key = FontVariant::new(family, weight, italic);
        let faces = self.faces.lock().unwrap();
        if let Some(face) = faces.get(&key) {
            return Some(face.clone());
        }
        if let Some((_, face)) = nearest_variant(&faces, &key) {
            return Some(face);
        }
        self.fallback.clone()
    }

    fn probe_distinct(&self, face: &FontArc) -> bool {
        match &self.fallback {
            Some(fallback) => {
                let a = measure_line(face, PROBE_TEXT, PROBE_SIZE);
                let b = measure_line(fallback, PROBE_TEXT, PROBE_SIZE);
                (a - b).abs() > f32::EPSILON
            }
            // With no fallback to compare against, presence is enough.
            None => true,
        }
    }
}

/// Closest loaded variant of the same family: matching italic flag wins,
/// then smallest weight distance.
fn nearest_variant(
    faces: &HashMap<FontVariant, FontArc>,
    key: &FontVariant,
) -> Option<(FontVariant, FontArc)> {
    faces
        .iter()
        .filter(|(candidate, _)| candidate.family == key.family)
        .min_by_key(|(candidate, _)| {
            let italic_penalty = if candidate.italic == key.italic { 0 } else { 1000 };
            let weight_distance = (candidate.weight as i32 - key.weight as i32).abs();
            italic_penalty + weight_distance
        })
        .map(|(k, f)| (k.clone(), f.clone()))
}

/// Advance width of a single line at the given pixel size.
pub fn measure_line(font: &FontArc, text: &str, size: f32) -> f32 {
    let scaled = font.as_scaled(PxScale::from(size));
    let mut width = 0.0;
    let mut prev = None;
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev_id) = prev {
            width += scaled.kern(prev_id, id);
        }
        width += scaled.h_advance(id);
        prev = Some(id);
    }
    width
}

/// Vertical distance between consecutive baselines at the given size.
pub fn line_height(font: &FontArc, size: f32) -> f32 {
    let scaled = font.as_scaled(PxScale::from(size));
    scaled.height() + scaled.line_gap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source whose loads always error.
    struct FailingSource;

    impl FontSource for FailingSource {
        fn load(
            &self,
            family: &str,
            _weight: u16,
            _italic: bool,
            _store: &ContentStore,
        ) -> Result<Option<Vec<u8>>, FontError> {
            Err(FontError::Source {
                family: family.to_string(),
                message: "unreachable".to_string(),
            })
        }
    }

    /// Source producing bytes that are not a font.
    struct GarbageSource;

    impl FontSource for GarbageSource {
        fn load(
            &self,
            _family: &str,
            _weight: u16,
            _italic: bool,
            _store: &ContentStore,
        ) -> Result<Option<Vec<u8>>, FontError> {
            Ok(Some(vec![0xde, 0xad, 0xbe, 0xef]))
        }
    }

    #[test]
    fn variant_key_is_case_insensitive() {
        assert_eq!(
            FontVariant::new("Inter", 400, false),
            FontVariant::new("inter", 400, false)
        );
    }

    #[test]
    fn missing_source_degrades_to_fallback() {
        let store = ContentStore::new();
        let library = FontLibrary::empty();
        assert_eq!(
            library.ensure("Inter", 400, false, &store),
            FontReadiness::Fallback
        );
        assert!(library.face_for("Inter", 400, false).is_none());
    }

    #[test]
    fn source_error_is_recovered() {
        let store = ContentStore::new();
        let library = FontLibrary::new(Box::new(FailingSource));
        assert_eq!(
            library.ensure("Inter", 400, false, &store),
            FontReadiness::Fallback
        );
    }

    #[test]
    fn unparseable_font_is_recovered() {
        let store = ContentStore::new();
        let library = FontLibrary::new(Box::new(GarbageSource));
        assert_eq!(
            library.ensure("Inter", 400, false, &store),
            FontReadiness::Fallback
        );
    }

    #[test]
    fn on_ready_not_called_for_fallback() {
        let store = ContentStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut library = FontLibrary::empty();
        library.set_on_ready(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        library.ensure("Inter", 400, false, &store);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn asset_source_candidate_names() {
        let names = AssetFontSource::candidates("Source Serif", 700, true);
        assert_eq!(
            names,
            vec![
                "fonts/source-serif-700-italic.ttf",
                "fonts/source-serif-700-italic.otf",
            ]
        );
    }

    #[test]
    fn asset_source_misses_cleanly() {
        let store = ContentStore::new();
        let source = AssetFontSource;
        assert!(source.load("Inter", 400, false, &store).unwrap().is_none());
    }
}
