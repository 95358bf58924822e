//! # platemaker
//!
//! A template-driven batch image renderer. A visual template — canvas
//! size, background, an ordered tree of text/image/generated/group
//! elements — is authored once and instantiated per data record to
//! produce raster images, which can be exported individually, bundled
//! into a zip, or tiled onto print-ready sheets.
//!
//! # Architecture: Render → Export → Layout
//!
//! ```text
//! 1. Package   zip/dir   →  Template + ContentStore   (parse, assets)
//! 2. Compile   record    →  instance values           ({field} interpolation)
//! 3. Render    values    →  scene graph               (rebuild vs inject)
//! 4. Export    scene     →  named blobs               (png/jpeg, zip bundle)
//! 5. Layout    blobs     →  print sheets              (greedy grid, composite)
//! ```
//!
//! The renderer is incremental: a template's content hash decides between
//! a full scene rebuild and pure value injection into the existing node
//! tree, so batch exports pay the tree construction once and only swap
//! per-record values afterwards.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`template`] | Template/element data model, parsing, identity hashing |
//! | [`content`] | In-memory named-blob store behind `content://` references |
//! | [`uri`] | Pluggable URI handler registry (`content://`, `data:`, http) |
//! | [`values`] | Instance value trees and the `{field}` interpolation compiler |
//! | [`fonts`] | Font variant cache, availability probe, pluggable sources |
//! | [`scene`] | The drawable node tree owned by the renderer |
//! | [`render`] | Incremental scene-graph renderer and readiness barrier |
//! | [`generator`] | Registered image generators for `generated` elements |
//! | [`raster`] | Rasterizer trait + software compositor (`image`/`ab_glyph`) |
//! | [`export`] | Exporter strategies, sequential batch pipeline, zip bundling |
//! | [`package`] | Template package load/save (zip or directory) |
//! | [`layout`] | Print layout engine: grid computation and sheet compositing |
//! | [`config`] | `platemaker.toml` engine defaults |
//!
//! # Sessions, not globals
//!
//! Every cache lives on an explicit object: the content store on the
//! caller, the font cache on the rasterizer, the generated-output cache on
//! the renderer. Two export jobs with separate renderers never share
//! mutable state.

pub mod config;
pub mod content;
pub mod export;
pub mod fonts;
pub mod generator;
pub mod layout;
pub mod package;
pub mod raster;
pub mod render;
pub mod scene;
pub mod template;
pub mod uri;
pub mod values;

pub use content::ContentStore;
pub use export::{ExportItem, ExportOptions, ExportPipeline, JpegExporter, PngExporter};
pub use generator::GeneratorRegistry;
pub use layout::PageSize;
pub use raster::SoftwareRasterizer;
pub use render::{LayerFilter, RenderEnv, Renderer};
pub use template::Template;
pub use uri::Resolver;
pub use values::{Record, Value};
