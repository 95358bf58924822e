//! Exporter strategies and the sequential batch pipeline.
//!
//! An [`Exporter`] turns one rendered scene into an output blob in a
//! specific format. The pipeline drives a single renderer through the
//! strategy once per record — strictly sequentially, because all records
//! share the one renderer and its off-screen surface.
//!
//! Filenames come from a format string run through the value compiler with
//! the record (plus a synthetic `index` field) as context; a failing
//! interpolation falls back to `<template>-<index>.<ext>` and the batch
//! still yields one item per record.
//!
//! Multi-record output is bundled into a single zip archive with
//! [`bundle_zip`].

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::raster::{OutputFormat, Quality, RasterError, Rasterizer};
use crate::render::{LayerFilter, RenderEnv, RenderError, Renderer};
use crate::template::Template;
use crate::values::{self, Record, Value};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("no template loaded")]
    NoTemplateLoaded,
    #[error("no records to export")]
    NoRecordsToExport,
    #[error("exporter {exporter} does not accept option '{option}'")]
    UnknownOption { exporter: String, option: String },
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One finished export: a named blob plus its pixel size when known.
#[derive(Debug, Clone)]
pub struct ExportItem {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Caller-supplied export options: an output scale plus exporter-specific
/// keys validated against the exporter's declared schema.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub scale: f32,
    /// How long the readiness barrier may report on unsettled assets.
    pub ready_timeout: Duration,
    pub extra: BTreeMap<String, String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            scale: 1.0,
            ready_timeout: Duration::from_secs(5),
            extra: BTreeMap::new(),
        }
    }
}

impl ExportOptions {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }
}

/// A pluggable export strategy.
///
/// Each strategy receives the (fresh or reused) renderer bound to the
/// off-screen surface, so it can set filters or fills before driving
/// `render`.
pub trait Exporter<B: Rasterizer> {
    fn id(&self) -> &str;

    /// File extension for items this exporter produces (no dot).
    fn extension(&self) -> &str;

    /// Option keys this exporter accepts, beyond the caller's scale.
    fn accepted_options(&self) -> &[&str];

    fn export(
        &self,
        renderer: &mut Renderer<B>,
        template: &Template,
        values: &Value,
        env: &RenderEnv,
        options: &ExportOptions,
    ) -> Result<Vec<u8>, ExportError>;
}

/// Reject option keys the exporter does not declare.
pub fn validate_options<B: Rasterizer>(
    exporter: &dyn Exporter<B>,
    options: &ExportOptions,
) -> Result<(), ExportError> {
    for key in options.extra.keys() {
        if !exporter.accepted_options().contains(&key.as_str()) {
            return Err(ExportError::UnknownOption {
                exporter: exporter.id().to_string(),
                option: key.clone(),
            });
        }
    }
    Ok(())
}

fn render_scaled<B: Rasterizer>(
    renderer: &mut Renderer<B>,
    template: &Template,
    values: &Value,
    env: &RenderEnv,
    options: &ExportOptions,
) -> Result<image::RgbaImage, ExportError> {
    renderer.render(template, values, env);
    renderer.wait_ready(options.ready_timeout)?;
    let mut output = renderer.rasterize()?;
    if (options.scale - 1.0).abs() > f32::EPSILON {
        let width = ((output.width() as f32 * options.scale).round() as u32).max(1);
        let height = ((output.height() as f32 * options.scale).round() as u32).max(1);
        output = image::imageops::resize(
            &output,
            width,
            height,
            image::imageops::FilterType::Lanczos3,
        );
    }
    Ok(output)
}

/// PNG exporter. Accepts no extra options.
pub struct PngExporter;

impl<B: Rasterizer> Exporter<B> for PngExporter {
    fn id(&self) -> &str {
        "png"
    }

    fn extension(&self) -> &str {
        "png"
    }

    fn accepted_options(&self) -> &[&str] {
        &[]
    }

    fn export(
        &self,
        renderer: &mut Renderer<B>,
        template: &Template,
        values: &Value,
        env: &RenderEnv,
        options: &ExportOptions,
    ) -> Result<Vec<u8>, ExportError> {
        let output = render_scaled(renderer, template, values, env, options)?;
        Ok(renderer
            .backend()
            .encode(&output, OutputFormat::Png, Quality::default())?)
    }
}

/// JPEG exporter. Accepts a `quality` option (1-100).
pub struct JpegExporter;

impl<B: Rasterizer> Exporter<B> for JpegExporter {
    fn id(&self) -> &str {
        "jpeg"
    }

    fn extension(&self) -> &str {
        "jpg"
    }

    fn accepted_options(&self) -> &[&str] {
        &["quality"]
    }

    fn export(
        &self,
        renderer: &mut Renderer<B>,
        template: &Template,
        values: &Value,
        env: &RenderEnv,
        options: &ExportOptions,
    ) -> Result<Vec<u8>, ExportError> {
        let quality = options
            .option("quality")
            .and_then(|q| q.parse().ok())
            .map(Quality::new)
            .unwrap_or_default();
        let output = render_scaled(renderer, template, values, env, options)?;
        Ok(renderer
            .backend()
            .encode(&output, OutputFormat::Jpeg, quality)?)
    }
}

/// A record the pipeline could not export.
#[derive(Debug)]
pub struct BatchFailure {
    pub index: usize,
    pub error: ExportError,
}

/// Outcome of a batch export: one item per successful record, plus
/// per-record failures (the batch is not aborted by one bad record).
#[derive(Debug, Default)]
pub struct BatchReport {
    pub items: Vec<ExportItem>,
    pub failures: Vec<BatchFailure>,
}

/// Drives one renderer through an exporter, record by record.
pub struct ExportPipeline<'a, B: Rasterizer> {
    renderer: &'a mut Renderer<B>,
    env: RenderEnv<'a>,
}

impl<'a, B: Rasterizer> ExportPipeline<'a, B> {
    pub fn new(renderer: &'a mut Renderer<B>, env: RenderEnv<'a>) -> Self {
        Self { renderer, env }
    }

    /// Export one record's compiled values.
    pub fn export_single(
        &mut self,
        template: &Template,
        values: &Value,
        exporter: &dyn Exporter<B>,
        options: &ExportOptions,
    ) -> Result<Vec<u8>, ExportError> {
        validate_options(exporter, options)?;
        exporter.export(self.renderer, template, values, &self.env, options)
    }

    /// Export every record sequentially.
    ///
    /// `raw_values` is the per-record instance-value tree (typically
    /// [`Template::default_values`] or externally stored values); it is
    /// compiled against each record before rendering. Fails fast on
    /// missing preconditions; individual record failures are collected,
    /// not fatal.
    #[allow(clippy::too_many_arguments)]
    pub fn export_batch(
        &mut self,
        template: Option<&Template>,
        records: &[Record],
        raw_values: &Value,
        exporter: &dyn Exporter<B>,
        filename_format: &str,
        options: &ExportOptions,
        filter: Option<LayerFilter>,
    ) -> Result<BatchReport, ExportError> {
        let template = template.ok_or(ExportError::NoTemplateLoaded)?;
        if records.is_empty() {
            return Err(ExportError::NoRecordsToExport);
        }
        validate_options(exporter, options)?;
        if let Some(filter) = filter {
            self.renderer.set_filter(filter);
        }

        let mut report = BatchReport::default();
        for (index, record) in records.iter().enumerate() {
            let compiled = values::compile(raw_values, record);
            let filename =
                derive_filename(filename_format, record, index, template, exporter.extension());

            match exporter.export(self.renderer, template, &compiled, &self.env, options) {
                Ok(bytes) => {
                    let (width, height) = scaled_canvas(template, options.scale);
                    report.items.push(ExportItem {
                        filename,
                        bytes,
                        width: Some(width),
                        height: Some(height),
                    });
                }
                Err(error) => {
                    warn!(index, %error, "record export failed");
                    report.failures.push(BatchFailure { index, error });
                }
            }
        }
        Ok(report)
    }
}

fn scaled_canvas(template: &Template, scale: f32) -> (u32, u32) {
    let width = ((template.canvas.width as f32 * scale).round() as u32).max(1);
    let height = ((template.canvas.height as f32 * scale).round() as u32).max(1);
    (width, height)
}

/// Interpolate the filename format with the record plus a synthetic
/// `index` field; fall back to `<template>-<index>.<ext>` when the format
/// fails to compile.
fn derive_filename(
    format: &str,
    record: &Record,
    index: usize,
    template: &Template,
    extension: &str,
) -> String {
    let mut context = record.clone();
    context.insert("index".to_string(), format!("{:03}", index + 1));

    let stem = match values::interpolate(format, &context) {
        Ok(stem) => stem,
        Err(err) => {
            warn!(format, index, %err, "filename interpolation failed, using fallback");
            format!("{}-{:03}", template.name, index + 1)
        }
    };
    let suffix = format!(".{extension}");
    if stem.ends_with(&suffix) {
        stem
    } else {
        format!("{stem}{suffix}")
    }
}

/// Bundle multiple exports into one zip archive.
pub fn bundle_zip(items: &[ExportItem]) -> Result<Vec<u8>, ExportError> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut cursor);
        let file_options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for item in items {
            zip.start_file(item.filename.as_str(), file_options)?;
            zip.write_all(&item.bytes)?;
        }
        zip.finish()?;
    }
    Ok(cursor.into_inner())
}
