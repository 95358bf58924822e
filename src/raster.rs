//! Rasterization backend: trait boundary plus the software compositor.
//!
//! The renderer drives a [`Rasterizer`] for everything pixel-shaped —
//! decoding asset bytes, measuring text, flattening the scene into an
//! `RgbaImage`, and encoding output blobs. Keeping the pixel work behind a
//! trait lets the renderer's state machine be tested with a recording mock
//! (see [`tests::MockRasterizer`]) and leaves room for other backends.
//!
//! [`SoftwareRasterizer`] is the production implementation: pure Rust,
//! `image` for decode/composite/encode and `ab_glyph` for glyphs. It owns
//! the session's [`FontLibrary`] — caches live on the backend instance,
//! not in globals.

use std::io::Cursor;

use ab_glyph::{Font, PxScale, ScaleFont};
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::content::ContentStore;
use crate::fonts::{self, FontLibrary, FontReadiness};
use crate::scene::{Layer, Node, NodeKind};
use crate::template::{Align, BlendMode, Color, TextStyle};

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Output encodings the engine produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

/// Quality setting for lossy encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// The drawing backend the renderer depends on.
pub trait Rasterizer {
    /// Decode raw asset bytes into a bitmap.
    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, RasterError>;

    /// Make the style's font variant usable (loading it if possible).
    fn ensure_font(&self, style: &TextStyle, store: &ContentStore) -> FontReadiness;

    /// Advance width of a single line, or `None` when no face is
    /// available at all (text becomes a no-op).
    fn measure(&self, text: &str, style: &TextStyle) -> Option<f32>;

    /// Baseline-to-baseline distance for the style.
    fn line_height(&self, style: &TextStyle) -> Option<f32>;

    /// Flatten the scene into pixels.
    fn render(&self, layer: &Layer) -> Result<RgbaImage, RasterError>;

    /// Encode a bitmap into an output blob.
    fn encode(
        &self,
        image: &RgbaImage,
        format: OutputFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, RasterError>;
}

/// Greedy word wrap against a measured width.
///
/// Explicit newlines are respected; a single word wider than `max_width`
/// gets its own line and is never split mid-word.
pub fn wrap_lines(text: &str, max_width: f32, measure: impl Fn(&str) -> f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if current.is_empty() {
                current = word.to_string();
                continue;
            }
            let candidate = format!("{current} {word}");
            if measure(&candidate) <= max_width {
                current = candidate;
            } else {
                lines.push(current);
                current = word.to_string();
            }
        }
        lines.push(current);
    }
    if lines.is_empty() && !text.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Pure-Rust software compositor.
pub struct SoftwareRasterizer {
    fonts: FontLibrary,
}

impl SoftwareRasterizer {
    pub fn new(fonts: FontLibrary) -> Self {
        Self { fonts }
    }

    pub fn fonts(&self) -> &FontLibrary {
        &self.fonts
    }

    fn paint_nodes(&self, canvas: &mut RgbaImage, nodes: &[Node], ox: f32, oy: f32) {
        for node in nodes {
            let x = ox + node.x;
            let y = oy + node.y;
            match &node.kind {
                NodeKind::Group => {
                    self.paint_nodes(canvas, &node.children, x, y);
                }
                NodeKind::Rect { fill } => {
                    fill_rect(canvas, x, y, node.width, node.height, *fill, node.blend);
                }
                NodeKind::Image { bitmap, cover, .. } => {
                    if let Some(bitmap) = bitmap {
                        blit(
                            canvas,
                            bitmap,
                            x,
                            y,
                            node.width,
                            node.height,
                            *cover,
                            node.blend,
                        );
                    }
                }
                NodeKind::Text { text, style, .. } => {
                    self.paint_text(canvas, text, style, x, y, node.width, node.height, node.blend);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn paint_text(
        &self,
        canvas: &mut RgbaImage,
        text: &str,
        style: &TextStyle,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        blend: BlendMode,
    ) {
        let Some(face) = self
            .fonts
            .face_for(&style.family, style.weight, style.italic)
        else {
            // No face anywhere: proceed without the text.
            return;
        };
        let scale = PxScale::from(style.size);
        let scaled = face.as_scaled(scale);
        let line_h = fonts::line_height(&face, style.size);
        let lines = wrap_lines(text, width, |s| fonts::measure_line(&face, s, style.size));

        for (index, line) in lines.iter().enumerate() {
            // Clip lines that fall outside the box.
            if (index as f32) * line_h + scaled.height() > height + 0.5 {
                break;
            }
            let line_width = fonts::measure_line(&face, line, style.size);
            let line_x = match style.align {
                Align::Left => x,
                Align::Center => x + (width - line_width) / 2.0,
                Align::Right => x + width - line_width,
            };
            let baseline = y + scaled.ascent() + index as f32 * line_h;

            let mut caret = line_x;
            let mut prev = None;
            for ch in line.chars() {
                let id = face.glyph_id(ch);
                if let Some(prev_id) = prev {
                    caret += scaled.kern(prev_id, id);
                }
                let glyph = id.with_scale_and_position(scale, ab_glyph::point(caret, baseline));
                if let Some(outlined) = face.outline_glyph(glyph) {
                    let bounds = outlined.px_bounds();
                    outlined.draw(|gx, gy, coverage| {
                        let px = bounds.min.x as i32 + gx as i32;
                        let py = bounds.min.y as i32 + gy as i32;
                        if px < 0 || py < 0 {
                            return;
                        }
                        let (px, py) = (px as u32, py as u32);
                        if px >= canvas.width() || py >= canvas.height() {
                            return;
                        }
                        let alpha = (coverage.clamp(0.0, 1.0) * style.color.a as f32) as u8;
                        let src = Rgba([style.color.r, style.color.g, style.color.b, alpha]);
                        composite_pixel(canvas.get_pixel_mut(px, py), src, blend);
                    });
                }
                caret += scaled.h_advance(id);
                prev = Some(id);
            }
        }
    }
}

impl Rasterizer for SoftwareRasterizer {
    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, RasterError> {
        image::load_from_memory(bytes)
            .map(|img| img.to_rgba8())
            .map_err(|e| RasterError::Decode(e.to_string()))
    }

    fn ensure_font(&self, style: &TextStyle, store: &ContentStore) -> FontReadiness {
        self.fonts
            .ensure(&style.family, style.weight, style.italic, store)
    }

    fn measure(&self, text: &str, style: &TextStyle) -> Option<f32> {
        let face = self
            .fonts
            .face_for(&style.family, style.weight, style.italic)?;
        Some(fonts::measure_line(&face, text, style.size))
    }

    fn line_height(&self, style: &TextStyle) -> Option<f32> {
        let face = self
            .fonts
            .face_for(&style.family, style.weight, style.italic)?;
        Some(fonts::line_height(&face, style.size))
    }

    fn render(&self, layer: &Layer) -> Result<RgbaImage, RasterError> {
        let mut canvas = RgbaImage::new(layer.width.max(1), layer.height.max(1));
        self.paint_nodes(&mut canvas, &layer.nodes, 0.0, 0.0);
        Ok(canvas)
    }

    fn encode(
        &self,
        image: &RgbaImage,
        format: OutputFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, RasterError> {
        let mut cursor = Cursor::new(Vec::new());
        match format {
            OutputFormat::Png => {
                image::DynamicImage::ImageRgba8(image.clone())
                    .write_to(&mut cursor, image::ImageFormat::Png)?;
            }
            OutputFormat::Jpeg => {
                // JPEG carries no alpha; flatten first.
                let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
                let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                    &mut cursor,
                    quality.value() as u8,
                );
                rgb.write_with_encoder(encoder)?;
            }
        }
        Ok(cursor.into_inner())
    }
}

/// Source-over compositing with the element's blend mode applied to the
/// color channels.
fn composite_pixel(dst: &mut Rgba<u8>, src: Rgba<u8>, mode: BlendMode) {
    let src_a = src[3] as f32 / 255.0;
    if src_a <= 0.0 {
        return;
    }
    for channel in 0..3 {
        let s = src[channel] as f32;
        let d = dst[channel] as f32;
        let blended = match mode {
            BlendMode::Normal => s,
            BlendMode::Multiply => s * d / 255.0,
            BlendMode::Screen => 255.0 - (255.0 - s) * (255.0 - d) / 255.0,
        };
        dst[channel] = (blended * src_a + d * (1.0 - src_a)).round() as u8;
    }
    let dst_a = dst[3] as f32 / 255.0;
    dst[3] = ((src_a + dst_a * (1.0 - src_a)) * 255.0).round() as u8;
}

fn fill_rect(canvas: &mut RgbaImage, x: f32, y: f32, w: f32, h: f32, color: Color, mode: BlendMode) {
    let src = Rgba([color.r, color.g, color.b, color.a]);
    let x0 = x.round().max(0.0) as u32;
    let y0 = y.round().max(0.0) as u32;
    let x1 = ((x + w).round().max(0.0) as u32).min(canvas.width());
    let y1 = ((y + h).round().max(0.0) as u32).min(canvas.height());
    for py in y0..y1 {
        for px in x0..x1 {
            composite_pixel(canvas.get_pixel_mut(px, py), src, mode);
        }
    }
}

/// Place a bitmap into the node's box: stretched like a native image
/// primitive, or scaled-to-cover (and center-cropped) for pattern-fill
/// shapes.
#[allow(clippy::too_many_arguments)]
fn blit(
    canvas: &mut RgbaImage,
    bitmap: &RgbaImage,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    cover: bool,
    mode: BlendMode,
) {
    let target_w = (w.round() as u32).max(1);
    let target_h = (h.round() as u32).max(1);
    let prepared = if cover {
        let (bw, bh) = (bitmap.width() as f32, bitmap.height() as f32);
        let scale = (target_w as f32 / bw).max(target_h as f32 / bh);
        let scaled_w = ((bw * scale).round() as u32).max(target_w);
        let scaled_h = ((bh * scale).round() as u32).max(target_h);
        let resized = image::imageops::resize(bitmap, scaled_w, scaled_h, FilterType::Lanczos3);
        let crop_x = (scaled_w - target_w) / 2;
        let crop_y = (scaled_h - target_h) / 2;
        image::imageops::crop_imm(&resized, crop_x, crop_y, target_w, target_h).to_image()
    } else {
        image::imageops::resize(bitmap, target_w, target_h, FilterType::Lanczos3)
    };

    let x0 = x.round() as i64;
    let y0 = y.round() as i64;
    for (sx, sy, pixel) in prepared.enumerate_pixels() {
        let px = x0 + sx as i64;
        let py = y0 + sy as i64;
        if px < 0 || py < 0 || px >= canvas.width() as i64 || py >= canvas.height() as i64 {
            continue;
        }
        composite_pixel(canvas.get_pixel_mut(px as u32, py as u32), *pixel, mode);
    }
}
