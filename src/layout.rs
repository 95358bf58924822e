//! Print layout engine: tile exported images onto fixed-size sheets.
//!
//! The grid is greedy and deterministic: grow the per-row count while the
//! cumulative scaled width (plus inter-image spacing) fits the page, grow
//! the row count the same way against the page height, then
//! `pages = ceil(items / per_page)` floored at one. Items are assumed
//! uniformly sized — the first item seeds the cell size.
//!
//! [`generate_sheets`] composites the actual pages: margins are subtracted
//! from the usable area, items are partitioned page → row → column by
//! index, and each page becomes one PNG sheet. No sheet is emitted for
//! trailing empty pages.

use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use thiserror::Error;
use tracing::debug;

use crate::export::ExportItem;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("item {0} has no dimensions")]
    MissingDimensions(String),
    #[error("decode failed for {filename}: {message}")]
    Decode { filename: String, message: String },
    #[error("encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Target sheet geometry in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSize {
    pub width: u32,
    pub height: u32,
}

impl PageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Named page presets (`<paper>-<dpi>`).
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "a4-150" => Some(Self::new(1240, 1754)),
            "a4-300" => Some(Self::new(2480, 3508)),
            "letter-300" => Some(Self::new(2550, 3300)),
            _ => None,
        }
    }
}

/// Result of the grid computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetLayout {
    pub per_row: usize,
    pub rows_per_page: usize,
    pub pages: usize,
}

impl SheetLayout {
    pub fn per_page(&self) -> usize {
        self.per_row * self.rows_per_page
    }
}

/// How many cells of `cell` width fit into `available` with `spacing`
/// between them. Never less than one.
fn fit_count(cell: f32, spacing: f32, available: f32) -> usize {
    if cell <= 0.0 {
        return 1;
    }
    let mut count = 0;
    loop {
        let next = count + 1;
        let needed = next as f32 * cell + (next - 1) as f32 * spacing;
        if needed <= available {
            count = next;
        } else {
            break;
        }
    }
    count.max(1)
}

/// Compute the deterministic grid for `items` on `page`.
pub fn compute_layout(
    items: &[ExportItem],
    page: PageSize,
    spacing: f32,
    scale: f32,
) -> Result<SheetLayout, LayoutError> {
    let Some(first) = items.first() else {
        return Ok(SheetLayout { per_row: 0, rows_per_page: 0, pages: 1 });
    };
    let (cell_w, cell_h) = item_cell(first, scale)?;

    let per_row = fit_count(cell_w, spacing, page.width as f32);
    let rows_per_page = fit_count(cell_h, spacing, page.height as f32);
    let per_page = per_row * rows_per_page;
    let pages = items.len().div_ceil(per_page).max(1);

    Ok(SheetLayout { per_row, rows_per_page, pages })
}

fn item_cell(item: &ExportItem, scale: f32) -> Result<(f32, f32), LayoutError> {
    let (Some(width), Some(height)) = (item.width, item.height) else {
        return Err(LayoutError::MissingDimensions(item.filename.clone()));
    };
    Ok((width as f32 * scale, height as f32 * scale))
}

/// Composite print-ready sheets, one [`ExportItem`] per page.
///
/// Zero input items produce zero sheets, not a single blank page.
pub fn generate_sheets(
    items: &[ExportItem],
    page: PageSize,
    margin: f32,
    spacing: f32,
    scale: f32,
    outline: bool,
) -> Result<Vec<ExportItem>, LayoutError> {
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let usable = PageSize::new(
        (page.width as f32 - 2.0 * margin).max(0.0) as u32,
        (page.height as f32 - 2.0 * margin).max(0.0) as u32,
    );
    let layout = compute_layout(items, usable, spacing, scale)?;
    let (cell_w, cell_h) = item_cell(&items[0], scale)?;
    debug!(
        per_row = layout.per_row,
        rows = layout.rows_per_page,
        pages = layout.pages,
        "sheet layout computed"
    );

    let mut sheets = Vec::new();
    for (page_index, chunk) in items.chunks(layout.per_page()).enumerate() {
        let mut canvas = RgbaImage::from_pixel(
            page.width.max(1),
            page.height.max(1),
            Rgba([255, 255, 255, 255]),
        );

        for (slot, item) in chunk.iter().enumerate() {
            let row = slot / layout.per_row;
            let col = slot % layout.per_row;
            let x = margin + col as f32 * (cell_w + spacing);
            let y = margin + row as f32 * (cell_h + spacing);

            let decoded = image::load_from_memory(&item.bytes)
                .map_err(|e| LayoutError::Decode {
                    filename: item.filename.clone(),
                    message: e.to_string(),
                })?
                .to_rgba8();
            let target_w = (cell_w.round() as u32).max(1);
            let target_h = (cell_h.round() as u32).max(1);
            let placed = if decoded.dimensions() == (target_w, target_h) {
                decoded
            } else {
                image::imageops::resize(&decoded, target_w, target_h, FilterType::Lanczos3)
            };
            image::imageops::overlay(&mut canvas, &placed, x.round() as i64, y.round() as i64);

            if outline {
                draw_outline(
                    &mut canvas,
                    x.round() as i64,
                    y.round() as i64,
                    target_w,
                    target_h,
                );
            }
        }

        let mut cursor = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(canvas).write_to(&mut cursor, image::ImageFormat::Png)?;
        sheets.push(ExportItem {
            filename: format!("sheet-{:03}.png", page_index + 1),
            bytes: cursor.into_inner(),
            width: Some(page.width),
            height: Some(page.height),
        });
    }
    Ok(sheets)
}

/// One-pixel cutting guide around a placed cell.
fn draw_outline(canvas: &mut RgbaImage, x: i64, y: i64, w: u32, h: u32) {
    let color = Rgba([190, 190, 190, 255]);
    let (cw, ch) = (canvas.width() as i64, canvas.height() as i64);
    let mut put = |px: i64, py: i64| {
        if px >= 0 && py >= 0 && px < cw && py < ch {
            canvas.put_pixel(px as u32, py as u32, color);
        }
    };
    for dx in 0..w as i64 {
        put(x + dx, y);
        put(x + dx, y + h as i64 - 1);
    }
    for dy in 0..h as i64 {
        put(x, y + dy);
        put(x + w as i64 - 1, y + dy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_item(name: &str, width: u32, height: u32, rgb: [u8; 3]) -> ExportItem {
        let img = RgbaImage::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255]));
        let mut cursor = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut cursor, image::ImageFormat::Png)
            .unwrap();
        ExportItem {
            filename: name.to_string(),
            bytes: cursor.into_inner(),
            width: Some(width),
            height: Some(height),
        }
    }

    fn dimensionless(name: &str) -> ExportItem {
        ExportItem {
            filename: name.to_string(),
            bytes: Vec::new(),
            width: None,
            height: None,
        }
    }

    // =========================================================================
    // Grid computation
    // =========================================================================

    #[test]
    fn layout_is_deterministic() {
        // 1000x1000 page, 300x300 items, no spacing: 3 per row, 3 rows,
        // 10 items → 2 pages.
        let items: Vec<ExportItem> = (0..10)
            .map(|i| solid_item(&format!("{i}.png"), 300, 300, [10, 20, 30]))
            .collect();
        let layout =
            compute_layout(&items, PageSize::new(1000, 1000), 0.0, 1.0).unwrap();
        assert_eq!(layout.per_row, 3);
        assert_eq!(layout.rows_per_page, 3);
        assert_eq!(layout.pages, 2);
    }

    #[test]
    fn spacing_reduces_fit() {
        // 3 * 300 = 900 fits, but 900 + 2 * 60 = 1020 does not.
        let items = vec![solid_item("a.png", 300, 300, [0, 0, 0])];
        let layout =
            compute_layout(&items, PageSize::new(1000, 1000), 60.0, 1.0).unwrap();
        assert_eq!(layout.per_row, 2);
    }

    #[test]
    fn scale_changes_cell_size() {
        let items = vec![solid_item("a.png", 300, 300, [0, 0, 0])];
        let layout =
            compute_layout(&items, PageSize::new(1000, 1000), 0.0, 0.5).unwrap();
        assert_eq!(layout.per_row, 6);
    }

    #[test]
    fn oversized_item_still_gets_one_cell() {
        let items = vec![solid_item("big.png", 1500, 1500, [0, 0, 0])];
        let layout =
            compute_layout(&items, PageSize::new(1000, 1000), 0.0, 1.0).unwrap();
        assert_eq!(layout.per_row, 1);
        assert_eq!(layout.rows_per_page, 1);
        assert_eq!(layout.pages, 1);
    }

    #[test]
    fn pages_floored_at_one() {
        let items = vec![solid_item("a.png", 10, 10, [0, 0, 0])];
        let layout =
            compute_layout(&items, PageSize::new(1000, 1000), 0.0, 1.0).unwrap();
        assert_eq!(layout.pages, 1);
    }

    #[test]
    fn missing_dimensions_is_an_error() {
        let items = vec![dimensionless("a.png")];
        assert!(matches!(
            compute_layout(&items, PageSize::new(1000, 1000), 0.0, 1.0),
            Err(LayoutError::MissingDimensions(name)) if name == "a.png"
        ));
    }

    // =========================================================================
    // Sheet compositing
    // =========================================================================

    #[test]
    fn zero_items_produce_zero_sheets() {
        let sheets =
            generate_sheets(&[], PageSize::new(1000, 1000), 0.0, 0.0, 1.0, false).unwrap();
        assert!(sheets.is_empty());
    }

    #[test]
    fn ten_items_fill_two_sheets() {
        let items: Vec<ExportItem> = (0..10)
            .map(|i| solid_item(&format!("{i}.png"), 300, 300, [200, 40, 40]))
            .collect();
        let sheets =
            generate_sheets(&items, PageSize::new(1000, 1000), 0.0, 0.0, 1.0, false).unwrap();

        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].filename, "sheet-001.png");
        assert_eq!(sheets[0].width, Some(1000));

        // First sheet: item color at a cell, white in the dead zone.
        let first = image::load_from_memory(&sheets[0].bytes).unwrap().to_rgba8();
        assert_eq!(first.dimensions(), (1000, 1000));
        assert_eq!(first.get_pixel(10, 10), &Rgba([200, 40, 40, 255]));
        assert_eq!(first.get_pixel(950, 950), &Rgba([255, 255, 255, 255]));

        // Second sheet holds the one remaining item.
        let second = image::load_from_memory(&sheets[1].bytes).unwrap().to_rgba8();
        assert_eq!(second.get_pixel(10, 10), &Rgba([200, 40, 40, 255]));
        assert_eq!(second.get_pixel(400, 10), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn margin_insets_placement() {
        let items = vec![solid_item("a.png", 300, 300, [0, 120, 0])];
        let sheets =
            generate_sheets(&items, PageSize::new(1000, 1000), 50.0, 0.0, 1.0, false).unwrap();

        let sheet = image::load_from_memory(&sheets[0].bytes).unwrap().to_rgba8();
        assert_eq!(sheet.get_pixel(10, 10), &Rgba([255, 255, 255, 255]));
        assert_eq!(sheet.get_pixel(60, 60), &Rgba([0, 120, 0, 255]));
    }

    #[test]
    fn outline_draws_cell_border() {
        let items = vec![solid_item("a.png", 300, 300, [0, 0, 200])];
        let sheets =
            generate_sheets(&items, PageSize::new(1000, 1000), 0.0, 0.0, 1.0, true).unwrap();

        let sheet = image::load_from_memory(&sheets[0].bytes).unwrap().to_rgba8();
        assert_eq!(sheet.get_pixel(0, 0), &Rgba([190, 190, 190, 255]));
        assert_eq!(sheet.get_pixel(150, 299), &Rgba([190, 190, 190, 255]));
        assert_eq!(sheet.get_pixel(150, 150), &Rgba([0, 0, 200, 255]));
    }

    #[test]
    fn page_presets_known_and_unknown() {
        assert_eq!(PageSize::preset("a4-300"), Some(PageSize::new(2480, 3508)));
        assert!(PageSize::preset("a2-600").is_none());
    }
}
