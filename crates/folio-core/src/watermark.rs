//! # Watermark Layout
//!
//! Page geometry for the personalized marks stamped on every download.
//! The PDF plumbing lives in folio-service; this module only decides
//! where the text goes and how big it is.
//!
//! ## Layout
//! ```text
//! ┌───────────────────────────────────────┐
//! │ name <email>             name <email> │ ◄── corner marks (8pt × scale)
//! │                                ╱      │
//! │                         ╱             │
//! │               name <email>            │ ◄── centre mark (42pt × scale),
//! │             ╱                         │     rotated along the diagonal
//! │      ╱                                │
//! │ name <email>             name <email> │
//! └───────────────────────────────────────┘
//!
//! scale = sqrt(page_area / (595 × 842)), clamped to [0.5, 2.0]
//! ```

use serde::{Deserialize, Serialize};

/// Width of the reference page in PDF points (A4).
pub const REFERENCE_WIDTH: f32 = 595.0;
/// Height of the reference page in PDF points (A4).
pub const REFERENCE_HEIGHT: f32 = 842.0;
/// Centre mark font size on the reference page.
pub const CENTER_FONT_SIZE: f32 = 42.0;
/// Corner mark font size on the reference page.
pub const CORNER_FONT_SIZE: f32 = 8.0;
/// Corner mark distance from the page edge on the reference page.
pub const CORNER_MARGIN: f32 = 18.0;
pub const MIN_SCALE: f32 = 0.5;
pub const MAX_SCALE: f32 = 2.0;
/// Fill opacity of all marks.
pub const MARK_OPACITY: f32 = 0.18;

/// Average Helvetica glyph advance as a fraction of the font size.
const AVG_GLYPH_WIDTH: f32 = 0.5;
/// The centre mark may use at most this fraction of the page diagonal.
const MAX_DIAGONAL_FILL: f32 = 0.8;
const MAX_MARK_CHARS: usize = 120;

// =============================================================================
// Page Geometry
// =============================================================================

/// A page's MediaBox in PDF user space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl PageBox {
    /// Builds a box from the four MediaBox numbers, in any corner order.
    pub fn from_media_box(values: [f32; 4]) -> Self {
        PageBox {
            x0: values[0].min(values[2]),
            y0: values[1].min(values[3]),
            x1: values[0].max(values[2]),
            y1: values[1].max(values[3]),
        }
    }

    /// The reference A4 page.
    pub fn a4() -> Self {
        PageBox::from_media_box([0.0, 0.0, REFERENCE_WIDTH, REFERENCE_HEIGHT])
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Degenerate boxes (zero or negative area) cannot be stamped.
    pub fn is_usable(&self) -> bool {
        self.width() > 0.0 && self.height() > 0.0 && self.width().is_finite() && self.height().is_finite()
    }
}

/// Mark scale for a page: `sqrt(area / reference_area)`, clamped.
pub fn scale_for(page: &PageBox) -> f32 {
    let area = page.width() * page.height();
    let reference = REFERENCE_WIDTH * REFERENCE_HEIGHT;
    (area / reference).sqrt().clamp(MIN_SCALE, MAX_SCALE)
}

/// Approximate rendered width of `text` in Helvetica.
pub fn estimate_width(text: &str, font_size: f32) -> f32 {
    text.chars().count() as f32 * font_size * AVG_GLYPH_WIDTH
}

// =============================================================================
// Layout
// =============================================================================

/// One piece of text and its text matrix (`a b c d e f Tm`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPlacement {
    pub font_size: f32,
    pub matrix: [f32; 6],
}

/// All marks for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    pub scale: f32,
    pub opacity: f32,
    pub center: TextPlacement,
    pub corners: Vec<TextPlacement>,
}

/// Computes the marks for `page` carrying `text`.
pub fn layout(page: &PageBox, text: &str) -> PageLayout {
    let scale = scale_for(page);
    let (w, h) = (page.width(), page.height());
    let (cx, cy) = (page.x0 + w / 2.0, page.y0 + h / 2.0);

    // Centre mark runs along the diagonal, shrunk if the text is too long
    let diagonal = (w * w + h * h).sqrt();
    let chars = text.chars().count().max(1) as f32;
    let fit = MAX_DIAGONAL_FILL * diagonal / (chars * AVG_GLYPH_WIDTH);
    let center_size = (CENTER_FONT_SIZE * scale).min(fit);

    let angle = h.atan2(w);
    let (sin, cos) = angle.sin_cos();
    let half_width = estimate_width(text, center_size) / 2.0;
    let baseline_drop = center_size * 0.35;

    let center = TextPlacement {
        font_size: center_size,
        matrix: [
            cos,
            sin,
            -sin,
            cos,
            cx - cos * half_width + sin * baseline_drop,
            cy - sin * half_width - cos * baseline_drop,
        ],
    };

    let corner_size = CORNER_FONT_SIZE * scale;
    let margin = CORNER_MARGIN * scale;
    let corner_width = estimate_width(text, corner_size);
    let left = page.x0 + margin;
    let right = (page.x1 - margin - corner_width).max(left);
    let bottom = page.y0 + margin;
    let top = (page.y1 - margin - corner_size).max(bottom);

    let corners = [(left, top), (right, top), (left, bottom), (right, bottom)]
        .into_iter()
        .map(|(x, y)| TextPlacement {
            font_size: corner_size,
            matrix: [1.0, 0.0, 0.0, 1.0, x, y],
        })
        .collect();

    PageLayout {
        scale,
        opacity: MARK_OPACITY,
        center,
        corners,
    }
}

// =============================================================================
// Mark Text
// =============================================================================

/// Builds the mark text `name <email>` for a buyer.
///
/// Characters outside printable ASCII become `?`, since the standard
/// Helvetica font only covers WinAnsi. Long marks are truncated.
pub fn mark_text(display_name: &str, email: &str) -> String {
    let raw = match (display_name.trim(), email.trim()) {
        ("", email) => email.to_string(),
        (name, "") => name.to_string(),
        (name, email) => format!("{} <{}>", name, email),
    };

    raw.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .take(MAX_MARK_CHARS)
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn test_scale_reference_and_clamps() {
        assert!(close(scale_for(&PageBox::a4()), 1.0));

        let letter = PageBox::from_media_box([0.0, 0.0, 612.0, 792.0]);
        assert!(close(scale_for(&letter), 0.9836));

        let stamp = PageBox::from_media_box([0.0, 0.0, 100.0, 100.0]);
        assert!(close(scale_for(&stamp), MIN_SCALE));

        let poster = PageBox::from_media_box([0.0, 0.0, 2384.0, 3370.0]);
        assert!(close(scale_for(&poster), MAX_SCALE));
    }

    #[test]
    fn test_media_box_normalization() {
        let flipped = PageBox::from_media_box([595.0, 842.0, 0.0, 0.0]);
        assert_eq!(flipped, PageBox::a4());
        assert!(!PageBox::from_media_box([0.0, 0.0, 0.0, 842.0]).is_usable());
    }

    #[test]
    fn test_center_mark_is_centered() {
        let page = PageBox::from_media_box([10.0, 20.0, 605.0, 862.0]);
        let text = "Somchai Jaidee <somchai@example.test>";
        let placed = layout(&page, text);

        let [cos, sin, _, _, tx, ty] = placed.center.matrix;
        let half = estimate_width(text, placed.center.font_size) / 2.0;
        let drop = placed.center.font_size * 0.35;

        // Walk from the origin to the text midpoint in the rotated frame
        let mid_x = tx + cos * half - sin * drop;
        let mid_y = ty + sin * half + cos * drop;
        assert!(close(mid_x, 307.5));
        assert!(close(mid_y, 441.0));
    }

    #[test]
    fn test_long_text_shrinks_to_fit() {
        let page = PageBox::a4();
        let long = "x".repeat(120);
        let placed = layout(&page, &long);
        let diagonal = (595.0f32 * 595.0 + 842.0 * 842.0).sqrt();

        assert!(placed.center.font_size < CENTER_FONT_SIZE);
        assert!(estimate_width(&long, placed.center.font_size) <= diagonal * 0.8 + 0.01);
    }

    #[test]
    fn test_corners_stay_on_page() {
        let page = PageBox::from_media_box([0.0, 0.0, 300.0, 400.0]);
        let text = "Ann <ann@example.test>";
        let placed = layout(&page, text);

        assert_eq!(placed.corners.len(), 4);
        for corner in &placed.corners {
            let [_, _, _, _, x, y] = corner.matrix;
            assert!(x >= 0.0 && x + estimate_width(text, corner.font_size) <= 300.0);
            assert!(y >= 0.0 && y + corner.font_size <= 400.0);
        }
    }

    #[test]
    fn test_mark_text_sanitized() {
        assert_eq!(mark_text("Ann", "ann@example.test"), "Ann <ann@example.test>");
        assert_eq!(mark_text("สมชาย", "s@example.test"), "????? <s@example.test>");
        assert_eq!(mark_text("", "only@example.test"), "only@example.test");
        assert_eq!(mark_text("Tab\tName", ""), "Tab?Name");
        assert_eq!(mark_text(&"a".repeat(500), "e").len(), 120);
    }
}
