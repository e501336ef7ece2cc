//! Result types: layout cells and per-page records.
//!
//! Everything here is plain data. Construction happens in
//! [`crate::pipeline::parse`] (cells) and [`crate::pipeline::assemble`]
//! (pages); after that nothing mutates these values.

use crate::error::PageError;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Category ─────────────────────────────────────────────────────────────

/// Layout category predicted by the model.
///
/// Serialised with the model's own spelling (`"Section-header"`,
/// `"Page-footer"`, …). Strings outside the vocabulary deserialise to
/// [`Category::Unknown`] instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum Category {
    Text,
    Title,
    Table,
    Picture,
    Formula,
    SectionHeader,
    ListItem,
    Caption,
    Footnote,
    PageHeader,
    PageFooter,
    Other,
    Unknown,
}

impl Category {
    /// The model's spelling of this category.
    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Text => "Text",
            Category::Title => "Title",
            Category::Table => "Table",
            Category::Picture => "Picture",
            Category::Formula => "Formula",
            Category::SectionHeader => "Section-header",
            Category::ListItem => "List-item",
            Category::Caption => "Caption",
            Category::Footnote => "Footnote",
            Category::PageHeader => "Page-header",
            Category::PageFooter => "Page-footer",
            Category::Other => "Other",
            Category::Unknown => "Unknown",
        }
    }

    /// Parse a model category label; never fails.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "Text" => Category::Text,
            "Title" => Category::Title,
            "Table" => Category::Table,
            "Picture" => Category::Picture,
            "Formula" => Category::Formula,
            "Section-header" => Category::SectionHeader,
            "List-item" => Category::ListItem,
            "Caption" => Category::Caption,
            "Footnote" => Category::Footnote,
            "Page-header" => Category::PageHeader,
            "Page-footer" => Category::PageFooter,
            "Other" => Category::Other,
            _ => Category::Unknown,
        }
    }

    /// Page-header and Page-footer: excluded from `md_content_no_hf`.
    pub const fn is_page_furniture(self) -> bool {
        matches!(self, Category::PageHeader | Category::PageFooter)
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        Category::from_label(&s)
    }
}

impl From<Category> for &'static str {
    fn from(c: Category) -> Self {
        c.as_str()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Geometry ─────────────────────────────────────────────────────────────

/// Bounding box `[x1, y1, x2, y2]` in original-image pixels.
///
/// Always `x1 <= x2` and `y1 <= y2`. Equality is possible: a model box lying
/// wholly outside the page clamps to a zero-area box on the page edge, which
/// is kept so the cell's category and text are not lost (see
/// [`BBox::is_empty`]). Serialised as a plain four-element array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BBox(pub [u32; 4]);

impl BBox {
    pub fn x1(&self) -> u32 {
        self.0[0]
    }
    pub fn y1(&self) -> u32 {
        self.0[1]
    }
    pub fn x2(&self) -> u32 {
        self.0[2]
    }
    pub fn y2(&self) -> u32 {
        self.0[3]
    }
    pub fn width(&self) -> u32 {
        self.x2().saturating_sub(self.x1())
    }
    pub fn height(&self) -> u32 {
        self.y2().saturating_sub(self.y1())
    }
    /// Zero width or zero height. Not drawn and never cropped.
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// The two coordinate spaces of one page.
///
/// `image_*` is the original page image (the space cells are reported in);
/// `model_*` is what the server actually feeds the model after its own
/// resize (the space raw model boxes are expressed in).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    pub image_width: u32,
    pub image_height: u32,
    pub model_width: u32,
    pub model_height: u32,
}

// ── Cell ─────────────────────────────────────────────────────────────────

/// One detected layout element.
///
/// The box may be zero-area after clamping; check [`BBox::is_empty`] before
/// cropping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    bbox: BBox,
    category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

impl Cell {
    /// Build a cell. Text attached to a [`Category::Picture`] is dropped.
    pub fn new(bbox: BBox, category: Category, text: Option<String>) -> Self {
        let text = if category == Category::Picture {
            None
        } else {
            text
        };
        Self {
            bbox,
            category,
            text,
        }
    }

    pub fn bbox(&self) -> BBox {
        self.bbox
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

// ── Page ─────────────────────────────────────────────────────────────────

/// Result for a single page of the input.
///
/// Failed pages keep their slot: `cells` is empty, the Markdown fields are
/// empty and `error` says what went wrong.
#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    /// 0-indexed page number.
    pub page_no: usize,
    /// The input path or URL as given by the caller.
    pub file_path: String,
    /// Width of the original page image; cells are in this space.
    pub input_width: u32,
    /// Height of the original page image.
    pub input_height: u32,
    /// Width of the image as the model saw it.
    pub model_width: u32,
    /// Height of the image as the model saw it.
    pub model_height: u32,
    /// Layout cells in the model's reading order.
    pub cells: Vec<Cell>,
    /// Page image with cell boxes drawn on it. `None` for text-only prompt
    /// modes and failed pages.
    #[serde(skip)]
    pub image_with_layout: Option<RgbImage>,
    /// Markdown for the whole page.
    pub md_content: String,
    /// Markdown without Page-header / Page-footer cells.
    pub md_content_no_hf: String,
    /// Raw model text, kept for text-only prompt modes and for responses
    /// that could not be parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Set when this page failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
}

impl PageResult {
    /// A page that failed; sibling pages are unaffected.
    pub fn failed(
        page_no: usize,
        file_path: impl Into<String>,
        geometry: PageGeometry,
        error: PageError,
        response: Option<String>,
    ) -> Self {
        Self {
            page_no,
            file_path: file_path.into(),
            input_width: geometry.image_width,
            input_height: geometry.image_height,
            model_width: geometry.model_width,
            model_height: geometry.model_height,
            cells: Vec::new(),
            image_with_layout: None,
            md_content: String::new(),
            md_content_no_hf: String::new(),
            response,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_model_spelling() {
        for c in [
            Category::Text,
            Category::SectionHeader,
            Category::ListItem,
            Category::PageHeader,
            Category::PageFooter,
        ] {
            assert_eq!(Category::from_label(c.as_str()), c);
        }
    }

    #[test]
    fn unknown_label_coerces() {
        assert_eq!(Category::from_label("Chart"), Category::Unknown);
        let c: Category = serde_json::from_str("\"Marginalia\"").unwrap();
        assert_eq!(c, Category::Unknown);
    }

    #[test]
    fn category_serialises_with_hyphen() {
        let s = serde_json::to_string(&Category::SectionHeader).unwrap();
        assert_eq!(s, "\"Section-header\"");
    }

    #[test]
    fn picture_cell_has_no_text_key() {
        let cell = Cell::new(BBox([1, 2, 3, 4]), Category::Picture, Some("logo".into()));
        assert_eq!(cell.text(), None);
        let json = serde_json::to_value(&cell).unwrap();
        assert!(json.get("text").is_none(), "got: {json}");
        assert_eq!(json["bbox"], serde_json::json!([1, 2, 3, 4]));
    }

    #[test]
    fn failed_page_is_empty() {
        let geometry = PageGeometry {
            image_width: 200,
            image_height: 100,
            model_width: 196,
            model_height: 112,
        };
        let err = PageError::Backend {
            page: 1,
            retries: 0,
            detail: "HTTP 500".into(),
        };
        let page = PageResult::failed(1, "doc.pdf", geometry, err, None);
        assert!(!page.is_ok());
        assert!(page.cells.is_empty());
        assert_eq!(page.input_width, 200);
        assert!(page.md_content.is_empty());
    }
}
