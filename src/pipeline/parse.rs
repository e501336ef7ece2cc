//! Response parsing: raw model text → validated layout cells.
//!
//! The model answers free-form text that is *supposed* to be one JSON array
//! of `{bbox, category, text}` objects with boxes in model-input pixels. In
//! practice it is often wrapped in a Markdown fence, uses categories outside
//! the prompt's list, or emits an inverted or out-of-range box. Only two
//! things are fatal for a page: text that is not JSON, and JSON that is not
//! an array. Everything else is repaired element by element.

use crate::error::MalformedResponse;
use crate::output::{BBox, Category, Cell, PageGeometry};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?```$").unwrap());

/// Remove one surrounding Markdown code fence, if present.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    match RE_JSON_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim(),
        None => trimmed,
    }
}

#[derive(Debug, Deserialize)]
struct RawCell {
    bbox: [f64; 4],
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    text: Option<Value>,
}

/// Parse the model's answer into cells in original-image pixels.
///
/// Boxes are divided by `model / image` per axis, truncated toward zero,
/// un-inverted and clamped into `[0, image_width] × [0, image_height]`.
/// Output order is the array order.
pub fn parse_cells(raw: &str, geometry: PageGeometry) -> Result<Vec<Cell>, MalformedResponse> {
    let body = strip_code_fences(raw);
    let value: Value = serde_json::from_str(body).map_err(|e| MalformedResponse {
        detail: format!("not valid JSON: {e}"),
    })?;
    let Value::Array(items) = value else {
        return Err(MalformedResponse {
            detail: format!("top-level value is {}, expected an array", json_kind(&value)),
        });
    };

    let scale_x = geometry.model_width as f64 / geometry.image_width as f64;
    let scale_y = geometry.model_height as f64 / geometry.image_height as f64;

    let mut cells = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let raw_cell: RawCell = match serde_json::from_value(item) {
            Ok(c) => c,
            Err(e) => {
                warn!("Skipping layout element {}: {}", i, e);
                continue;
            }
        };

        let [x1, y1, x2, y2] = raw_cell.bbox;
        let (x1, x2) = ordered(
            denormalise(x1, scale_x, geometry.image_width),
            denormalise(x2, scale_x, geometry.image_width),
        );
        let (y1, y2) = ordered(
            denormalise(y1, scale_y, geometry.image_height),
            denormalise(y2, scale_y, geometry.image_height),
        );

        let category = raw_cell
            .category
            .as_deref()
            .map(Category::from_label)
            .unwrap_or(Category::Unknown);
        let text = match raw_cell.text {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };

        cells.push(Cell::new(BBox([x1, y1, x2, y2]), category, text));
    }

    debug!("Parsed {} layout cells", cells.len());
    Ok(cells)
}

fn denormalise(v: f64, scale: f64, limit: u32) -> u32 {
    let v = (v / scale).trunc();
    if v.is_nan() || v <= 0.0 {
        0
    } else if v >= limit as f64 {
        limit
    } else {
        v as u32
    }
}

fn ordered(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(iw: u32, ih: u32, mw: u32, mh: u32) -> PageGeometry {
        PageGeometry {
            image_width: iw,
            image_height: ih,
            model_width: mw,
            model_height: mh,
        }
    }

    #[test]
    fn fenced_json_is_rescaled_2x() {
        let raw = "```json\n[{\"bbox\":[0,0,50,50],\"category\":\"Title\",\"text\":\"Hi\"}]\n```";
        let cells = parse_cells(raw, geometry(100, 100, 50, 50)).unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].bbox(), BBox([0, 0, 100, 100]));
        assert_eq!(cells[0].category(), Category::Title);
        assert_eq!(cells[0].text(), Some("Hi"));
    }

    #[test]
    fn bare_fence_without_language() {
        let raw = "```\n[]\n```";
        assert!(parse_cells(raw, geometry(10, 10, 10, 10)).unwrap().is_empty());
    }

    #[test]
    fn strip_fences_leaves_plain_text() {
        assert_eq!(strip_code_fences("  [1, 2]\n"), "[1, 2]");
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = parse_cells("[{\"bbox\": [1,2", geometry(10, 10, 10, 10)).unwrap_err();
        assert!(err.detail.contains("not valid JSON"));
    }

    #[test]
    fn non_array_is_malformed() {
        let err = parse_cells("{\"cells\": []}", geometry(10, 10, 10, 10)).unwrap_err();
        assert!(err.detail.contains("an object"), "got: {}", err.detail);
    }

    #[test]
    fn unknown_category_is_coerced() {
        let raw = r#"[{"bbox":[1,1,5,5],"category":"Chart","text":"x"},{"bbox":[1,1,5,5]}]"#;
        let cells = parse_cells(raw, geometry(10, 10, 10, 10)).unwrap();
        assert_eq!(cells[0].category(), Category::Unknown);
        assert_eq!(cells[1].category(), Category::Unknown);
    }

    #[test]
    fn picture_text_is_dropped() {
        let raw = r#"[{"bbox":[1,1,5,5],"category":"Picture","text":"a chart of sales"}]"#;
        let cells = parse_cells(raw, geometry(10, 10, 10, 10)).unwrap();
        assert_eq!(cells[0].text(), None);
        let json = serde_json::to_value(&cells[0]).unwrap();
        assert!(json.as_object().unwrap().get("text").is_none());
    }

    #[test]
    fn boxes_are_clamped_into_the_image() {
        let raw = r#"[{"bbox":[-20,-5,400,900],"category":"Text","text":"a"},
                      {"bbox":[1e9,1e9,2e9,2e9],"category":"Text","text":"b"}]"#;
        let cells = parse_cells(raw, geometry(120, 80, 60, 40)).unwrap();
        for cell in &cells {
            let b = cell.bbox();
            assert!(b.x1() <= b.x2() && b.x2() <= 120);
            assert!(b.y1() <= b.y2() && b.y2() <= 80);
        }
        assert_eq!(cells[0].bbox(), BBox([0, 0, 120, 80]));
    }

    #[test]
    fn off_page_box_is_kept_with_zero_area() {
        let raw = r#"[{"bbox":[500,10,700,30],"category":"Footnote","text":"far right"}]"#;
        let cells = parse_cells(raw, geometry(100, 100, 100, 100)).unwrap();

        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].bbox(), BBox([100, 10, 100, 30]));
        assert!(cells[0].bbox().is_empty());
        assert_eq!(cells[0].text(), Some("far right"));
        assert!(!BBox([0, 0, 1, 1]).is_empty());
    }

    #[test]
    fn inverted_boxes_are_swapped() {
        let raw = r#"[{"bbox":[40,30,10,5],"category":"Text","text":"a"}]"#;
        let cells = parse_cells(raw, geometry(100, 100, 100, 100)).unwrap();
        assert_eq!(cells[0].bbox(), BBox([10, 5, 40, 30]));
    }

    #[test]
    fn non_uniform_scale_per_axis() {
        let raw = r#"[{"bbox":[28,56,56,112],"category":"Text","text":"a"}]"#;
        // width 2x, height 0.5x
        let cells = parse_cells(raw, geometry(200, 100, 100, 200)).unwrap();
        assert_eq!(cells[0].bbox(), BBox([56, 28, 112, 56]));
    }

    #[test]
    fn coordinates_truncate_toward_zero() {
        let raw = r#"[{"bbox":[10,10,20,20],"category":"Text","text":"a"}]"#;
        // 10 / (3/4) = 13.33
        let cells = parse_cells(raw, geometry(400, 400, 300, 300)).unwrap();
        assert_eq!(cells[0].bbox(), BBox([13, 13, 26, 26]));
    }

    #[test]
    fn bad_elements_are_skipped_order_is_kept() {
        let raw = r#"[
            {"bbox":[0,0,1,1],"category":"Title","text":"first"},
            "stray string",
            {"bbox":[0,0],"category":"Text","text":"short box"},
            {"bbox":[0,0,1,1],"category":"Text","text":"second"},
            {"bbox":[0,0,1,1],"category":"Table","text":{"html":"<table/>"}}
        ]"#;
        let cells = parse_cells(raw, geometry(10, 10, 10, 10)).unwrap();
        let texts: Vec<_> = cells.iter().map(|c| c.text()).collect();
        assert_eq!(texts, vec![Some("first"), Some("second"), None]);
    }

    #[test]
    fn float_coordinates_are_accepted() {
        let raw = r#"[{"bbox":[1.5,2.5,10.9,20.1],"category":"Text","text":"a"}]"#;
        let cells = parse_cells(raw, geometry(100, 100, 100, 100)).unwrap();
        assert_eq!(cells[0].bbox(), BBox([1, 2, 10, 20]));
    }
}
