//! Instruction templates sent to the model, keyed by prompt mode.
//!
//! The model is trained on these exact strings; changing the wording changes
//! what comes back. Keep them verbatim.

use crate::error::OcrError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Full layout: boxes, categories and text for every element.
pub const PROMPT_LAYOUT_ALL_EN: &str = r#"Please output the layout information from the PDF image, including each layout element's bbox, its category, and the corresponding text content within the bbox.

1. Bbox format: [x1, y1, x2, y2]

2. Layout Categories: The possible categories are ['Caption', 'Footnote', 'Formula', 'List-item', 'Page-footer', 'Page-header', 'Picture', 'Section-header', 'Table', 'Text', 'Title'].

3. Text Extraction & Formatting Rules:
    - Picture: For the 'Picture' category, the text field should be omitted.
    - Formula: Format its text as LaTeX.
    - Table: Format its text as HTML.
    - All Others (Text, Title, etc.): Format their text as Markdown.

4. Constraints:
    - The output text must be the original text from the image, with no translation.
    - All layout elements must be sorted according to human reading order.

5. Final Output: The entire output must be a single JSON object.
"#;

/// Detection only: boxes and categories, no text.
pub const PROMPT_LAYOUT_ONLY_EN: &str = r#"Please output the layout information from this PDF image, including each layout's bbox and its category. The bbox should be in the format [x1, y1, x2, y2]. The layout categories for the PDF document include ['Caption', 'Footnote', 'Formula', 'List-item', 'Page-footer', 'Page-header', 'Picture', 'Section-header', 'Table', 'Text', 'Title']. Do not output the corresponding text. The layout result should be in JSON format."#;

/// Plain text extraction.
pub const PROMPT_OCR: &str = r#"Extract the text content from this image."#;

/// Text inside one region; the projected box is appended.
pub const PROMPT_GROUNDING_OCR: &str = "Extract text from the given bounding box on the image (format: [x1, y1, x2, y2]).\nBounding Box:\n";

/// Named instruction template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PromptMode {
    /// `prompt_layout_all_en` (default)
    #[default]
    LayoutAll,
    /// `prompt_layout_only_en`
    LayoutOnly,
    /// `prompt_ocr`
    Ocr,
    /// `prompt_grounding_ocr`
    GroundingOcr,
}

impl PromptMode {
    pub const ALL: [PromptMode; 4] = [
        PromptMode::LayoutAll,
        PromptMode::LayoutOnly,
        PromptMode::Ocr,
        PromptMode::GroundingOcr,
    ];

    /// The string key of this mode.
    pub const fn key(self) -> &'static str {
        match self {
            PromptMode::LayoutAll => "prompt_layout_all_en",
            PromptMode::LayoutOnly => "prompt_layout_only_en",
            PromptMode::Ocr => "prompt_ocr",
            PromptMode::GroundingOcr => "prompt_grounding_ocr",
        }
    }

    /// The instruction template.
    pub const fn template(self) -> &'static str {
        match self {
            PromptMode::LayoutAll => PROMPT_LAYOUT_ALL_EN,
            PromptMode::LayoutOnly => PROMPT_LAYOUT_ONLY_EN,
            PromptMode::Ocr => PROMPT_OCR,
            PromptMode::GroundingOcr => PROMPT_GROUNDING_OCR,
        }
    }

    /// Whether the model answers with a JSON cell array.
    pub const fn returns_layout(self) -> bool {
        matches!(self, PromptMode::LayoutAll | PromptMode::LayoutOnly)
    }

    /// Whether the layout answer carries text worth rendering to Markdown.
    pub const fn renders_markdown(self) -> bool {
        matches!(self, PromptMode::LayoutAll)
    }
}

impl FromStr for PromptMode {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PromptMode::ALL
            .into_iter()
            .find(|m| m.key() == s)
            .ok_or_else(|| OcrError::UnknownPromptMode(s.to_string()))
    }
}

impl fmt::Display for PromptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Build the prompt text for a page.
///
/// `model_bbox` is the grounding region already projected into model-input
/// pixels; it is ignored by every mode except [`PromptMode::GroundingOcr`].
pub fn build_prompt(mode: PromptMode, model_bbox: Option<[u32; 4]>) -> String {
    match (mode, model_bbox) {
        (PromptMode::GroundingOcr, Some([x1, y1, x2, y2])) => {
            format!("{}[{x1}, {y1}, {x2}, {y2}]", mode.template())
        }
        _ => mode.template().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_round_trip() {
        for mode in PromptMode::ALL {
            assert_eq!(mode.key().parse::<PromptMode>().unwrap(), mode);
        }
    }

    #[test]
    fn unknown_key_is_an_error() {
        let err = "prompt_table_html".parse::<PromptMode>().unwrap_err();
        assert!(matches!(err, OcrError::UnknownPromptMode(k) if k == "prompt_table_html"));
    }

    #[test]
    fn grounding_prompt_carries_box() {
        let p = build_prompt(PromptMode::GroundingOcr, Some([10, 20, 30, 40]));
        assert!(p.starts_with(PROMPT_GROUNDING_OCR));
        assert!(p.ends_with("[10, 20, 30, 40]"));
    }

    #[test]
    fn layout_prompt_ignores_box() {
        let p = build_prompt(PromptMode::LayoutAll, Some([1, 2, 3, 4]));
        assert_eq!(p, PROMPT_LAYOUT_ALL_EN);
    }

    #[test]
    fn layout_prompt_lists_categories() {
        for c in ["Section-header", "Page-footer", "Picture", "List-item"] {
            assert!(PROMPT_LAYOUT_ALL_EN.contains(c), "missing {c}");
        }
    }
}
