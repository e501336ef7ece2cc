//! Page assembly: validated cells + page image → [`PageResult`].
//!
//! Pure functions. Nothing here touches the network or the file system, and
//! the same input always yields byte-identical Markdown.

use crate::output::{Category, Cell, PageGeometry, PageResult};
use crate::pipeline::encode::png_data_uri;
use crate::pipeline::postprocess::clean_text;
use crate::prompts::PromptMode;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tracing::warn;

/// Outline thickness of layout boxes in the preview image.
const LINE_THICKNESS: u32 = 2;

/// Knobs for [`assemble`] and [`render_markdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssembleOptions {
    pub prompt_mode: PromptMode,
    /// Inline Picture crops as base64 PNG instead of file-name placeholders.
    pub embed_pictures: bool,
}

/// Build the result for a page whose answer was a cell array.
pub fn assemble(
    page_no: usize,
    file_path: &str,
    geometry: PageGeometry,
    cells: Vec<Cell>,
    base_image: &DynamicImage,
    options: AssembleOptions,
) -> PageResult {
    let (md_content, md_content_no_hf) = if options.prompt_mode.renders_markdown() {
        (
            render_markdown(&cells, page_no, false, base_image, options),
            render_markdown(&cells, page_no, true, base_image, options),
        )
    } else {
        (String::new(), String::new())
    };
    let image_with_layout = Some(draw_layout(base_image, &cells));

    PageResult {
        page_no,
        file_path: file_path.to_string(),
        input_width: geometry.image_width,
        input_height: geometry.image_height,
        model_width: geometry.model_width,
        model_height: geometry.model_height,
        cells,
        image_with_layout,
        md_content,
        md_content_no_hf,
        response: None,
        error: None,
    }
}

/// Build the result for a page whose answer was free text.
///
/// The raw answer is kept in `response`; both Markdown fields hold the
/// cleaned text.
pub fn assemble_text(
    page_no: usize,
    file_path: &str,
    geometry: PageGeometry,
    response: String,
) -> PageResult {
    let md = clean_text(&response);
    PageResult {
        page_no,
        file_path: file_path.to_string(),
        input_width: geometry.image_width,
        input_height: geometry.image_height,
        model_width: geometry.model_width,
        model_height: geometry.model_height,
        cells: Vec::new(),
        image_with_layout: None,
        md_content_no_hf: md.clone(),
        md_content: md,
        response: Some(response),
        error: None,
    }
}

/// Render cells to Markdown in cell order, one block per cell, blocks
/// separated by a blank line.
pub fn render_markdown(
    cells: &[Cell],
    page_no: usize,
    skip_page_hf: bool,
    base_image: &DynamicImage,
    options: AssembleOptions,
) -> String {
    let mut blocks: Vec<String> = Vec::with_capacity(cells.len());
    let mut picture_no = 0usize;

    for cell in cells {
        if skip_page_hf && cell.category().is_page_furniture() {
            continue;
        }
        if cell.category() == Category::Picture {
            blocks.push(picture_block(cell, page_no, picture_no, base_image, options));
            picture_no += 1;
            continue;
        }
        let Some(text) = cell.text() else { continue };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let block = match cell.category() {
            Category::Title if !text.starts_with('#') => format!("# {text}"),
            Category::SectionHeader if !text.starts_with('#') => format!("## {text}"),
            _ => text.to_string(),
        };
        blocks.push(block);
    }

    blocks.join("\n\n")
}

fn picture_block(
    cell: &Cell,
    page_no: usize,
    picture_no: usize,
    base_image: &DynamicImage,
    options: AssembleOptions,
) -> String {
    let placeholder = format!("![](page-{page_no}-picture-{picture_no}.png)");
    if !options.embed_pictures {
        return placeholder;
    }
    let b = cell.bbox();
    if b.is_empty() {
        return placeholder;
    }
    let crop = base_image.crop_imm(b.x1(), b.y1(), b.width(), b.height());
    match png_data_uri(&crop) {
        Ok(uri) => format!("![]({uri})"),
        Err(e) => {
            warn!("Page {}: could not embed picture {}: {}", page_no, picture_no, e);
            placeholder
        }
    }
}

/// Outline colour for a category in the layout preview.
pub fn category_color(category: Category) -> Rgb<u8> {
    Rgb(match category {
        Category::Text | Category::Footnote | Category::PageHeader => [0, 128, 0],
        Category::Picture => [255, 0, 255],
        Category::Caption => [255, 165, 0],
        Category::SectionHeader => [0, 255, 255],
        Category::Formula => [128, 128, 128],
        Category::Table => [255, 192, 203],
        Category::Title => [255, 0, 0],
        Category::ListItem => [0, 0, 255],
        Category::PageFooter => [128, 0, 128],
        Category::Other => [165, 42, 42],
        Category::Unknown => [0, 0, 0],
    })
}

/// Draw each cell's box as a 2 px outline on an RGB copy of the image.
pub fn draw_layout(base_image: &DynamicImage, cells: &[Cell]) -> RgbImage {
    let mut img = base_image.to_rgb8();
    let (page_w, page_h) = img.dimensions();

    for cell in cells {
        let b = cell.bbox();
        let x = b.x1().min(page_w);
        let y = b.y1().min(page_h);
        let w = b.width().min(page_w.saturating_sub(x));
        let h = b.height().min(page_h.saturating_sub(y));
        let color = category_color(cell.category());

        for t in 0..LINE_THICKNESS {
            let inner_w = w.saturating_sub(2 * t);
            let inner_h = h.saturating_sub(2 * t);
            if inner_w > 0 && inner_h > 0 {
                let rect = Rect::at((x + t) as i32, (y + t) as i32).of_size(inner_w, inner_h);
                draw_hollow_rect_mut(&mut img, rect, color);
            }
        }
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::BBox;

    fn page(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([255, 255, 255])))
    }

    fn geometry() -> PageGeometry {
        PageGeometry {
            image_width: 100,
            image_height: 100,
            model_width: 112,
            model_height: 112,
        }
    }

    fn cell(category: Category, text: &str) -> Cell {
        Cell::new(BBox([10, 10, 50, 30]), category, Some(text.to_string()))
    }

    fn sample_cells() -> Vec<Cell> {
        vec![
            cell(Category::PageHeader, "ACME Corp, 2024"),
            cell(Category::Title, "Annual Report"),
            cell(Category::SectionHeader, "Revenue"),
            cell(Category::Text, "  Revenue grew 12%.  "),
            cell(Category::Table, "<table><tr><td>1</td></tr></table>"),
            Cell::new(BBox([0, 0, 20, 20]), Category::Picture, None),
            cell(Category::PageFooter, "Page 3"),
        ]
    }

    #[test]
    fn markdown_follows_category_rules() {
        let md = render_markdown(&sample_cells(), 2, false, &page(100, 100), AssembleOptions::default());
        assert_eq!(
            md,
            "ACME Corp, 2024\n\n# Annual Report\n\n## Revenue\n\nRevenue grew 12%.\n\n\
             <table><tr><td>1</td></tr></table>\n\n![](page-2-picture-0.png)\n\nPage 3"
        );
    }

    #[test]
    fn no_hf_drops_page_furniture() {
        let md = render_markdown(&sample_cells(), 0, true, &page(100, 100), AssembleOptions::default());
        assert!(!md.contains("ACME Corp"));
        assert!(!md.contains("Page 3"));
        assert!(md.starts_with("# Annual Report"));
    }

    #[test]
    fn existing_heading_markup_is_kept() {
        let cells = vec![cell(Category::Title, "# Already"), cell(Category::SectionHeader, "### Deep")];
        let md = render_markdown(&cells, 0, false, &page(100, 100), AssembleOptions::default());
        assert_eq!(md, "# Already\n\n### Deep");
    }

    #[test]
    fn cells_without_text_contribute_nothing() {
        let cells = vec![
            Cell::new(BBox([0, 0, 1, 1]), Category::Text, None),
            cell(Category::Text, "   "),
            cell(Category::Caption, "Figure 1"),
        ];
        let md = render_markdown(&cells, 0, false, &page(10, 10), AssembleOptions::default());
        assert_eq!(md, "Figure 1");
    }

    #[test]
    fn pictures_are_numbered_per_page() {
        let cells = vec![
            Cell::new(BBox([0, 0, 5, 5]), Category::Picture, None),
            Cell::new(BBox([5, 5, 9, 9]), Category::Picture, None),
        ];
        let md = render_markdown(&cells, 4, false, &page(10, 10), AssembleOptions::default());
        assert_eq!(md, "![](page-4-picture-0.png)\n\n![](page-4-picture-1.png)");
    }

    #[test]
    fn embedded_picture_is_a_data_uri() {
        let cells = vec![Cell::new(BBox([0, 0, 8, 8]), Category::Picture, None)];
        let options = AssembleOptions {
            embed_pictures: true,
            ..AssembleOptions::default()
        };
        let md = render_markdown(&cells, 0, false, &page(10, 10), options);
        assert!(md.starts_with("![](data:image/png;base64,"), "got: {md}");
    }

    #[test]
    fn assemble_is_deterministic() {
        let img = page(100, 100);
        let a = assemble(0, "doc.pdf", geometry(), sample_cells(), &img, AssembleOptions::default());
        let b = assemble(0, "doc.pdf", geometry(), sample_cells(), &img, AssembleOptions::default());
        assert_eq!(a.md_content, b.md_content);
        assert_eq!(a.md_content_no_hf, b.md_content_no_hf);
        assert_eq!(a.input_width, 100);
        assert_eq!(a.model_width, 112);
        assert!(a.is_ok());
    }

    #[test]
    fn layout_only_has_cells_but_no_markdown() {
        let options = AssembleOptions {
            prompt_mode: PromptMode::LayoutOnly,
            embed_pictures: false,
        };
        let result = assemble(0, "a.png", geometry(), sample_cells(), &page(100, 100), options);
        assert_eq!(result.cells.len(), 7);
        assert!(result.md_content.is_empty());
        assert!(result.md_content_no_hf.is_empty());
        assert!(result.image_with_layout.is_some());
    }

    #[test]
    fn draw_layout_outlines_box() {
        let cells = vec![Cell::new(BBox([10, 10, 50, 30]), Category::Title, Some("T".into()))];
        let img = draw_layout(&page(100, 100), &cells);
        let red = Rgb([255, 0, 0]);
        assert_eq!(*img.get_pixel(10, 10), red);
        assert_eq!(*img.get_pixel(11, 20), red);
        assert_eq!(*img.get_pixel(30, 20), Rgb([255, 255, 255]));
    }

    #[test]
    fn draw_layout_tolerates_edge_boxes() {
        let cells = vec![
            Cell::new(BBox([0, 0, 100, 100]), Category::Text, Some("a".into())),
            Cell::new(BBox([100, 100, 100, 100]), Category::Text, Some("b".into())),
        ];
        let img = draw_layout(&page(100, 100), &cells);
        assert_eq!(img.dimensions(), (100, 100));
    }

    #[test]
    fn text_answer_is_cleaned() {
        let result = assemble_text(1, "a.png", geometry(), "```\nHello  \r\nWorld\n```".into());
        assert_eq!(result.md_content, "Hello\nWorld");
        assert_eq!(result.md_content_no_hf, result.md_content);
        assert!(result.response.as_deref().unwrap().starts_with("```"));
        assert!(result.cells.is_empty());
    }
}
