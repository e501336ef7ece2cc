//! End-to-end tests against a live dots.ocr server.
//!
//! These use real documents in `./test_cases/` and make live inference
//! calls. They are gated behind `E2E_ENABLED` so they do not run in CI unless
//! explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 DOTS_OCR_BASE_URL=http://127.0.0.1:8000 \
//!     LD_LIBRARY_PATH=. cargo test --test e2e -- --nocapture
//!
//! The Replicate test additionally needs `DOTS_OCR_API_TOKEN`.

use dots_ocr_client::{
    BackendConfig, Category, DotsOcrParser, PageResult, ParseOptions, ParserConfig, PromptMode,
};
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn output_dir() -> PathBuf {
    let d = test_cases_dir().join("output");
    std::fs::create_dir_all(&d).ok();
    d
}

/// Skip this test if E2E_ENABLED is not set *or* no file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

fn direct_parser() -> DotsOcrParser {
    let base_url = std::env::var("DOTS_OCR_BASE_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());
    let config = ParserConfig::builder()
        .backend(BackendConfig::direct(base_url))
        .num_thread(8)
        .max_retries(1)
        .build()
        .expect("valid config");
    DotsOcrParser::new(config).expect("parser")
}

/// Basic sanity checks on a successfully parsed layout page.
fn assert_layout_quality(page: &PageResult, context: &str) {
    assert!(page.is_ok(), "[{context}] page failed: {:?}", page.error);
    assert!(!page.cells.is_empty(), "[{context}] no cells");
    assert!(page.model_width % 28 == 0 && page.model_height % 28 == 0);

    for cell in &page.cells {
        let b = cell.bbox();
        assert!(b.x1() <= b.x2() && b.y1() <= b.y2(), "[{context}] inverted box {b:?}");
        assert!(
            b.x2() <= page.input_width && b.y2() <= page.input_height,
            "[{context}] box {b:?} outside {}x{}",
            page.input_width,
            page.input_height
        );
        if cell.category() == Category::Picture {
            assert!(cell.text().is_none(), "[{context}] picture with text");
        }
    }

    let first_line = page.md_content.lines().next().unwrap_or("");
    assert!(
        !first_line.starts_with("```"),
        "[{context}] Markdown starts with a code fence"
    );
    assert!(page.md_content_no_hf.len() <= page.md_content.len());
}

fn save(name: &str, pages: &[PageResult]) {
    let md: Vec<&str> = pages.iter().map(|p| p.md_content.as_str()).collect();
    std::fs::write(output_dir().join(format!("{name}.md")), md.join("\n\n")).ok();
    for page in pages {
        if let Some(ref img) = page.image_with_layout {
            img.save(output_dir().join(format!("{name}_page_{}.png", page.page_no)))
                .ok();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_layout_pdf() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("sample.pdf"));
    let parser = direct_parser();

    let pages = parser
        .parse_pdf(&path, &ParseOptions::default())
        .await
        .expect("parse");

    assert!(!pages.is_empty());
    for (i, page) in pages.iter().enumerate() {
        assert_eq!(page.page_no, i);
        assert_layout_quality(page, &format!("sample.pdf p{i}"));
    }
    save("sample", &pages);
}

#[tokio::test]
async fn e2e_layout_image() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("sample.png"));
    let parser = direct_parser();

    let pages = parser
        .parse_image(&path, &ParseOptions::default())
        .await
        .expect("parse");

    assert_eq!(pages.len(), 1);
    assert_layout_quality(&pages[0], "sample.png");
    save("sample_png", &pages);
}

#[tokio::test]
async fn e2e_layout_only_has_no_text() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("sample.png"));
    let parser = direct_parser();

    let pages = parser
        .parse_image(&path, &ParseOptions::new(PromptMode::LayoutOnly))
        .await
        .expect("parse");

    let page = &pages[0];
    assert!(page.is_ok(), "{:?}", page.error);
    assert!(page.md_content.is_empty());
    assert!(page.image_with_layout.is_some());
}

#[tokio::test]
async fn e2e_plain_ocr() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("sample.png"));
    let parser = direct_parser();

    let pages = parser
        .parse_image(&path, &ParseOptions::new(PromptMode::Ocr))
        .await
        .expect("parse");

    let page = &pages[0];
    assert!(page.is_ok(), "{:?}", page.error);
    assert!(page.cells.is_empty());
    assert!(!page.md_content.trim().is_empty());
}

#[tokio::test]
async fn e2e_grounding_ocr() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("sample.png"));
    let parser = direct_parser();
    let (w, h) = image::image_dimensions(&path).expect("dimensions");

    let options = ParseOptions::new(PromptMode::GroundingOcr).with_bbox([0, 0, w / 2, h / 4]);
    let pages = parser.parse_image(&path, &options).await.expect("parse");

    assert!(pages[0].is_ok(), "{:?}", pages[0].error);
}

#[tokio::test]
async fn e2e_replicate_image() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("sample.png"));
    let Ok(token) = std::env::var("DOTS_OCR_API_TOKEN") else {
        println!("SKIP: DOTS_OCR_API_TOKEN not set");
        return;
    };
    let config = ParserConfig::builder()
        .backend(BackendConfig::hosted(Some(token)))
        .build()
        .expect("valid config");
    let parser = DotsOcrParser::new(config).expect("parser");

    let pages = parser
        .parse_image(&path, &ParseOptions::default())
        .await
        .expect("parse");

    assert_layout_quality(&pages[0], "replicate sample.png");
}
