//! # dots-ocr-client
//!
//! Client for dots.ocr, a vision-language model that reads a document page
//! image and answers with its layout: bounding boxes, categories and text for
//! every element, in reading order.
//!
//! The library rasterises PDFs and images, sends each page to an inference
//! service concurrently, validates the model's answer and turns it into
//! layout cells, per-page Markdown and a layout preview image.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / image / URL
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Render    rasterise pages via pdfium (spawn_blocking)
//!  ├─ 3. Resize    apply pixel bounds, compute the model input size
//!  ├─ 4. Infer     vLLM chat completion or Replicate prediction, per page
//!  ├─ 5. Parse     JSON cells → image-space boxes, coerced categories
//!  └─ 6. Assemble  Markdown, header/footer-free Markdown, layout preview
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dots_ocr_client::{BackendConfig, DotsOcrParser, ParseOptions, ParserConfig, PromptMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ParserConfig::builder()
//!         .backend(BackendConfig::direct("http://127.0.0.1:8000"))
//!         .num_thread(16)
//!         .build()?;
//!     let parser = DotsOcrParser::new(config)?;
//!
//!     let pages = parser
//!         .parse_file("paper.pdf", &ParseOptions::new(PromptMode::LayoutAll))
//!         .await?;
//!     for page in &pages {
//!         match &page.error {
//!             None => println!("{}", page.md_content),
//!             Some(e) => eprintln!("{e}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `dots-ocr` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! dots-ocr-client = { version = "0.3", default-features = false }
//! ```
//!
//! ## pdfium
//!
//! PDF input needs the pdfium shared library, looked up next to the working
//! directory first and then system-wide. Image input does not.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod error;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{Backend, InferenceBackend, InferenceRequest};
pub use config::{BackendConfig, ParseOptions, ParserConfig, ParserConfigBuilder, SamplingParams};
pub use error::{BackendError, MalformedResponse, OcrError, PageError};
pub use output::{BBox, Category, Cell, PageGeometry, PageResult};
pub use parser::DotsOcrParser;
pub use pipeline::assemble::{assemble, draw_layout, render_markdown, AssembleOptions};
pub use pipeline::encode::EncodedImage;
pub use pipeline::parse::parse_cells;
pub use pipeline::render::{PageImage, PdfiumRasterizer, Rasterizer};
pub use pipeline::resize::smart_resize;
pub use progress::{NoopProgressCallback, ParseProgressCallback, ProgressCallback};
pub use prompts::PromptMode;
