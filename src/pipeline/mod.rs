//! Pipeline stages for turning a page image into a [`crate::PageResult`].
//!
//! Each submodule implements one transformation step, so each can be tested
//! without a server and swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ resize ──▶ encode ──▶ (backend) ──▶ parse ──▶ assemble
//! (URL/path) (pdfium)  (28-px grid) (base64)               (cells)   (Markdown)
//! ```
//!
//! 1. [`input`]    canonicalise the user-supplied path or URL; classify PDF
//!    vs image
//! 2. [`render`]   rasterise pages; blocking, called from `spawn_blocking`
//! 3. [`resize`]   client pixel bounds and the server's resize rule
//! 4. [`encode`]   PNG-encode and base64-wrap each image for the request body
//! 5. [`parse`]    validate the model's JSON and map boxes back to image space
//! 6. [`assemble`] Markdown and layout preview; [`postprocess`] cleans
//!    free-text answers

pub mod assemble;
pub mod encode;
pub mod input;
pub mod parse;
pub mod postprocess;
pub mod render;
pub mod resize;
