//! CLI binary for dots-ocr-client.
//!
//! A thin shim over the library crate that maps CLI flags to `ParserConfig`
//! and `ParseOptions`, then prints Markdown or JSON.

use anyhow::{bail, Context, Result};
use clap::Parser;
use dots_ocr_client::{
    BackendConfig, DotsOcrParser, PageResult, ParseOptions, ParseProgressCallback, ParserConfig,
    ProgressCallback, PromptMode,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar on stderr. Pages complete out of order.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rasterising…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

impl ParseProgressCallback for CliProgressCallback {
    fn on_document_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Parsing");
        self.bar.reset_eta();
    }

    fn on_page_complete(&self, page_no: usize, total_pages: usize, cells: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_no + 1,
            total_pages,
            dim(&format!("{cells:>4} cells")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_no: usize, total_pages: usize, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page_no + 1,
            total_pages,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} pages parsed successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages parsed  ({} failed)",
                if failed == total_pages { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full layout of a PDF against a local vLLM server (stdout)
  dots-ocr report.pdf

  # Another server, Markdown without page headers/footers, to a file
  dots-ocr --base-url http://10.0.0.5:8000 --no-hf report.pdf -o report.md

  # Replicate public model, JSON cells
  DOTS_OCR_API_TOKEN=r8_... dots-ocr --backend replicate --format json scan.png

  # Read one region of an image
  dots-ocr --prompt prompt_grounding_ocr --bbox 163 241 1536 705 receipt.jpg

  # Save layout previews next to the output
  dots-ocr paper.pdf -o paper.md --layout-dir previews/

PROMPT MODES:
  prompt_layout_all_en    boxes, categories and text (default)
  prompt_layout_only_en   boxes and categories only
  prompt_ocr              plain text
  prompt_grounding_ocr    text inside --bbox

ENVIRONMENT VARIABLES:
  DOTS_OCR_API_TOKEN      Bearer token (required for --backend replicate)
  RUST_LOG                Log filter, e.g. dots_ocr_client=debug
"#;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BackendArg {
    Vllm,
    Replicate,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FormatArg {
    Markdown,
    Json,
}

fn parse_prompt(s: &str) -> Result<PromptMode, String> {
    s.parse::<PromptMode>().map_err(|e| e.to_string())
}

/// Parse PDFs and images into layout cells and Markdown with dots.ocr.
#[derive(Parser, Debug)]
#[command(
    name = "dots-ocr",
    version,
    about = "Parse PDFs and images into layout cells and Markdown with dots.ocr",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF/JPG/PNG path or HTTP/HTTPS URL.
    input: String,

    /// Prompt mode key.
    #[arg(long, default_value = "prompt_layout_all_en", value_parser = parse_prompt)]
    prompt: PromptMode,

    /// Region for prompt_grounding_ocr, in original-image pixels.
    #[arg(long, num_args = 4, value_names = ["X1", "Y1", "X2", "Y2"])]
    bbox: Option<Vec<u32>>,

    /// Inference backend.
    #[arg(long, value_enum, default_value = "vllm")]
    backend: BackendArg,

    /// vLLM server root.
    #[arg(long, env = "DOTS_OCR_BASE_URL", default_value = "http://127.0.0.1:8000")]
    base_url: String,

    /// Served model name on the vLLM server.
    #[arg(long, default_value = "model")]
    model_name: String,

    /// Bearer token for either backend.
    #[arg(long, env = "DOTS_OCR_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Replicate deployment `owner/name`.
    #[arg(long)]
    replicate_deployment: Option<String>,

    /// Replicate public model `owner/name[:version]`.
    #[arg(long, default_value = dots_ocr_client::config::DEFAULT_HOSTED_MODEL)]
    replicate_model: String,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, default_value_t = 0.1)]
    temperature: f32,

    /// Nucleus sampling (0.0–1.0].
    #[arg(long, default_value_t = 1.0)]
    top_p: f32,

    /// Completion token limit per page.
    #[arg(long, default_value_t = 16384)]
    max_completion_tokens: u32,

    /// PDF rendering DPI (72–600).
    #[arg(long, default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Pages in flight.
    #[arg(long, default_value_t = 64)]
    num_thread: usize,

    /// Lower pixel bound for the image sent to the model.
    #[arg(long)]
    min_pixels: Option<u32>,

    /// Upper pixel bound for the image sent to the model.
    #[arg(long)]
    max_pixels: Option<u32>,

    /// Upsample image inputs to --dpi before sending.
    #[arg(long)]
    fitz_preprocess: bool,

    /// Retries per page on backend failure.
    #[arg(long, default_value_t = 0)]
    max_retries: u32,

    /// Per-call timeout in seconds.
    #[arg(long, default_value_t = 600)]
    api_timeout: u64,

    /// Download timeout for URL inputs in seconds.
    #[arg(long, default_value_t = 120)]
    download_timeout: u64,

    /// Inline Picture crops in Markdown as base64 PNG.
    #[arg(long)]
    embed_pictures: bool,

    /// Output format.
    #[arg(long, value_enum, default_value = "markdown")]
    format: FormatArg,

    /// Use Markdown without Page-header / Page-footer cells.
    #[arg(long)]
    no_hf: bool,

    /// Write output to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Save layout preview PNGs into this directory.
    #[arg(long)]
    layout_dir: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ParseProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress)?;
    let options = build_options(&cli)?;
    let parser = DotsOcrParser::new(config).context("Invalid configuration")?;

    let start = Instant::now();
    let pages = parser
        .parse_file(&cli.input, &options)
        .await
        .with_context(|| format!("Failed to parse '{}'", cli.input))?;

    let failed = pages.iter().filter(|p| !p.is_ok()).count();
    if !pages.is_empty() && failed == pages.len() {
        let first = pages
            .iter()
            .find_map(|p| p.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_default();
        bail!("All {} pages failed. First error: {}", pages.len(), first);
    }

    if let Some(ref dir) = cli.layout_dir {
        save_layouts(dir, &cli.input, &pages)?;
    }

    let rendered = match cli.format {
        FormatArg::Json => {
            serde_json::to_string_pretty(&pages).context("Failed to serialise output")?
        }
        FormatArg::Markdown => join_markdown(&pages, cli.no_hf),
    };

    match cli.output {
        Some(ref path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(path, rendered.as_bytes())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{}  {}/{} pages  {}ms  →  {}",
                    if failed == 0 { green("✔") } else { cyan("⚠") },
                    pages.len() - failed,
                    pages.len(),
                    start.elapsed().as_millis(),
                    bold(&path.display().to_string()),
                );
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(rendered.as_bytes())
                .context("Failed to write to stdout")?;
            if !rendered.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            if !cli.quiet && !show_progress {
                eprintln!(
                    "Parsed {}/{} pages in {}ms",
                    pages.len() - failed,
                    pages.len(),
                    start.elapsed().as_millis()
                );
            }
        }
    }

    Ok(())
}

/// Map CLI args to `ParserConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ParserConfig> {
    let backend = match cli.backend {
        BackendArg::Vllm => BackendConfig::Direct {
            base_url: cli.base_url.clone(),
            api_token: cli.api_token.clone(),
            model_name: cli.model_name.clone(),
        },
        BackendArg::Replicate => {
            let mut backend = BackendConfig::hosted(cli.api_token.clone());
            if let BackendConfig::Hosted {
                deployment, model, ..
            } = &mut backend
            {
                deployment.clone_from(&cli.replicate_deployment);
                model.clone_from(&cli.replicate_model);
            }
            backend
        }
    };

    let mut builder = ParserConfig::builder()
        .backend(backend)
        .temperature(cli.temperature)
        .top_p(cli.top_p)
        .max_completion_tokens(cli.max_completion_tokens)
        .dpi(cli.dpi)
        .num_thread(cli.num_thread)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .embed_pictures(cli.embed_pictures);
    if let Some(px) = cli.min_pixels {
        builder = builder.min_pixels(px);
    }
    if let Some(px) = cli.max_pixels {
        builder = builder.max_pixels(px);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Map CLI args to `ParseOptions`.
fn build_options(cli: &Cli) -> Result<ParseOptions> {
    let mut options = ParseOptions::new(cli.prompt).with_fitz_preprocess(cli.fitz_preprocess);
    if let Some(ref b) = cli.bbox {
        let [x1, y1, x2, y2] = b.as_slice() else {
            bail!("--bbox takes exactly four values");
        };
        if x1 >= x2 || y1 >= y2 {
            bail!("--bbox must satisfy x1 < x2 and y1 < y2");
        }
        options = options.with_bbox([*x1, *y1, *x2, *y2]);
    }
    Ok(options)
}

/// Concatenate page Markdown, one blank line between pages.
fn join_markdown(pages: &[PageResult], no_hf: bool) -> String {
    pages
        .iter()
        .filter(|p| p.is_ok())
        .map(|p| if no_hf { p.md_content_no_hf.as_str() } else { p.md_content.as_str() })
        .filter(|md| !md.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Write `{stem}_page_{n}.png` for every page that has a preview.
fn save_layouts(dir: &Path, input: &str, pages: &[PageResult]) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let stem = Path::new(input.split(['?', '#']).next().unwrap_or(input))
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page".to_string());

    for page in pages {
        if let Some(ref img) = page.image_with_layout {
            let path = dir.join(format!("{stem}_page_{}.png", page.page_no));
            img.save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
    }
    Ok(())
}
