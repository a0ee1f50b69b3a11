//! CLI binary for edgequake-pdf2slides.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` / `ConversionRequest`, runs one invocation (or chains
//! invocations with `--until-done`) and prints the report.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_pdf2slides::store::{ContentStore, MediaStore, MemoryStore, PayloadStore};
use edgequake_pdf2slides::{
    inspect, ConversionCoordinator, ConversionProgressCallback, ConversionReport, ConversionRequest,
    ConversionState, DocumentSource, ImagePolicy, PipelineConfig, ProgressCallback, SlideId,
};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

/// One progress bar per invocation; `--until-done` replaces it on every
/// `on_conversion_start`.
struct CliProgressCallback {
    bar: Mutex<ProgressBar>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: Mutex::new(Self::spinner()),
            errors: AtomicUsize::new(0),
        })
    }

    fn spinner() -> ProgressBar {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    }

    fn counting(len: u64) -> ProgressBar {
        let bar = ProgressBar::new(len);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize, first_page: usize, last_page: usize) {
        let len = (last_page + 1).saturating_sub(first_page);
        let mut bar = self.bar.lock();
        bar.finish_and_clear();
        *bar = Self::counting(len as u64);
        if len > 0 {
            bar.println(format!(
                "{} {}",
                cyan("◆"),
                bold(&format!("Pages {first_page}–{last_page} of {total_pages}"))
            ));
        }
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        self.bar.lock().set_message(format!("page {page_num}"));
    }

    fn on_slide_created(&self, page_num: usize, total_pages: usize, slide_id: &SlideId) {
        let bar = self.bar.lock();
        bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("slide {slide_id}"))
        ));
        bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        let bar = self.bar.lock();
        bar.println(format!("  {} Page {:>3}/{:<3}  {}", red("✗"), page_num, total_pages, red(&msg)));
        bar.inc(1);
    }

    fn on_conversion_complete(&self, report: &ConversionReport) {
        self.bar.lock().finish_and_clear();
        let marker = match report.state {
            ConversionState::Done => green("✔"),
            ConversionState::PartialDone => yellow("…"),
            ConversionState::Failed => red("✘"),
        };
        let next = report
            .next_start_page
            .map(|p| format!("resume at page {p}"))
            .unwrap_or_else(|| "document complete".to_string());
        eprintln!(
            "{} {} slide(s) created  {}  {}",
            marker,
            bold(&report.slides_created.to_string()),
            dim(&format!("{}ms", report.time_elapsed_ms)),
            next
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Dry run: convert into an in-memory store and print the report
  pdf2slides --dry-run week1.pdf

  # One budgeted invocation against a Payload CMS
  pdf2slides --parent 42 --cms-url https://cms.example.com week1.pdf

  # Keep invoking until the whole document is converted
  pdf2slides --parent 42 --cms-url https://cms.example.com --until-done week1.pdf

  # Resume explicitly at page 11, three pages at a time, no rasterising
  pdf2slides --parent 42 --start-page 11 --max-pages 3 --images placeholder week1.pdf

  # Page count and sizes only (no CMS, no API key)
  pdf2slides --inspect-only week1.pdf

ENVIRONMENT VARIABLES:
  PDF2SLIDES_MAX_PAGES            Pages per invocation (default 10)
  PDF2SLIDES_TIMEOUT_MS           Budget per invocation (default 25000)
  PDF2SLIDES_SAFETY_MARGIN_MS     Stop starting work this close to the deadline (default 3000)
  PDF2SLIDES_ENABLE_IMAGES        true | false (placeholder) | none
  PDF2SLIDES_BATCH_SIZE           Pages processed concurrently (default 1)
  PDF2SLIDES_CLASSIFY             Use the LLM classifier (default true)
  PDF2SLIDES_CLASSIFY_DELAY_MS    Spacing between classifier calls (default 1000)
  PDF2SLIDES_RENDER_SERVICE_URL   Remote rasteriser used when pdfium fails
  PDF2SLIDES_RENDER_SERVICE_TOKEN Bearer token for the remote rasteriser
  PDF2SLIDES_CMS_URL              Payload CMS base URL
  PDF2SLIDES_CMS_API_KEY          Payload API key
  OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
  EDGEQUAKE_LLM_PROVIDER / EDGEQUAKE_MODEL
  PDFIUM_LIB_PATH                 Path to libpdfium (file or directory)
"#;

/// Convert PDF pages into CMS slides under a wall-clock budget.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2slides",
    version,
    about = "Convert PDF pages into classified CMS slides, resumably",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Parent module id the slides are attached to.
    #[arg(long, env = "PDF2SLIDES_PARENT_ID", default_value = "dry-run")]
    parent: String,

    /// Document name recorded on each slide. Default: the input's file name.
    #[arg(long)]
    name: Option<String>,

    /// First page to convert. Default: inferred from existing slides.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    start_page: Option<u64>,

    /// Pages per invocation.
    #[arg(long, env = "PDF2SLIDES_MAX_PAGES")]
    max_pages: Option<usize>,

    /// Wall-clock budget per invocation in milliseconds.
    #[arg(long, env = "PDF2SLIDES_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Image handling: render, placeholder, none.
    #[arg(long, value_enum)]
    images: Option<ImagesArg>,

    /// Pages processed concurrently within a batch.
    #[arg(long, env = "PDF2SLIDES_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Keep invoking with the returned start page until the document is done.
    #[arg(long)]
    until_done: bool,

    /// Write into an in-memory store instead of the CMS.
    #[arg(long)]
    dry_run: bool,

    /// Payload CMS base URL.
    #[arg(long, env = "PDF2SLIDES_CMS_URL")]
    cms_url: Option<String>,

    /// Payload CMS API key.
    #[arg(long, env = "PDF2SLIDES_CMS_API_KEY", hide_env_values = true)]
    cms_api_key: Option<String>,

    /// Auth collection used in the API-key header.
    #[arg(long, env = "PDF2SLIDES_CMS_AUTH_COLLECTION", default_value = "users")]
    cms_auth_collection: String,

    /// LLM model ID used for classification.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Skip the LLM; titles and categories come from the heuristic.
    #[arg(long)]
    no_classify: bool,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Print page count and page sizes only, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2SLIDES_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2SLIDES_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, default_value_t = 120)]
    download_timeout: u64,

    /// Per-call classifier / remote renderer / CMS timeout in seconds.
    #[arg(long, default_value_t = 30)]
    api_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ImagesArg {
    Render,
    Placeholder,
    None,
}

impl From<ImagesArg> for ImagePolicy {
    fn from(v: ImagesArg) -> Self {
        match v {
            ImagesArg::Render => ImagePolicy::Render,
            ImagesArg::Placeholder => ImagePolicy::Placeholder,
            ImagesArg::None => ImagePolicy::None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let name = cli.name.clone().unwrap_or_else(|| document_name(&cli.input));
    let source = DocumentSource::from_arg(&cli.input);

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let info = inspect(&source, &name, cli.download_timeout)
            .await
            .context("Failed to inspect PDF")?;
        if cli.json {
            let sizes: Vec<_> = info
                .page_sizes
                .iter()
                .map(|(w, h)| serde_json::json!({ "width": w, "height": h }))
                .collect();
            let json = serde_json::json!({ "document": name, "pages": info.page_count, "pageSizes": sizes });
            println!("{}", serde_json::to_string_pretty(&json)?);
        } else {
            println!("Document:  {}", name);
            println!("Pages:     {}", info.page_count);
            for (i, (w, h)) in info.page_sizes.iter().enumerate() {
                println!("  {:>4}  {:.0} × {:.0} pt", i + 1, w, h);
            }
        }
        return Ok(());
    }

    // ── Stores ───────────────────────────────────────────────────────────
    let memory = cli.dry_run.then(|| Arc::new(MemoryStore::with_parent(&cli.parent)));
    let (content, media): (Arc<dyn ContentStore>, Arc<dyn MediaStore>) = match (&memory, &cli.cms_url) {
        (Some(store), _) => (
            store.clone() as Arc<dyn ContentStore>,
            store.clone() as Arc<dyn MediaStore>,
        ),
        (None, Some(url)) => {
            let store = Arc::new(
                PayloadStore::new(url.clone(), cli.cms_api_key.clone(), Duration::from_secs(cli.api_timeout))
                    .context("Failed to create CMS client")?
                    .with_auth_collection(cli.cms_auth_collection.clone()),
            );
            (store.clone() as Arc<dyn ContentStore>, store as Arc<dyn MediaStore>)
        }
        (None, None) => bail!("Either --cms-url (or PDF2SLIDES_CMS_URL) or --dry-run is required"),
    };

    // ── Build config and request ─────────────────────────────────────────
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;
    let coordinator = ConversionCoordinator::new(config, content, media);

    let mut request = ConversionRequest::new(cli.parent.clone(), name, source);
    request.start_page = cli.start_page.map(|p| p as usize);
    request.max_pages = cli.max_pages;
    request.timeout_ms = cli.timeout_ms;
    request.batch_size = cli.batch_size;

    // ── Run ──────────────────────────────────────────────────────────────
    let mut reports = Vec::new();
    loop {
        let report = coordinator.run(&request).await;
        if !cli.quiet && !show_progress && !cli.json {
            print_summary(&report);
        }
        let failed = report.state == ConversionState::Failed;
        let next = report.next_start_page;
        let progressed = report.pages_processed > 0;
        reports.push(report);

        match next {
            Some(page) if cli.until_done && !failed && progressed => request.start_page = Some(page),
            Some(_) if cli.until_done && !progressed => {
                eprintln!("{} budget too small to process a single page; stopping", red("✘"));
                break;
            }
            _ => break,
        }
    }

    if cli.json {
        let json = if reports.len() == 1 {
            serde_json::to_string_pretty(&reports[0])
        } else {
            serde_json::to_string_pretty(&reports)
        }
        .context("Failed to serialise report")?;
        println!("{json}");
    } else if let Some(store) = memory.filter(|_| !cli.quiet) {
        for stored in store.slides() {
            println!(
                "{:>4}  {:<10} {:<9} {}",
                stored.slide.source_page,
                stored.id.to_string(),
                stored.slide.category.as_str(),
                stored.slide.title
            );
        }
    }

    match reports.last() {
        Some(last) if last.state == ConversionState::Failed => {
            bail!("Conversion failed: {}", last.errors.join("; "))
        }
        _ => Ok(()),
    }
}

/// Map CLI args to `PipelineConfig`, on top of `PDF2SLIDES_*` defaults.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .env_overrides()
        .context("Invalid PDF2SLIDES_* environment")?
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(images) = cli.images {
        builder = builder.image_policy(images.into());
    }
    if cli.no_classify {
        builder = builder.classification(false);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

fn print_summary(report: &ConversionReport) {
    eprintln!(
        "Pages {}..: {} slide(s) from {} page(s) of {} in {}ms",
        report.start_page, report.slides_created, report.pages_processed, report.total_pages, report.time_elapsed_ms
    );
    for e in &report.errors {
        eprintln!("  {} {}", red("✗"), e);
    }
    for w in &report.warnings {
        eprintln!("  {} {}", yellow("!"), w);
    }
    if let Some(next) = report.next_start_page {
        eprintln!("  {} next start page: {}", cyan("→"), next);
    }
}

/// File name of a path or the last URL segment.
fn document_name(input: &str) -> String {
    let trimmed = input.split(['?', '#']).next().unwrap_or(input);
    Path::new(trimmed)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "document.pdf".to_string())
}
