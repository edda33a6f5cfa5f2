//! CLI binary for edgequake-web2csv.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig` / `StructuringConfig` and prints results.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use edgequake_web2csv::persist;
use edgequake_web2csv::{
    extract_with, shared_engine, structure, tile, ChromeRenderer, ExtractionConfig,
    ExtractionOutput, OcrEngineKind, PageRenderer, PipelineProgressCallback, ProgressCallback,
    RenderedPage, StructuredOutput, StructuringConfig, VisionOcrConfig, Web2CsvError,
};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Url;
use std::collections::HashMap;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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

/// Spinner while the page renders, then a per-band bar. Bands complete out of
/// order when read concurrently; each one gets its own log line.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Starting browser…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} bands  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Reading");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_render_start(&self, url: &str) {
        self.bar.set_prefix("Rendering");
        self.bar.set_message(url.to_string());
    }

    fn on_render_complete(&self, width: u32, height: u32) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Captured {width}×{height} px"))
        ));
    }

    fn on_extraction_start(&self, total_bands: usize) {
        self.activate_bar(total_bands);
    }

    fn on_band_start(&self, index: usize, _total: usize) {
        if let Ok(mut t) = self.start_times.lock() {
            t.insert(index, Instant::now());
        }
        self.bar.set_message(format!("band {index}"));
    }

    fn on_band_complete(&self, index: usize, total: usize, text_len: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Band {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            index,
            total,
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_band_error(&self, index: usize, total: usize, error: String) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error
        };

        self.bar.println(format!(
            "  {} Band {:>3}/{:<3}  {}  {}",
            red("✗"),
            index,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_bands: usize, failed_bands: usize) {
        self.bar.finish_and_clear();
        if failed_bands == 0 {
            eprintln!(
                "{} {} bands read successfully",
                green("✔"),
                bold(&total_bands.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} bands read  ({} unreadable, kept as empty text)",
                if failed_bands == total_bands {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&(total_bands - failed_bands).to_string()),
                total_bands,
                red(&failed_bands.to_string()),
            );
        }
    }
}

/// Keeps a copy of the capture so the CLI can write the page and its bands.
struct KeepPage<R> {
    inner: R,
    page: Mutex<Option<RenderedPage>>,
}

#[async_trait]
impl<R: PageRenderer> PageRenderer for KeepPage<R> {
    async fn render(&self, url: &Url) -> Result<RenderedPage, Web2CsvError> {
        let page = self.inner.render(url).await?;
        if let Ok(mut slot) = self.page.lock() {
            *slot = Some(page.clone());
        }
        Ok(page)
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Screenshot + OCR, records as JSON
  web2csv extract https://example.com/products -o records.json

  # Keep the full-page capture and every band
  web2csv extract https://example.com/products --save-bands screenshots/

  # Structure saved records (asks for missing hints)
  web2csv structure records.json -o structured_data.csv

  # Everything in one go
  web2csv run https://example.com/products \
      --page-description "product listings" \
      --expected-data "name, price, rating" -o products.csv

  # Vision model instead of tesseract
  web2csv extract --engine vision https://example.com/chart

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  CHROME_PATH             Browser executable (else chromium / google-chrome on PATH)

SETUP:
  1. Install Chromium and tesseract (apt install chromium tesseract-ocr)
  2. Set API key:     export OPENAI_API_KEY=sk-...
  3. Run:             web2csv run https://example.com -o out.csv
"#;

/// Turn webpages into CSV: screenshot, OCR, LLM structuring.
#[derive(Parser, Debug)]
#[command(
    name = "web2csv",
    version,
    about = "Turn webpages into CSV: full-page screenshot, banded OCR, LLM structuring",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "WEB2CSV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "WEB2CSV_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "WEB2CSV_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Screenshot a page and OCR it into ordered text records.
    Extract {
        /// Absolute URL of the page.
        url: String,

        /// Write the records (JSON) to this file instead of stdout.
        #[arg(short, long, env = "WEB2CSV_RECORDS")]
        output: Option<PathBuf>,

        /// Print the full ExtractionOutput JSON even with --output.
        #[arg(long, env = "WEB2CSV_JSON")]
        json: bool,

        #[command(flatten)]
        extraction: ExtractionArgs,
    },

    /// Structure previously extracted records into CSV.
    Structure {
        /// Records file written by `web2csv extract -o`.
        records: PathBuf,

        /// Write CSV to this file instead of stdout.
        #[arg(short, long, env = "WEB2CSV_OUTPUT")]
        output: Option<PathBuf>,

        #[command(flatten)]
        structuring: StructuringArgs,
    },

    /// Extract and structure in one go.
    Run {
        /// Absolute URL of the page.
        url: String,

        /// Write CSV to this file instead of stdout.
        #[arg(short, long, env = "WEB2CSV_OUTPUT")]
        output: Option<PathBuf>,

        /// Also keep the records (JSON) here.
        #[arg(long, env = "WEB2CSV_RECORDS")]
        records: Option<PathBuf>,

        #[command(flatten)]
        extraction: ExtractionArgs,

        #[command(flatten)]
        structuring: StructuringArgs,
    },
}

#[derive(Args, Debug)]
struct ExtractionArgs {
    /// Band height in pixels.
    #[arg(long, env = "WEB2CSV_CHUNK_HEIGHT", default_value_t = 800)]
    chunk_height: u32,

    /// Rows shared by consecutive bands (must be < chunk height).
    #[arg(long, env = "WEB2CSV_OVERLAP", default_value_t = 50)]
    overlap: u32,

    /// OCR engine.
    #[arg(long, env = "WEB2CSV_ENGINE", value_enum, default_value = "tesseract")]
    engine: EngineArg,

    /// Bands read concurrently.
    #[arg(short, long, env = "WEB2CSV_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Write full_page.png and chunks/chunk_NNN.png into this directory.
    #[arg(long, env = "WEB2CSV_SAVE_BANDS")]
    save_bands: Option<PathBuf>,

    /// Browser executable.
    #[arg(long, env = "CHROME_PATH")]
    browser: Option<PathBuf>,

    /// Attach to a running browser on this remote-debugging port.
    #[arg(long, env = "WEB2CSV_DEBUG_PORT")]
    debug_port: Option<u16>,

    /// Initial window width before the full-document resize.
    #[arg(long, env = "WEB2CSV_WIDTH", default_value_t = 1920)]
    width: u32,

    /// Settle time after page load, in milliseconds.
    #[arg(long, env = "WEB2CSV_SETTLE_MS", default_value_t = 3000)]
    settle_ms: u64,

    /// Tesseract language pack(s), e.g. eng or eng+deu.
    #[arg(long, env = "WEB2CSV_LANG", default_value = "eng")]
    lang: String,

    /// Vision model for --engine vision.
    #[arg(long, env = "WEB2CSV_VISION_MODEL")]
    vision_model: Option<String>,

    /// Overall extraction deadline in seconds.
    #[arg(long, env = "WEB2CSV_TIMEOUT", default_value_t = 600)]
    timeout: u64,
}

#[derive(Args, Debug)]
struct StructuringArgs {
    /// What the webpage contains (asked interactively when missing).
    #[arg(long, env = "WEB2CSV_PAGE_DESCRIPTION")]
    page_description: Option<String>,

    /// Expected data structure (asked interactively when missing).
    #[arg(long, env = "WEB2CSV_EXPECTED_DATA")]
    expected_data: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Max CSV tokens the model may produce.
    #[arg(long, env = "WEB2CSV_MAX_TOKENS", default_value_t = 2000)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "WEB2CSV_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "WEB2CSV_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EngineArg {
    Tesseract,
    Vision,
}

impl From<EngineArg> for OcrEngineKind {
    fn from(v: EngineArg) -> Self {
        match v {
            EngineArg::Tesseract => OcrEngineKind::Tesseract,
            EngineArg::Vision => OcrEngineKind::Vision,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
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

    match cli.command {
        Command::Extract {
            ref url,
            ref output,
            json,
            ref extraction,
        } => {
            let result = run_extraction(url, extraction, show_progress).await?;
            match output {
                Some(path) => {
                    persist::save_records(path, &result)
                        .await
                        .context("Failed to write records")?;
                    if json {
                        print_json(&result)?;
                    }
                    if !cli.quiet {
                        eprintln!(
                            "{}  {} records  {}ms  →  {}",
                            green("✔"),
                            result.records.len(),
                            result.stats.total_duration_ms,
                            bold(&path.display().to_string()),
                        );
                    }
                }
                None => print_json(&result)?,
            }
        }

        Command::Structure {
            ref records,
            ref output,
            ref structuring,
        } => {
            let extraction = persist::load_records(records)
                .await
                .with_context(|| format!("Failed to load records from {}", records.display()))?;
            let table = run_structuring(&extraction, structuring, show_progress).await?;
            emit_csv(&table, output.as_ref(), cli.quiet).await?;
        }

        Command::Run {
            ref url,
            ref output,
            ref records,
            ref extraction,
            ref structuring,
        } => {
            // Ask for the hints before the slow part, not after it.
            let structuring = resolve_hints(structuring)?;
            let result = run_extraction(url, extraction, show_progress).await?;
            if let Some(path) = records {
                persist::save_records(path, &result)
                    .await
                    .context("Failed to write records")?;
            }
            let table = run_structuring(&result, &structuring, show_progress).await?;
            emit_csv(&table, output.as_ref(), cli.quiet).await?;
        }
    }

    Ok(())
}

async fn run_extraction(
    url: &str,
    args: &ExtractionArgs,
    show_progress: bool,
) -> Result<ExtractionOutput> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_extraction_config(args, progress)?;

    let engine = shared_engine(&config).context("OCR engine unavailable")?;
    let renderer = KeepPage {
        inner: ChromeRenderer::new(&config),
        page: Mutex::new(None),
    };
    let result = extract_with(url, &config, &renderer, engine)
        .await
        .context("Extraction failed")?;

    if let Some(ref dir) = args.save_bands {
        let page = renderer.page.lock().ok().and_then(|mut p| p.take());
        if let Some(page) = page {
            persist::save_page(dir.join("full_page.png"), &page)
                .await
                .context("Failed to save page capture")?;
            let bands = tile(&page, config.chunk_height, config.overlap)?;
            persist::save_bands(dir.join("chunks"), &bands)
                .await
                .context("Failed to save bands")?;
        }
    }

    Ok(result)
}

async fn run_structuring(
    extraction: &ExtractionOutput,
    args: &StructuringArgs,
    show_progress: bool,
) -> Result<StructuredOutput> {
    let args = resolve_hints(args)?;
    let config = build_structuring_config(&args).await?;

    let page_description = args.page_description.as_deref().unwrap_or_default();
    let expected_data = args.expected_data.as_deref().unwrap_or_default();

    let spinner = if show_progress {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::hidden()
    };
    spinner.set_message("Structuring with LLM…");
    spinner.enable_steady_tick(Duration::from_millis(80));
    let result = structure(&extraction.records, page_description, expected_data, &config).await;
    spinner.finish_and_clear();

    result.context("Structuring failed (try more specific --page-description / --expected-data)")
}

async fn emit_csv(table: &StructuredOutput, output: Option<&PathBuf>, quiet: bool) -> Result<()> {
    match output {
        Some(path) => {
            persist::save_csv(path, &table.csv)
                .await
                .context("Failed to write CSV")?;
            if !quiet {
                eprintln!(
                    "{}  {} rows × {} columns  →  {}",
                    green("✔"),
                    table.row_count,
                    table.column_count,
                    bold(&path.display().to_string()),
                );
            }
        }
        None => {
            io::stdout()
                .lock()
                .write_all(table.csv.as_bytes())
                .context("Failed to write to stdout")?;
            if !quiet {
                eprintln!(
                    "{} rows × {} columns",
                    table.row_count, table.column_count
                );
            }
        }
    }
    if !quiet {
        eprintln!(
            "   {} tokens in  /  {} tokens out  —  {}ms",
            dim(&table.input_tokens.to_string()),
            dim(&table.output_tokens.to_string()),
            table.duration_ms,
        );
    }
    Ok(())
}

fn print_json(output: &ExtractionOutput) -> Result<()> {
    let json = serde_json::to_string_pretty(output).context("Failed to serialise output")?;
    println!("{json}");
    Ok(())
}

/// Fill in missing hints from stdin; fails when stdin is not interactive.
fn resolve_hints(args: &StructuringArgs) -> Result<StructuringArgs> {
    let page_description = match non_blank(args.page_description.as_deref()) {
        Some(s) => s,
        None => ask(
            "What does this webpage contain? (e.g. 'product listings', 'financial data'): ",
            "--page-description",
        )?,
    };
    let expected_data = match non_blank(args.expected_data.as_deref()) {
        Some(s) => s,
        None => ask(
            "What data structure do you expect? (e.g. 'table with product names, prices, ratings'): ",
            "--expected-data",
        )?,
    };
    Ok(StructuringArgs {
        page_description: Some(page_description),
        expected_data: Some(expected_data),
        model: args.model.clone(),
        provider: args.provider.clone(),
        max_tokens: args.max_tokens,
        temperature: args.temperature,
        system_prompt: args.system_prompt.clone(),
    })
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn ask(question: &str, flag: &str) -> Result<String> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        anyhow::bail!("{flag} is required when stdin is not a terminal");
    }
    eprint!("{} {}", cyan("?"), question);
    io::stderr().flush().ok();

    let mut line = String::new();
    tokio::task::block_in_place(|| stdin.lock().read_line(&mut line))
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

/// Map CLI args to `ExtractionConfig`.
fn build_extraction_config(
    args: &ExtractionArgs,
    progress: Option<ProgressCallback>,
) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .chunk_height(args.chunk_height)
        .overlap(args.overlap)
        .ocr_engine(args.engine.into())
        .concurrency(args.concurrency)
        .viewport(args.width, 1080)
        .load_settle_ms(args.settle_ms)
        .tesseract_lang(args.lang.clone())
        .pipeline_timeout_secs(args.timeout)
        .vision(VisionOcrConfig {
            model: args.vision_model.clone(),
            ..Default::default()
        });

    if let Some(ref path) = args.browser {
        builder = builder.browser_path(path.clone());
    }
    if let Some(port) = args.debug_port {
        builder = builder.browser_debug_port(port);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Map CLI args to `StructuringConfig`.
async fn build_structuring_config(args: &StructuringArgs) -> Result<StructuringConfig> {
    let mut builder = StructuringConfig::builder()
        .max_tokens(args.max_tokens)
        .temperature(args.temperature);

    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref path) = args.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}
