//! CLI binary for edgequake-reflow.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ReflowConfig` and prints results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_reflow::{
    analyze_only, reconstruct, reconstruct_to_file, renumber_correlation_markers,
    DocumentAnalysis, ProgressCallback, ReflowConfig, ReflowProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
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

/// Terminal progress callback: a spinner while pages are analysed, then a
/// bar over tagging chunks. Chunks complete out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Analysing pages…");
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
             [{bar:42.green/238}] {pos:>3}/{len} chunks  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Tagging");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, chunk_num: usize) -> f64 {
        let started = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&chunk_num));
        started.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0)
    }
}

impl ReflowProgressCallback for CliProgressCallback {
    fn on_reconstruction_start(&self, total_pages: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reconstructing {total_pages} page(s)…"))
        ));
    }

    fn on_reextraction_complete(&self, flagged: usize, reextracted: usize) {
        if flagged > 0 {
            self.bar.println(format!(
                "  {} {} page(s) flagged for re-extraction, {} replaced",
                yellow("⚠"),
                flagged,
                reextracted
            ));
        }
    }

    fn on_tagging_start(&self, total_chunks: usize) {
        self.activate_bar(total_chunks);
    }

    fn on_chunk_start(&self, chunk_num: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(chunk_num, Instant::now());
        }
    }

    fn on_chunk_complete(&self, chunk_num: usize, total: usize, tagged_len: usize) {
        let secs = self.elapsed_secs(chunk_num);
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            chunk_num,
            total,
            dim(&format!("{tagged_len:>6} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, chunk_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(chunk_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}  {}",
            red("✗"),
            chunk_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_correction_complete(&self, iterations: usize, accepted: bool) {
        if iterations > 0 || !accepted {
            self.bar.println(format!(
                "  {} {} tag correction(s), review {}",
                if accepted { green("✓") } else { yellow("⚠") },
                iterations,
                if accepted { "accepted" } else { "not accepted" }
            ));
        }
    }

    fn on_reconstruction_complete(&self, total_chunks: usize, tagged_chunks: usize) {
        let degraded = total_chunks.saturating_sub(tagged_chunks);
        self.bar.finish_and_clear();

        if degraded == 0 {
            eprintln!(
                "{} {} chunk(s) tagged successfully",
                green("✔"),
                bold(&tagged_chunks.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} chunks tagged  ({} kept untagged)",
                cyan("⚠"),
                bold(&tagged_chunks.to_string()),
                total_chunks,
                red(&degraded.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Reconstruct extracted text (stdout)
  reflow extracted.txt

  # Write to a file
  reflow extracted.txt -o clean.txt

  # Read from stdin, pages separated by form feeds (pdftotext output)
  pdftotext scan.pdf - | reflow --page-marker $'\f' -

  # Page quality and line classification only (no API key needed)
  reflow --analyze-only extracted.txt

  # Close numbering gaps in an already reconstructed, hand-edited file
  reflow --renumber-only edited.txt -o edited.txt

  # Structured JSON output
  reflow --json extracted.txt -o report.json

  # Let the model fix tagging problems, accepting only clean reviews
  reflow --correction-iterations 3 --strict extracted.txt -o clean.txt

  # Every .txt file under a directory, mirrored into another one
  reflow --batch extracted/ -o clean/ --pattern '*.txt'

INPUT FORMAT:
  Plain UTF-8 text. Pages are separated by a literal marker line,
  by default <!-- page-break -->.

OUTPUT FORMAT:
  Body blocks separated by blank lines, then the footnote section.
  References:   {{footnotenumberN}}<original marker>{{-footnotenumberN}}
  Definitions:  {{footnoteN}}<definition text>{{-footnoteN}}

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
"#;

/// Rebuild clean, footnote-correlated documents from noisy PDF text.
#[derive(Parser, Debug)]
#[command(
    name = "reflow",
    version,
    about = "Rebuild clean, footnote-correlated documents from noisy PDF text",
    long_about = "Score extracted PDF text page by page, let an LLM mark up headings, list \
items, paragraphs and footnotes without changing a word, then extract and renumber the \
footnotes deterministically. Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, and \
any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Text file to reconstruct, `-` for stdin, or a directory with `--batch`.
    input: String,

    /// Write the reconstructed text (or JSON) to this file instead of
    /// stdout. With `--batch`, the output directory.
    #[arg(short, long, env = "REFLOW_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-mini, gemini-2.0-flash).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Characters per tagging call; shorter documents use a single call.
    #[arg(long, env = "REFLOW_CHUNK_SIZE", default_value_t = 40_000)]
    chunk_size: usize,

    /// Maximum tagging calls in flight (default: all chunks at once).
    #[arg(short, long, env = "REFLOW_CONCURRENCY")]
    concurrency: Option<usize>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "REFLOW_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max LLM output tokens per chunk.
    #[arg(long, env = "REFLOW_MAX_TOKENS", default_value_t = 16384)]
    max_tokens: usize,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "REFLOW_API_TIMEOUT", default_value_t = 180)]
    api_timeout: u64,

    /// Path to a text file containing a custom tagging instruction.
    #[arg(long, env = "REFLOW_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Literal marker separating pages in the input.
    #[arg(long, env = "REFLOW_PAGE_MARKER", default_value = "<!-- page-break -->")]
    page_marker: String,

    /// Correction rounds when the tag review is not acceptable (0 = review
    /// only).
    #[arg(long, env = "REFLOW_CORRECTION_ITERATIONS", default_value_t = 0)]
    correction_iterations: usize,

    /// Accept only Perfect or Excellent tag reviews; a Warning is corrected
    /// too.
    #[arg(long, env = "REFLOW_STRICT")]
    strict: bool,

    /// Reconstruct every file under the input directory that matches
    /// `--pattern`, writing results under the `-o` directory.
    #[arg(long, conflicts_with_all = ["json", "analyze_only", "renumber_only"])]
    batch: bool,

    /// File name pattern for `--batch`, matched at any depth.
    #[arg(long, default_value = "*.txt", requires = "batch")]
    pattern: String,

    /// Output structured JSON instead of plain text.
    #[arg(long, env = "REFLOW_JSON")]
    json: bool,

    /// Report page quality and line classification only; no LLM call.
    #[arg(long, conflicts_with = "renumber_only")]
    analyze_only: bool,

    /// Renumber existing correlation markers to 1..N; no LLM call.
    #[arg(long)]
    renumber_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "REFLOW_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "REFLOW_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "REFLOW_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let offline = cli.analyze_only || cli.renumber_only;
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !offline && !cli.batch;
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

    // ── Offline modes ────────────────────────────────────────────────────
    if cli.analyze_only {
        let raw = read_input(&cli.input).await?;
        let config = ReflowConfig::builder()
            .page_marker(cli.page_marker.clone())
            .chunk_size(cli.chunk_size)
            .build()
            .context("Invalid configuration")?;
        let analysis = analyze_only(&raw, &config);
        if cli.json {
            let json =
                serde_json::to_string_pretty(&analysis).context("Failed to serialise analysis")?;
            emit_text(cli.output.as_deref(), &json).await?;
        } else {
            print_analysis(&cli.input, &analysis);
        }
        return Ok(());
    }

    if cli.renumber_only {
        let raw = read_input(&cli.input).await?;
        let renumbered = renumber_correlation_markers(&raw);
        emit_text(cli.output.as_deref(), &renumbered).await?;
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ReflowProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    if cli.batch {
        let Some(ref output_dir) = cli.output else {
            bail!("--batch requires an output directory (-o)");
        };
        return run_batch(Path::new(&cli.input), output_dir, &cli.pattern, &config, cli.quiet)
            .await;
    }

    // ── Run reconstruction ───────────────────────────────────────────────
    match cli.output {
        Some(ref output_path) if cli.input != "-" && !cli.json => {
            let stats = reconstruct_to_file(&cli.input, output_path, &config)
                .await
                .context("Reconstruction failed")?;

            if !cli.quiet {
                eprintln!(
                    "{}  {} page(s), {}/{} chunks tagged, {} footnote(s)  {}ms  →  {}",
                    if stats.degraded_chunks == 0 {
                        green("✔")
                    } else {
                        cyan("⚠")
                    },
                    stats.total_pages,
                    stats.total_chunks - stats.degraded_chunks,
                    stats.total_chunks,
                    stats.footnote_count,
                    stats.total_duration_ms,
                    bold(&output_path.display().to_string()),
                );
                eprintln!(
                    "   {} tokens in  /  {} tokens out",
                    dim(&stats.total_input_tokens.to_string()),
                    dim(&stats.total_output_tokens.to_string()),
                );
            }
        }
        _ => {
            let raw = read_input(&cli.input).await?;
            let output = reconstruct(&raw, &config)
                .await
                .context("Reconstruction failed")?;

            if cli.json {
                let json =
                    serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
                emit_text(cli.output.as_deref(), &json).await?;
            } else {
                emit_text(cli.output.as_deref(), &output.final_text).await?;
            }

            if !cli.quiet && !cli.json {
                eprintln!(
                    "   {} page(s) flagged  /  {} footnote(s)  /  tags {:?} after {} correction(s)  —  {}ms total",
                    output.stats.flagged_pages,
                    output.stats.footnote_count,
                    output.tag_validation.status,
                    output.stats.correction_iterations,
                    output.stats.total_duration_ms,
                );
            }
        }
    }

    Ok(())
}

/// Map CLI args to `ReflowConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ReflowConfig> {
    let mut builder = ReflowConfig::builder()
        .chunk_size(cli.chunk_size)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout)
        .page_marker(cli.page_marker.clone())
        .max_correction_iterations(cli.correction_iterations)
        .strict(cli.strict);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(n) = cli.concurrency {
        builder = builder.max_concurrent_chunks(n);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Read the input file, or stdin for `-`.
async fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read stdin")?;
        return Ok(raw);
    }
    tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read input file '{input}'"))
}

/// Write text to `path`, or to stdout with a trailing newline.
async fn emit_text(path: Option<&Path>, text: &str) -> Result<()> {
    if let Some(path) = path {
        return tokio::fs::write(path, text)
            .await
            .with_context(|| format!("Failed to write {}", path.display()));
    }
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(text.as_bytes())
        .context("Failed to write to stdout")?;
    if !text.ends_with('\n') {
        handle
            .write_all(b"\n")
            .context("Failed to write to stdout")?;
    }
    handle.flush().context("Failed to write to stdout")
}

// ── Batch mode ───────────────────────────────────────────────────────────────

/// Files under `dir` whose name matches `pattern`, at any depth, sorted.
fn batch_inputs(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = dir.join("**").join(pattern);
    let pattern_str = full.to_string_lossy();
    let matches =
        glob::glob(&pattern_str).with_context(|| format!("Invalid glob pattern: {pattern_str}"))?;

    let mut files = Vec::new();
    for entry in matches {
        let path = entry.with_context(|| "Failed to read glob entry")?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Output path for `file`: its path relative to `input_dir`, under
/// `output_dir`.
fn mirrored_output(input_dir: &Path, output_dir: &Path, file: &Path) -> Result<PathBuf> {
    let relative = file
        .strip_prefix(input_dir)
        .with_context(|| format!("{} is outside {}", file.display(), input_dir.display()))?;
    Ok(output_dir.join(relative))
}

/// Reconstruct every matching file in turn. A failed file is reported and
/// skipped; the run fails at the end if any file failed.
async fn run_batch(
    input_dir: &Path,
    output_dir: &Path,
    pattern: &str,
    config: &ReflowConfig,
    quiet: bool,
) -> Result<()> {
    if !input_dir.is_dir() {
        bail!("--batch input must be a directory: {}", input_dir.display());
    }
    let files = batch_inputs(input_dir, pattern)?;
    if files.is_empty() {
        bail!(
            "No files matching '{}' under {}",
            pattern,
            input_dir.display()
        );
    }
    if !quiet {
        eprintln!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reconstructing {} file(s)…", files.len()))
        );
    }

    let mut failed = 0usize;
    for file in &files {
        let target = mirrored_output(input_dir, output_dir, file)?;
        let name = file.strip_prefix(input_dir).unwrap_or(file).display().to_string();
        match reconstruct_to_file(file, &target, config).await {
            Ok(stats) if !quiet => {
                let status = if stats.accepted && stats.degraded_chunks == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                };
                eprintln!(
                    "  {}  {}  →  {}  {}",
                    status,
                    name,
                    bold(&target.display().to_string()),
                    dim(&format!(
                        "{} footnote(s), {} correction(s), {}ms",
                        stats.footnote_count, stats.correction_iterations, stats.total_duration_ms
                    )),
                );
            }
            Ok(_) => {}
            Err(e) => {
                failed += 1;
                eprintln!("  {}  {}  {}", red("✗"), name, red(&e.to_string()));
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} file(s) failed", files.len());
    }
    Ok(())
}

fn print_analysis(input: &str, analysis: &DocumentAnalysis) {
    println!("File:            {}", input);
    println!("Pages:           {}", analysis.page_reports.len());
    println!("Flagged pages:   {:?}", analysis.flagged_pages);
    for report in analysis.page_reports.iter().filter(|r| r.needs_reextraction) {
        println!("  page {:>3}: {}", report.page_number(), report.issues.join("; "));
    }
    let summary = &analysis.classification;
    println!("Lines:           {}", summary.total_lines);
    for (line_type, count) in &summary.counts_by_type {
        println!("  {:<20} {}", format!("{line_type:?}"), count);
    }
    println!("Loss risk:       {:.3}", summary.potential_loss_risk);
    println!("Tagging calls:   {}", analysis.planned_chunks);
}
