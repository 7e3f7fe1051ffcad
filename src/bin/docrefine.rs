//! CLI binary for docrefine.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `RefineConfig`, walks one document through the three steps and writes
//! the cleaned Word file.

use anyhow::{Context, Result};
use clap::Parser;
use docrefine::{
    document_shell, inspect, write_export, Operation, ProgressCallback, RefineConfig, Refinery,
    StageProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one spinner for the running stage and a log
/// line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn stage_label(stage: Operation) -> &'static str {
    match stage {
        Operation::Ingest => "Reading",
        Operation::Sanitize => "Cleaning",
        Operation::Export => "Exporting",
    }
}

impl StageProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Operation, detail: &str) {
        self.bar.reset_elapsed();
        self.bar.set_prefix(stage_label(stage));
        self.bar.set_message(detail.to_string());
    }

    fn on_input_truncated(&self, original_chars: usize, kept_chars: usize) {
        self.bar.println(format!(
            "  {} Document has {original_chars} characters; only the first {kept_chars} are cleaned",
            yellow("⚠"),
        ));
    }

    fn on_stage_complete(&self, stage: Operation, summary: &str) {
        self.bar.println(format!(
            "  {} {:<10} {}",
            green("✓"),
            stage.to_string(),
            dim(summary)
        ));
    }

    fn on_stage_error(&self, stage: Operation, error: &str) {
        // Keep the first line only; the full error is printed on exit.
        let first = error.lines().next().unwrap_or(error);
        self.bar
            .println(format!("  {} {:<10} {}", red("✗"), stage.to_string(), red(first)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Clean a document; writes ./DocRefine_Limpo_report.docx
  docrefine report.docx

  # Choose the output path
  docrefine report.docx -o clean/report.docx

  # Use a specific model
  docrefine --provider anthropic --model claude-sonnet-4-20250514 report.docx

  # Print the cleaning report as JSON and keep an HTML preview
  docrefine --json --html preview.html report.docx > report.json

  # Download and clean
  docrefine https://example.com/files/minutes.docx

  # Ingest only (no API key needed)
  docrefine --inspect-only report.docx

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  DOCREFINE_*             Every flag, e.g. DOCREFINE_MAX_INPUT_CHARS=20000

OUTPUT LAYOUT:
  A4 portrait, margins 3 cm top/left and 2 cm bottom/right, Arial 12 pt,
  1.5 line spacing, justified paragraphs with a 1.25 cm first-line indent.
"#;

/// Clean Word documents with an LLM and export a formatted .docx.
#[derive(Parser, Debug)]
#[command(
    name = "docrefine",
    version,
    about = "Clean Word documents with an LLM and export a formatted .docx",
    long_about = "Extract the text of a .docx file (local path or URL), have a language model \
remove conversational residue and markdown artefacts, validate its reply, and write the cleaned \
content back to Word with a fixed academic layout. Supports OpenAI, Anthropic, Google Gemini, \
Azure OpenAI, and any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local .docx file path or HTTP/HTTPS URL.
    input: String,

    /// Write the .docx here (file or directory). Default: current directory.
    #[arg(short, long, env = "DOCREFINE_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "DOCREFINE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "DOCREFINE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOCREFINE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max LLM output tokens.
    #[arg(long, env = "DOCREFINE_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Characters of document text sent to the model; the rest is dropped.
    #[arg(long, env = "DOCREFINE_MAX_INPUT_CHARS", default_value_t = 15_000)]
    max_input_chars: usize,

    /// LLM call timeout in seconds.
    #[arg(long, env = "DOCREFINE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOCREFINE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "DOCREFINE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Prefix of the exported file name.
    #[arg(long, env = "DOCREFINE_PREFIX", default_value = docrefine::config::DEFAULT_FILE_PREFIX)]
    prefix: String,

    /// Print the cleaned HTML document to stdout.
    #[arg(long, env = "DOCREFINE_PREVIEW")]
    preview: bool,

    /// Also write the cleaned HTML document to this file.
    #[arg(long, env = "DOCREFINE_HTML")]
    html: Option<PathBuf>,

    /// Print the cleaning report (AnalysisResult) as JSON to stdout.
    #[arg(long, env = "DOCREFINE_JSON")]
    json: bool,

    /// Read the document and report what was found; no cleaning, no export.
    #[arg(long)]
    inspect_only: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "DOCREFINE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCREFINE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCREFINE_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives the feedback that matters; library INFO logs would
    // only tear it up.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.preview;
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

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let config = build_config(&cli, None).await?;
        let doc = inspect(&cli.input, &config)
            .await
            .context("Failed to read document")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&doc).context("Failed to serialise document")?
            );
        } else {
            println!("File:         {}", doc.file_name);
            println!("Characters:   {}", doc.raw_text.chars().count());
            println!("Words:        {}", doc.raw_text.split_whitespace().count());
            println!("Paragraphs:   {}", doc.raw_text.split("\n\n").count());
            println!("Images:       {}", doc.image_count);
            if doc.raw_text.chars().count() > config.max_input_chars {
                println!(
                    "Note:         only the first {} characters would be cleaned",
                    config.max_input_chars
                );
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let spinner = show_progress.then(CliProgressCallback::new);
    let progress_cb: Option<ProgressCallback> = spinner
        .as_ref()
        .map(|cb| Arc::clone(cb) as Arc<dyn StageProgressCallback>);

    let config = build_config(&cli, progress_cb).await?;
    let refinery = Refinery::new(config);

    // ── Run the three steps ──────────────────────────────────────────────
    let outcome = run(&cli, &refinery).await;
    if let Some(ref s) = spinner {
        s.finish();
    }
    let (analysis, written) = outcome?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(analysis.as_ref()).context("Failed to serialise report")?
        );
    }

    if !cli.quiet {
        eprintln!("{}  {}", green("✔"), bold(&written.display().to_string()));
        if !cli.json {
            eprintln!("   {}", analysis.summary);
            for issue in &analysis.formatting_issues {
                eprintln!("   {} {}", dim("•"), issue.description);
            }
            for note in &analysis.image_analysis.issues {
                eprintln!("   {} {}", yellow("⚠"), note);
            }
        }
        eprintln!(
            "   {} tokens in  /  {} tokens out:  {}ms",
            dim(&analysis.input_tokens.to_string()),
            dim(&analysis.output_tokens.to_string()),
            analysis.duration_ms,
        );
    }

    Ok(())
}

async fn run(
    cli: &Cli,
    refinery: &Refinery,
) -> Result<(Arc<docrefine::AnalysisResult>, PathBuf)> {
    refinery
        .upload_path(&cli.input)
        .await
        .context("Failed to read document")?;

    let analysis = refinery
        .sanitize()
        .await
        .context("Cleaning failed")?;

    let shell = document_shell(&analysis.formatted_html, &refinery.config().layout);
    if let Some(ref path) = cli.html {
        tokio::fs::write(path, &shell)
            .await
            .with_context(|| format!("Failed to write HTML preview to {:?}", path))?;
    }
    if cli.preview {
        println!("{shell}");
    }

    let doc = refinery.export().await.context("Export failed")?;
    let dest = cli.output.clone().unwrap_or_else(|| PathBuf::from("."));
    let written = write_export(&doc, &dest).context("Failed to save document")?;

    Ok((analysis, written))
}

/// Map CLI args to `RefineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<RefineConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = RefineConfig::builder()
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_input_chars(cli.max_input_chars)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .file_prefix(cli.prefix.clone());

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
