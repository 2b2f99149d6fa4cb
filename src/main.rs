#![allow(clippy::uninlined_format_args)]

use anyhow::{anyhow, Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{info, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use slidecast::app_config::{self, Config};
use slidecast::explanation::{load_explanations, render_with_outcome};
use slidecast::models::{Container, Outcome};
use slidecast::pipeline::{LevelRequest, PipelineOrchestrator, PipelineServices, ProgressEvent, ProgressSink, RunControl};
use slidecast::preflight::{FsSpaceProbe, SpaceProbe};
use slidecast::process::{ProcessRunner, ToolRunner};
use slidecast::scratch::reserve_output_path;
use slidecast::speech::SpeechSynthesizer;

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

/// CLI Wrapper for Container to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliContainer {
    Mp4,
    Mov,
}

impl From<CliContainer> for Container {
    fn from(cli_container: CliContainer) -> Self {
        match cli_container {
            CliContainer::Mp4 => Container::Mp4,
            CliContainer::Mov => Container::Mov,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render narrated videos for the levels of an explanation file
    Render(RenderArgs),

    /// Report discovered tools, speech backends and free scratch space
    Doctor {
        /// Configuration file path
        #[arg(short, long, default_value = "slidecast.json")]
        config_path: String,
    },

    /// Generate shell completions for slidecast
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// JSON file with one explanation per level
    #[arg(value_name = "EXPLANATIONS")]
    input: PathBuf,

    /// Only render these levels (comma separated)
    #[arg(long, value_delimiter = ',')]
    levels: Vec<String>,

    /// Smaller slides and shorter narration
    #[arg(long)]
    fast: bool,

    /// Produce the markdown only
    #[arg(long)]
    no_video: bool,

    /// Preferred container for clips
    #[arg(long, value_enum)]
    container: Option<CliContainer>,

    /// Voice name for the native speech backend
    #[arg(long)]
    voice: Option<String>,

    /// Clip encodes allowed at once
    #[arg(long)]
    max_encodes: Option<usize>,

    /// Scratch directory for intermediate files
    #[arg(long)]
    scratch: Option<PathBuf>,

    /// Output directory for markdown and videos
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, default_value = "slidecast.json")]
    config_path: String,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,
}

/// slidecast - narrated slide videos from structured explanations
#[derive(Parser, Debug)]
#[command(name = "slidecast")]
#[command(version)]
#[command(about = "Narrated slide videos from structured explanations")]
#[command(long_about = "slidecast turns explanation documents into markdown and one narrated slide video per level.

EXAMPLES:
    slidecast render explanations.json                     # All levels, default config
    slidecast render --levels beginner explanations.json   # One level only
    slidecast render --fast --container mov explanations.json
    slidecast render --no-video explanations.json          # Markdown only
    slidecast doctor                                       # Check ffmpeg and voices
    slidecast completions bash > slidecast.bash            # Generate bash completions

CONFIGURATION:
    Configuration is stored in slidecast.json by default. If the file doesn't exist,
    a default one is created. EXPLAINER_FAST, EXPLAINER_NO_VIDEO, EXPLAINER_CONTAINER,
    EXPLAINER_VOICE, EXPLAINER_LEVELS, FFMPEG_BIN and FFPROBE_BIN override it, and a
    .env file in the working directory is honoured.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(CustomLogger::new(level)))?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: Emoji and ANSI colour for a log level
    fn style_for_level(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("❌ ", "1;31"),
            Level::Warn => ("🚧 ", "1;33"),
            Level::Info => (" ", "1;32"),
            Level::Debug => ("🔍 ", "1;36"),
            Level::Trace => ("📋 ", "1;35"),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let (emoji, colour) = Self::style_for_level(record.level());
            let _ = writeln!(
                std::io::stderr(),
                "\x1B[{}m{} {} {}\x1B[0m",
                colour, now, emoji, record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Trace is the ceiling; the effective level is lowered once the config is known
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);
    dotenvy::dotenv().ok();

    let cli = CommandLineOptions::parse();
    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "slidecast", &mut std::io::stdout());
            Ok(())
        }
        Commands::Doctor { config_path } => run_doctor(&config_path),
        Commands::Render(args) => run_render(args).await,
    }
}

fn load_config(config_path: &str) -> Result<Config> {
    let mut config = Config::load_or_create(config_path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

fn apply_render_args(config: &mut Config, args: &RenderArgs) {
    if !args.levels.is_empty() {
        config.render.levels = args.levels.iter().map(|l| l.trim().to_lowercase()).collect();
    }
    if args.fast {
        config.render.fast = true;
    }
    if args.no_video {
        config.render.create_video = false;
    }
    if let Some(container) = &args.container {
        config.render.preferred_container = container.clone().into();
    }
    if let Some(voice) = &args.voice {
        config.render.voice_hint = Some(voice.clone());
    }
    if let Some(max_encodes) = args.max_encodes {
        config.render.max_concurrent_encodes = max_encodes;
    }
    if let Some(scratch) = &args.scratch {
        config.render.scratch_root = scratch.clone();
    }
    if let Some(output) = &args.output {
        config.render.output_dir = output.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.log_level = log_level.clone().into();
    }
}

fn progress_sink(requests: &[LevelRequest]) -> ProgressSink {
    let multi = MultiProgress::new();
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} segments {prefix} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░");

    let bars: HashMap<String, ProgressBar> = requests
        .iter()
        .map(|request| {
            let bar = multi.add(ProgressBar::new(request.segments().len() as u64));
            bar.set_style(style.clone());
            bar.set_prefix(request.level().to_string());
            bar.set_message("waiting");
            (request.level().to_string(), bar)
        })
        .collect();

    Arc::new(move |event: ProgressEvent| match event {
        ProgressEvent::LevelStarted { level, .. } => {
            if let Some(bar) = bars.get(&level) {
                bar.set_message("rendering");
            }
        }
        ProgressEvent::SegmentFinished { level, ok, order } => {
            if let Some(bar) = bars.get(&level) {
                if !ok {
                    bar.set_message(format!("segment {} failed", order));
                }
                bar.inc(1);
            }
        }
        ProgressEvent::Joining { level, clips } => {
            if let Some(bar) = bars.get(&level) {
                bar.set_message(format!("joining {} clips", clips));
            }
        }
        ProgressEvent::LevelFinished { level, outcome } => {
            if let Some(bar) = bars.get(&level) {
                bar.finish_with_message(format!("{:?}", outcome));
            }
        }
    })
}

async fn run_render(args: RenderArgs) -> Result<()> {
    if let Some(cmd_log_level) = &args.log_level {
        let level: app_config::LogLevel = cmd_log_level.clone().into();
        log::set_max_level(level.to_level_filter());
    }

    let mut config = load_config(&args.config_path)?;
    apply_render_args(&mut config, &args);
    config.validate().context("Configuration validation failed")?;
    if args.log_level.is_none() {
        log::set_max_level(config.log_level.to_level_filter());
    }

    let explanations = load_explanations(&args.input)?;
    let selected: Vec<_> = explanations
        .iter()
        .filter(|entry| config.render.wants_level(&entry.level))
        .collect();
    if selected.is_empty() {
        return Err(anyhow!("No levels in {} match the level filter", args.input.display()));
    }

    let cap = config.speech.narration_cap(config.render.fast);
    let requests: Vec<LevelRequest> = selected
        .iter()
        .map(|entry| entry.explanation.to_request(&entry.level, cap))
        .collect();

    let runner: Arc<dyn ToolRunner> = Arc::new(ProcessRunner);
    let services = PipelineServices::from_config(&config, runner, Arc::new(FsSpaceProbe));
    let config = Arc::new(config);
    let orchestrator = PipelineOrchestrator::new(Arc::clone(&config), services).with_progress(progress_sink(&requests));

    let control = RunControl::new();
    let interrupt = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight levels");
            interrupt.cancel_all();
        }
    });

    let results = orchestrator.run(&requests, &control).await?;

    let output_dir = &config.render.output_dir;
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    for (entry, result) in selected.iter().zip(&results) {
        let markdown = render_with_outcome(&entry.explanation, result);
        let md_path = reserve_output_path(output_dir, &entry.level, "md")
            .with_context(|| format!("Failed to create markdown in {}", output_dir.display()))?;
        std::fs::write(&md_path, &markdown)
            .with_context(|| format!("Failed to write markdown: {}", md_path.display()))?;

        match (result.outcome(), result.final_video_path()) {
            (Outcome::Success | Outcome::PartialSuccess, Some(video)) => {
                info!("✅ {}: {} + {}", entry.level, md_path.display(), video.display())
            }
            (outcome, _) => info!("{}: {} ({:?})", entry.level, md_path.display(), outcome),
        }
        for diagnostic in result.diagnostics() {
            warn!("{}: {}", entry.level, diagnostic);
        }
    }
    Ok(())
}

fn describe(path: Option<PathBuf>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "not found".to_string())
}

fn run_doctor(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate().context("Configuration validation failed")?;

    println!("ffmpeg:  {}", describe(config.tools.resolve_ffmpeg()));
    println!("ffprobe: {}", describe(config.tools.resolve_ffprobe()));
    println!("say:     {}", describe(config.tools.resolve_say()));
    println!("espeak:  {}", describe(config.tools.resolve_espeak()));

    let synthesizer = SpeechSynthesizer::detect(&config, Arc::new(ProcessRunner));
    println!(
        "speech:  primary={}, fallback={}",
        synthesizer.primary_name().unwrap_or("none"),
        synthesizer.fallback_name().unwrap_or("none")
    );

    let scratch: &Path = &config.render.scratch_root;
    match FsSpaceProbe.available_bytes(scratch) {
        Ok(bytes) => println!("scratch: {} ({} MB free)", scratch.display(), bytes / (1024 * 1024)),
        Err(e) => println!("scratch: {} ({})", scratch.display(), e),
    }
    Ok(())
}
