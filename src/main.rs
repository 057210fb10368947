use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use image_space::batch::{self, BatchDispatcher, BatchEvent, RunSettings};
use image_space::calibration::{GridChartDetector, SwatchSet};
use image_space::config::Settings;
use image_space::export::{self, ExportContext};
use image_space::naming::{PlaceholderContext, SchemaEngine};
use image_space::raw::processor::BasicCorrector;
use image_space::state::edit::{Adjustments, OutputFormat};
use image_space::state::library::Library;
use image_space::state::Session;

/// Batch colour calibration and output naming for RAW photo sets
#[derive(Parser, Debug)]
#[command(name = "image-space")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true, env = "IMAGE_SPACE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect, calibrate and process every image of a folder
    Process(RunArgs),

    /// Print each image's sequence number and output path without processing
    Plan(RunArgs),

    /// Check a naming schema; exits with 1 when it is invalid
    ValidateSchema {
        schema: String,
    },

    /// Show the relative output path a schema gives for one file
    PreviewSchema {
        schema: String,
        file: PathBuf,
        /// Group name for [s] (defaults to the file's folder name)
        #[arg(long)]
        group: Option<String>,
        /// Input folder name for [r] (defaults to the file's folder)
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long, default_value = "")]
        custom_name: String,
        #[arg(long, default_value = ".jpg")]
        format: String,
        #[arg(long, default_value_t = 1)]
        number: u32,
    },

    /// Print the exposure multiplier of every image
    Exposure(RunArgs),

    /// Write the project export document
    ExportProject {
        /// Destination JSON file (defaults to a timestamped name in the current folder)
        file: Option<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },
}

/// Flags shared by every command that works on a folder
#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Folder to collect images from
    #[arg(short, long)]
    input: PathBuf,

    /// Base output folder
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format: jpg, png, tiff or exr
    #[arg(long)]
    format: Option<String>,

    /// 8 or 16 (PNG and TIFF)
    #[arg(long)]
    bit_depth: Option<u8>,

    /// JPEG quality 1-100
    #[arg(long)]
    quality: Option<u8>,

    /// Worker count
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Naming schema, e.g. "[r]/[s]/[o]_[n4][e]"
    #[arg(long)]
    schema: Option<String>,

    /// Name outputs with the schema instead of sequential numbering
    #[arg(long)]
    use_schema: bool,

    /// Process without colour charts
    #[arg(long)]
    no_chart: bool,

    /// Chart for a group: GROUP=PATH, where PATH is a collected image or a
    /// calibration file (.json)
    #[arg(long = "chart", value_name = "GROUP=PATH")]
    charts: Vec<String>,

    /// Calibration file used by groups without their own chart
    #[arg(long)]
    default_chart: Option<PathBuf>,

    /// Value of [c] and the stem for sequential names
    #[arg(long)]
    custom_name: Option<String>,

    /// Normalize exposure across the set before processing
    #[arg(long)]
    normalize_exposure: bool,

    /// Reference image for exposure normalization (defaults to the mean)
    #[arg(long)]
    exposure_reference: Option<PathBuf>,

    /// Exposure adjustment in stops when no chart is used
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    exposure: f32,
}

impl RunArgs {
    /// Command line values win over the settings file
    fn apply_to(&self, settings: &mut Settings) {
        if let Some(format) = &self.format {
            settings.export_format = format.clone();
        }
        if let Some(depth) = self.bit_depth {
            settings.tiff_bitdepth = depth;
        }
        if let Some(quality) = self.quality {
            settings.jpeg_quality = quality;
        }
        if let Some(threads) = self.threads {
            settings.thread_count = threads;
        }
        if let Some(schema) = &self.schema {
            settings.export_schema = schema.clone();
            settings.use_export_schema = true;
        }
        if self.use_schema {
            settings.use_export_schema = true;
        }
        if self.no_chart {
            settings.dont_use_chart = true;
        }
        if let Some(chart) = &self.default_chart {
            settings.default_chart = Some(chart.clone());
        }
        if let Some(name) = &self.custom_name {
            settings.custom_name = name.clone();
        }
    }

    fn adjustments(&self) -> Adjustments {
        Adjustments {
            exposure: self.exposure,
            ..Default::default()
        }
    }

    fn output_dir(&self) -> Result<&Path> {
        self.output
            .as_deref()
            .context("--output is required for this command")
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "image_space=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("Failed to load settings")?;

    match cli.command {
        Command::Process(args) => {
            args.apply_to(&mut settings);
            process(&args, &settings).await
        }
        Command::Plan(args) => {
            args.apply_to(&mut settings);
            print_plan(&args, &settings).await
        }
        Command::ValidateSchema { schema } => Ok(validate_schema(&schema)),
        Command::PreviewSchema {
            schema,
            file,
            group,
            root,
            custom_name,
            format,
            number,
        } => {
            let folder = file.parent().map(Path::to_path_buf).unwrap_or_default();
            let root = root.unwrap_or_else(|| folder.clone());
            let group = group.unwrap_or_else(|| {
                folder
                    .file_name()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default()
            });
            let extension = OutputFormat::parse(&format)
                .map(OutputFormat::extension)
                .unwrap_or(".jpg");
            let ctx = PlaceholderContext::for_image(
                &file,
                &root.to_string_lossy(),
                &group,
                &custom_name,
                number,
                extension,
            );
            println!("{}", SchemaEngine::new().preview(&schema, &ctx));
            Ok(ExitCode::SUCCESS)
        }
        Command::Exposure(args) => {
            args.apply_to(&mut settings);
            let mut session = open_session(&args, &settings)?;
            normalize_exposure(&mut session, &args, &settings).await?;
            for record in session.images.iter() {
                match record.exposure_multiplier {
                    Some(m) => println!("{:.4}  {}", m, record.input_path.display()),
                    None => println!("   -    {}", record.input_path.display()),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::ExportProject { file, run } => {
            run.apply_to(&mut settings);
            let session = open_session(&run, &settings)?;
            if !settings.dont_use_chart {
                // Groups that cannot be calibrated are exported as uncalibrated
                let report = tokio::task::block_in_place(|| {
                    session
                        .calibration
                        .resolve_all(&session.groups, &GridChartDetector)
                });
                if !report.is_complete() {
                    warn!("{} groups have no calibration", report.missing.len() + report.failures.len());
                }
            }
            let path = file.unwrap_or_else(|| PathBuf::from(export::default_file_name()));
            let ctx = ExportContext {
                output_dir: run.output.as_deref(),
                adjustments: run.adjustments(),
            };
            export::export_project(&session, &settings, &ctx, &path)
                .with_context(|| format!("Failed to export project to {}", path.display()))?;
            println!("Project exported to {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn validate_schema(schema: &str) -> ExitCode {
    let engine = SchemaEngine::new();
    let (ok, issues) = engine.check(schema);
    if ok {
        println!("Schema is valid");
        return ExitCode::SUCCESS;
    }
    for issue in &issues {
        println!("error: {issue}");
    }
    println!();
    print!("{}", engine.placeholder_help());
    ExitCode::FAILURE
}

/// Collect the input folder and set up calibration sources
fn open_session(args: &RunArgs, settings: &Settings) -> Result<Session> {
    let mut session = Session::new(settings.grouping_rules());
    let library = Library::new(settings.collect_options());
    let count = session
        .collect(&args.input, &library)
        .with_context(|| format!("Failed to collect images from {}", args.input.display()))?;
    if count == 0 {
        warn!("No supported images found in {}", args.input.display());
    }

    session.calibration.set_disabled(settings.dont_use_chart);
    if let Some(path) = &settings.default_chart {
        session
            .calibration
            .load_fallback(path)
            .with_context(|| format!("Failed to load default chart {}", path.display()))?;
    }

    for assignment in &args.charts {
        let (group, path) = assignment
            .split_once('=')
            .with_context(|| format!("Invalid --chart '{assignment}', expected GROUP=PATH"))?;
        let path = PathBuf::from(path);
        let is_calibration_file = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        if is_calibration_file {
            let swatches = SwatchSet::load(&path)
                .with_context(|| format!("Failed to load calibration {}", path.display()))?;
            session
                .calibration
                .set_group_swatches(group, Some(path.clone()), swatches.rows())?;
        } else {
            let path = if path.is_relative() {
                args.input.join(path)
            } else {
                path
            };
            let assigned = session.set_chart(&path)?;
            if assigned != group {
                bail!(
                    "Chart {} belongs to group '{}', not '{}'",
                    path.display(),
                    assigned,
                    group
                );
            }
        }
    }

    Ok(session)
}

async fn normalize_exposure(session: &mut Session, args: &RunArgs, settings: &Settings) -> Result<()> {
    let paths: Vec<PathBuf> = session.images.iter().map(|r| r.input_path.clone()).collect();
    if let Some(reference) = &args.exposure_reference {
        if !session.mark_average_source(reference) {
            bail!("Exposure reference {} is not in the input folder", reference.display());
        }
    }
    let reference = session.average_source().map(Path::to_path_buf);
    let normalizer = settings.exposure();

    let multipliers = tokio::task::spawn_blocking(move || normalizer.from_files(&paths, reference.as_deref()))
        .await
        .context("Exposure task failed")?;
    session.apply_exposure(&multipliers);
    Ok(())
}

/// Resolve calibration and build the plan for a run
async fn prepare(args: &RunArgs, settings: &Settings) -> Result<(Session, batch::BatchPlan)> {
    let output_dir = args.output_dir()?.to_path_buf();
    let mut session = open_session(args, settings)?;

    if args.normalize_exposure {
        normalize_exposure(&mut session, args, settings).await?;
    }

    let adjustments = args.adjustments();
    if !settings.dont_use_chart && !adjustments.is_unedited() {
        warn!("Manual adjustments only apply to groups processed without a chart");
    }

    let calibrations = tokio::task::block_in_place(|| {
        session
            .calibration
            .resolve_all(&session.groups, &GridChartDetector)
    })
    .into_result()
    .context("Calibration is incomplete; assign charts, set a default chart or pass --no-chart")?;

    let run = RunSettings {
        input_root: args.input.clone(),
        output_dir,
        naming: settings.naming_mode(),
        custom_name: settings.custom_name.clone(),
        output: settings.output_settings(),
        adjustments,
        workers: settings.thread_count,
    };
    let plan = batch::plan(&session.planned_images(), &calibrations, run)?;
    Ok((session, plan))
}

async fn print_plan(args: &RunArgs, settings: &Settings) -> Result<ExitCode> {
    let (_, plan) = prepare(args, settings).await?;
    for (chunk, job) in plan.jobs() {
        println!(
            "{:>5}  [{}]  {} -> {}",
            job.sequence,
            chunk.group,
            job.input.display(),
            job.output.display()
        );
    }
    println!("{} images in {} chunks", plan.image_count(), plan.chunks.len());
    Ok(ExitCode::SUCCESS)
}

async fn process(args: &RunArgs, settings: &Settings) -> Result<ExitCode> {
    let (mut session, plan) = prepare(args, settings).await?;
    let total = plan.image_count();
    if total == 0 {
        println!("Nothing to process");
        return Ok(ExitCode::SUCCESS);
    }

    let dispatcher = BatchDispatcher::new(settings.thread_count);
    session.begin_run(total);
    let handle = dispatcher.execute(plan, Arc::new(BasicCorrector))?;

    let token = handle.cancel_token();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing current images");
            token.cancel();
        }
    });

    let progress = handle
        .wait(|event, progress| {
            session.apply_event(event);
            match event {
                BatchEvent::Finished { path, output, .. } => println!(
                    "[{}/{}] {} -> {}",
                    progress.processed(),
                    total,
                    path.display(),
                    output.display()
                ),
                BatchEvent::Failed { path, message } => {
                    eprintln!("[{}/{}] FAILED {}: {}", progress.processed(), total, path.display(), message)
                }
                BatchEvent::Skipped { group, paths, .. } => {
                    eprintln!("Skipped {} images of group '{}'", paths.len(), group)
                }
                BatchEvent::Started { .. } => {}
            }
        })
        .await;
    signal_task.abort();

    info!(
        "{} processed, {} failed, {} skipped",
        progress.finished, progress.failed, progress.skipped
    );
    if progress.failed > 0 || progress.skipped > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
