use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use archviz_contracts::job::{build_render_job, AngleForm, ExteriorForm, JobForm, RoomForm};
use archviz_contracts::models::ModelCatalog;
use archviz_engine::config::{default_output_root, load_dotenv};
use archviz_engine::{
    ClientConfig, ClientError, ConfigOverrides, GeminiClient, RenderController, RenderMessage,
    RenderOutput, Renderer, TransportPreference,
};
use chrono::Local;
use clap::{Parser, Subcommand};

const SAMPLE_OUTPUT_LIMIT: usize = 5;
const EXIT_BLOCKED: i32 = 2;
const KEY_FROM_STDIN: &str = "-";

#[derive(Debug, Parser)]
#[command(
    name = "archviz",
    version,
    about = "Render architectural views from plans and finish notes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render every camera angle of a job form.
    Render(RenderArgs),
    /// List the models visible to the API key.
    ListModels(ListModelsArgs),
    /// Write an example job form to edit.
    InitJob(InitJobArgs),
}

#[derive(Debug, Parser)]
struct RenderArgs {
    /// Job form JSON.
    #[arg(long)]
    job: PathBuf,
    /// Output root; a timestamped directory is created inside it.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Overrides the form's model.
    #[arg(long)]
    model: Option<String>,
    #[arg(long, conflicts_with = "no_fallback")]
    fallback_model: Option<String>,
    /// Never retry empty responses on the fallback model.
    #[arg(long)]
    no_fallback: bool,
    /// Custom REST endpoint; `{model}` is replaced with the model id.
    #[arg(long)]
    endpoint: Option<String>,
    /// Skip the structured content transport.
    #[arg(long, conflicts_with = "dry_run")]
    rest: bool,
    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,
    /// Write placeholder images without calling the API.
    #[arg(long)]
    dry_run: bool,
    /// API key, or `-` to read it from stdin. GEMINI_API_KEY or a `.env`
    /// file keeps it out of the process list.
    #[arg(long)]
    api_key: Option<String>,
}

#[derive(Debug, Parser)]
struct ListModelsArgs {
    #[arg(long, default_value_t = 25)]
    limit: usize,
    /// API key, or `-` to read it from stdin. GEMINI_API_KEY or a `.env`
    /// file keeps it out of the process list.
    #[arg(long)]
    api_key: Option<String>,
}

#[derive(Debug, Parser)]
struct InitJobArgs {
    #[arg(long)]
    out: PathBuf,
    /// Replace an existing file.
    #[arg(long)]
    force: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Some(path) = load_dotenv() {
        log::debug!("loaded environment from {}", path.display());
    }
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("archviz error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Render(args) => run_render(args),
        Command::ListModels(args) => run_list_models(args),
        Command::InitJob(args) => run_init_job(args),
    }
}

fn run_render(args: RenderArgs) -> Result<i32> {
    let mut form = load_form(&args.job)?;
    if let Some(model) = args.model.filter(|model| !model.trim().is_empty()) {
        form.model_name = model;
    }
    let job = build_render_job(&form);

    let transport = if args.dry_run {
        TransportPreference::Dryrun
    } else if args.rest {
        TransportPreference::Rest
    } else {
        TransportPreference::Auto
    };
    let Some(config) = resolve_config(ConfigOverrides {
        api_key: api_key_arg(args.api_key)?,
        rest_endpoint: args.endpoint,
        timeout_secs: args.timeout,
        fallback_model: args.fallback_model,
        disable_fallback: args.no_fallback,
        transport,
        ..ConfigOverrides::default()
    })?
    else {
        return Ok(EXIT_BLOCKED);
    };
    log::debug!("client config: {config:?}");

    let client = GeminiClient::new(&config)?;
    let run_id = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let output_dir = args
        .out
        .unwrap_or_else(default_output_root)
        .join(&run_id);
    println!(
        "Rendering {} angle(s) of '{}' with {} ({} transport) into {}",
        job.angle_count(),
        job.project_name,
        job.model_name,
        client.active_transport(),
        output_dir.display()
    );

    let renderer = Renderer::new(client, &output_dir).with_run_records(run_id);
    let mut controller = RenderController::new();
    controller.start(renderer, job)?;
    while let Some(message) = controller.recv() {
        match message {
            RenderMessage::Progress(event) => println!("{event}"),
            RenderMessage::Finished(output) => {
                for line in completion_lines(&output) {
                    println!("{line}");
                }
                return Ok(0);
            }
            RenderMessage::Failed(error) => {
                eprintln!("ERROR: {error}");
                return Ok(1);
            }
        }
    }
    bail!("render worker stopped without a result")
}

fn run_list_models(args: ListModelsArgs) -> Result<i32> {
    let Some(config) = resolve_config(ConfigOverrides {
        api_key: api_key_arg(args.api_key)?,
        ..ConfigOverrides::default()
    })?
    else {
        return Ok(EXIT_BLOCKED);
    };
    println!("Fetching available models…");
    let listing = GeminiClient::new(&config)?
        .list_models()
        .context("model listing failed")?;
    let catalog = ModelCatalog::from_listing(&listing)?;
    for line in model_lines(&catalog, args.limit) {
        println!("{line}");
    }
    Ok(0)
}

fn run_init_job(args: InitJobArgs) -> Result<i32> {
    if args.out.exists() && !args.force {
        bail!(
            "{} already exists (pass --force to replace it)",
            args.out.display()
        );
    }
    if let Some(parent) = args.out.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&args.out, serde_json::to_string_pretty(&example_form())?)
        .with_context(|| format!("failed writing {}", args.out.display()))?;
    println!("Wrote example job form to {}", args.out.display());
    Ok(0)
}

/// `None` when the API key is missing; the warning has already been printed.
fn resolve_config(overrides: ConfigOverrides) -> Result<Option<ClientConfig>> {
    match ClientConfig::resolve(overrides) {
        Ok(config) => Ok(Some(config)),
        Err(ClientError::MissingApiKey) => {
            eprintln!(
                "Missing API key: set GEMINI_API_KEY (or add it to .env), \
                 or pipe it in with --api-key -."
            );
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// `--api-key -` reads the key from stdin instead of argv.
fn api_key_arg(arg: Option<String>) -> Result<Option<String>> {
    match arg {
        Some(value) if value == KEY_FROM_STDIN => read_key_from(io::stdin().lock()).map(Some),
        other => Ok(other),
    }
}

fn read_key_from(mut reader: impl BufRead) -> Result<String> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .context("failed reading API key from stdin")?;
    Ok(line.trim().to_string())
}

/// Reads a job form; relative file paths are taken from the form's directory.
fn load_form(path: &Path) -> Result<JobForm> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading job form {}", path.display()))?;
    let mut form: JobForm = serde_json::from_str(&raw)
        .with_context(|| format!("invalid job form {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    rebase_paths(&mut form.exterior.plan_files, base);
    for room in &mut form.rooms {
        rebase_paths(&mut room.files, base);
    }
    Ok(form)
}

fn rebase_paths(paths: &mut [PathBuf], base: &Path) {
    for path in paths.iter_mut().filter(|path| path.is_relative()) {
        *path = base.join(&*path);
    }
}

fn completion_lines(output: &RenderOutput) -> Vec<String> {
    let files = &output.written_files;
    let mut lines = vec![format!("Done. Wrote {} file(s).", files.len())];
    if files.is_empty() {
        lines.push(
            "No images were returned by the model. This usually means the selected Gemini model \
             does not support image output for this endpoint/key. Run `archviz list-models` and \
             choose a different model. Also check the *_debug.json files in the output folder for \
             the raw API response."
                .to_string(),
        );
        return lines;
    }
    lines.push("Sample outputs:".to_string());
    lines.extend(
        files
            .iter()
            .take(SAMPLE_OUTPUT_LIMIT)
            .map(|path| format!("- {}", path.display())),
    );
    lines
}

fn model_lines(catalog: &ModelCatalog, limit: usize) -> Vec<String> {
    let mut lines = vec![format!(
        "Found {} model(s). Showing up to {limit}:",
        catalog.len()
    )];
    lines.extend(catalog.listing_lines(limit));
    let image_models: Vec<&str> = catalog
        .image_capable()
        .into_iter()
        .map(|model| model.id())
        .collect();
    if !image_models.is_empty() {
        lines.push(format!("Likely image output: {}", image_models.join(", ")));
    }
    lines
}

fn example_form() -> JobForm {
    let angle = |name: &str, description: &str| AngleForm {
        name: name.to_string(),
        description: description.to_string(),
    };
    JobForm {
        project_name: "Lakeview Residence".to_string(),
        style_notes: "Contemporary, warm timber accents, soft late-afternoon light".to_string(),
        model_name: String::new(),
        exterior: ExteriorForm {
            plan_files: vec![PathBuf::from("plans/site_plan.pdf")],
            finishes: "Charcoal brick base, vertical cedar cladding, black aluminium frames"
                .to_string(),
            angles: vec![
                angle("Front 3-4", "Street-level three-quarter view of the entry"),
                angle("Rear garden", "From the lawn looking back at the terrace"),
            ],
        },
        rooms: vec![RoomForm {
            name: "Kitchen".to_string(),
            files: vec![PathBuf::from("plans/kitchen_elevations.pdf")],
            finishes: "White oak cabinetry, honed terrazzo counters, brass fixtures".to_string(),
            angles: vec![angle("Island", "From the dining side toward the island")],
        }],
    }
}
