//! CLI for evalgen - run model drivers from the command line.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use evalgen::registry::{self, DriverSettings};
use evalgen::{Catalog, DriverExt, DriverKind, DriverOptions, GenerationRequest, InputImage};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "evalgen")]
#[command(about = "Generate images, 3D models and videos through the evaluation bench drivers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a driver once and save the result
    Generate(GenerateArgs),

    /// List drivers and whether they are compiled in
    Drivers,

    /// List the models of a catalog file
    Models(ModelsArgs),

    /// Check that a driver's service is reachable
    Health(HealthArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// The text prompt (optional for image-to-3D drivers)
    #[arg(default_value = "")]
    prompt: String,

    /// Driver to use (e.g. dashscope, doubao, trellis, tripo)
    #[arg(short, long, conflicts_with = "entry", required_unless_present = "entry")]
    driver: Option<String>,

    /// Catalog entry id to use instead of a driver
    #[arg(short, long)]
    entry: Option<String>,

    /// Catalog file for --entry
    #[arg(long, default_value = "models.json")]
    catalog: PathBuf,

    /// Vendor model identifier
    #[arg(short, long)]
    model: Option<String>,

    /// Input image (repeatable)
    #[arg(short, long = "image")]
    images: Vec<PathBuf>,

    /// Driver option as key=value; values are parsed as JSON when possible
    #[arg(long = "option", value_parser = parse_option)]
    options: Vec<(String, serde_json::Value)>,

    /// Service or API base URL override
    #[arg(long)]
    url: Option<String>,

    /// Retries on transient failures
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Output file path; the extension is added when missing
    #[arg(short, long)]
    output: PathBuf,

    /// Also write the `{ dataBase64, mimeType, usage }` record to this path
    #[arg(long)]
    record: Option<PathBuf>,
}

#[derive(Args)]
struct ModelsArgs {
    /// Catalog file
    #[arg(long, default_value = "models.json")]
    catalog: PathBuf,
}

#[derive(Args)]
struct HealthArgs {
    /// Driver to check
    #[arg(short, long)]
    driver: String,

    /// Service or API base URL override
    #[arg(long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("evalgen=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate(args) => {
            generate(args, cli.json).await?;
        }
        Commands::Drivers => {
            list_drivers(cli.json)?;
        }
        Commands::Models(args) => {
            list_models(args, cli.json)?;
        }
        Commands::Health(args) => {
            health(args, cli.json).await?;
        }
    }

    Ok(())
}

fn parse_option(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{}`", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty option key in `{}`", s));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

async fn generate(args: GenerateArgs, json_output: bool) -> anyhow::Result<()> {
    let cli_options = args
        .options
        .iter()
        .cloned()
        .fold(DriverOptions::new(), |opts, (k, v)| opts.with(k, v));

    let (kind, mut settings, mut request) = match (&args.entry, &args.driver) {
        (Some(id), _) => {
            let catalog = Catalog::load(&args.catalog)
                .with_context(|| format!("loading catalog {}", args.catalog.display()))?;
            let entry = catalog
                .get(id)
                .with_context(|| format!("no model `{}` in {}", id, args.catalog.display()))?;
            let request = entry.request(&args.prompt);
            let options = cli_options.merged_over(&request.options);
            (entry.driver, entry.settings(), request.with_options(options))
        }
        (None, Some(name)) => {
            let kind: DriverKind = name.parse()?;
            (
                kind,
                DriverSettings::new(),
                GenerationRequest::new(&args.prompt).with_options(cli_options),
            )
        }
        (None, None) => anyhow::bail!("either --driver or --entry is required"),
    };

    if let Some(url) = args.url {
        settings.base_url = Some(url);
    }
    if let Some(model) = args.model {
        request = request.with_model(model);
    }
    for path in &args.images {
        let image = InputImage::from_path(path)
            .with_context(|| format!("reading input image {}", path.display()))?;
        request = request.with_image(image);
    }

    let driver = registry::build_driver(kind, &settings)?;
    tracing::info!(driver = %kind, images = request.images.len(), "generating");
    let media = driver.generate_with_retries(&request, args.retries).await?;

    let mut output = args.output;
    if output.extension().is_none() {
        output.set_extension(media.extension());
    }
    media.save(&output)?;

    if let Some(record_path) = &args.record {
        std::fs::write(record_path, serde_json::to_vec_pretty(&media.to_record())?)?;
    }

    if json_output {
        let result = serde_json::json!({
            "success": true,
            "output": output.display().to_string(),
            "driver": kind.as_str(),
            "kind": media.kind(),
            "mimeType": media.mime_type,
            "sizeBytes": media.size(),
            "usage": media.usage,
            "metadata": media.metadata,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Generated {}: {} ({} bytes, {}) via {}",
            media.kind().map(|k| k.to_string()).unwrap_or_else(|| "media".into()),
            output.display(),
            media.size(),
            media.mime_type,
            driver.name()
        );
        if let Some(task_id) = &media.metadata.task_id {
            println!("Task: {}", task_id);
        }
        if let Some(duration) = media.metadata.duration_ms {
            println!("Duration: {}ms", duration);
        }
        if let Some(usage) = &media.usage {
            println!("Usage: {}", serde_json::to_string(usage)?);
        }
    }

    Ok(())
}

fn list_drivers(json_output: bool) -> anyhow::Result<()> {
    #[derive(serde::Serialize)]
    struct DriverInfo {
        name: &'static str,
        kind: &'static str,
        media_type: String,
        env_var: Option<&'static str>,
        enabled: bool,
    }

    let drivers: Vec<DriverInfo> = DriverKind::all()
        .into_iter()
        .map(|kind| DriverInfo {
            name: kind.display_name(),
            kind: kind.as_str(),
            media_type: kind.media_kind().to_string(),
            env_var: kind.api_key_env(),
            enabled: registry::is_enabled(kind),
        })
        .collect();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&drivers)?);
        return Ok(());
    }

    println!("Available drivers:");
    for (title, media) in [("IMAGE", "image"), ("3D", "3d"), ("VIDEO", "video")] {
        println!("\n{}:", title);
        for d in drivers.iter().filter(|d| d.media_type == media) {
            let status = if d.enabled { "✓" } else { "✗" };
            println!("  {} {} ({})", status, d.name, d.kind);
            match d.env_var {
                Some(var) => println!("    API key: {}", var),
                None => println!("    API key: none (self-hosted)"),
            }
        }
    }

    Ok(())
}

fn list_models(args: ModelsArgs, json_output: bool) -> anyhow::Result<()> {
    let catalog = Catalog::load(&args.catalog)
        .with_context(|| format!("loading catalog {}", args.catalog.display()))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(catalog.entries())?);
        return Ok(());
    }

    if catalog.is_empty() {
        println!("No models in {}", args.catalog.display());
        return Ok(());
    }
    for entry in catalog.entries() {
        let status = if registry::is_enabled(entry.driver) { "✓" } else { "✗" };
        println!(
            "  {} {} - {} [{}{}]",
            status,
            entry.id,
            entry.display_name(),
            entry.driver,
            entry
                .model
                .as_deref()
                .map(|m| format!(" / {}", m))
                .unwrap_or_default()
        );
    }

    Ok(())
}

async fn health(args: HealthArgs, json_output: bool) -> anyhow::Result<()> {
    let mut settings = DriverSettings::new();
    if let Some(url) = args.url {
        settings = settings.with_base_url(url);
    }
    let driver = registry::driver_for_name(&args.driver, &settings)?;
    let result = driver.health_check().await;

    if json_output {
        let report = serde_json::json!({
            "driver": driver.kind().as_str(),
            "healthy": result.is_ok(),
            "error": result.as_ref().err().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &result {
            Ok(()) => println!("{}: ok", driver.name()),
            Err(e) => println!("{}: {}", driver.name(), e),
        }
    }

    result.map_err(Into::into)
}
