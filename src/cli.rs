use sigil_manifest::{
    activation::{self, Activation, ActivationError},
    config::AppConfig,
    logging,
    manifest::{self, DeploymentManifest},
    methods::MethodTable,
    prompt::{AutoConfirm, TerminalConfirm},
    purge::{PurgeConfirm, PurgeReport},
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct GlobalOptions {
    format: OutputFormat,
    target: Option<PathBuf>,
    mod_type: String,
    yes: bool,
    verbose: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    Show,
    List,
    Purge,
    Clear,
    Instance,
    Help,
    Version,
}

pub async fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, options) = parse_args(&args)?;
    match command {
        CliCommand::Help => {
            print_help();
            return Ok(());
        }
        CliCommand::Version => {
            println!("sigil-manifest v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let config = AppConfig::load_or_create()?;
    let level = if options.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    logging::init(level)?;

    match command {
        CliCommand::Instance => {
            println!("{}", config.instance_id);
            Ok(())
        }
        CliCommand::Show => show(&config, &options).await,
        CliCommand::List => list(&options).await,
        CliCommand::Purge => purge(&config, &options).await,
        CliCommand::Clear => clear(&config, &options).await,
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

fn parse_args(args: &[String]) -> Result<(CliCommand, GlobalOptions)> {
    let mut options = GlobalOptions {
        format: OutputFormat::Text,
        target: None,
        mod_type: String::new(),
        yes: false,
        verbose: false,
    };
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--format" => {
                let value = iter.next().context("--format requires a value")?;
                options.format = parse_format(value)?;
            }
            value if value.starts_with("--format=") => {
                options.format = parse_format(value.trim_start_matches("--format="))?;
            }
            "--target" | "-t" => {
                let value = iter.next().context("--target requires a path")?;
                options.target = Some(PathBuf::from(value));
            }
            value if value.starts_with("--target=") => {
                options.target = Some(PathBuf::from(value.trim_start_matches("--target=")));
            }
            "--mod-type" | "-m" => {
                let value = iter.next().context("--mod-type requires a value")?;
                options.mod_type = value.to_string();
            }
            value if value.starts_with("--mod-type=") => {
                options.mod_type = value.trim_start_matches("--mod-type=").to_string();
            }
            "--yes" | "-y" => options.yes = true,
            "--verbose" | "-v" => options.verbose = true,
            _ => tokens.push(arg.as_str()),
        }
    }

    let command = match tokens.first().copied() {
        None | Some("help" | "--help" | "-h") => CliCommand::Help,
        Some("version" | "--version" | "-V") => CliCommand::Version,
        Some("show") => CliCommand::Show,
        Some("list") => CliCommand::List,
        Some("purge") => CliCommand::Purge,
        Some("clear") => CliCommand::Clear,
        Some("instance") => CliCommand::Instance,
        Some(other) => bail!("Unknown command: {other} (see 'sigil-manifest help')"),
    };
    if let Some(extra) = tokens.get(1) {
        bail!("Unexpected argument: {extra}");
    }
    if matches!(
        command,
        CliCommand::Show | CliCommand::List | CliCommand::Purge | CliCommand::Clear
    ) && options.target.is_none()
    {
        bail!("--target <dir> is required");
    }
    validate_mod_type(&options.mod_type)?;
    Ok((command, options))
}

fn parse_format(value: &str) -> Result<OutputFormat> {
    OutputFormat::parse(value)
        .with_context(|| format!("Unknown format: {value} (use 'json' or 'text')"))
}

fn validate_mod_type(mod_type: &str) -> Result<()> {
    if !manifest::is_valid_mod_type(mod_type) {
        bail!("Invalid mod type: {mod_type:?}");
    }
    Ok(())
}

fn target(options: &GlobalOptions) -> Result<&Path> {
    options
        .target
        .as_deref()
        .context("--target <dir> is required")
}

#[derive(Serialize)]
struct ShowOutput<'a> {
    path: String,
    exists: bool,
    foreign: bool,
    manifest: &'a DeploymentManifest,
}

async fn show(config: &AppConfig, options: &GlobalOptions) -> Result<()> {
    let target = target(options)?;
    let path = manifest::manifest_path(target, &options.mod_type)?;
    let manifest = manifest::load(target, &options.mod_type, &config.instance_id).await?;
    let output = ShowOutput {
        path: path.display().to_string(),
        exists: path.exists(),
        foreign: !manifest.files.is_empty() && manifest.is_foreign(&config.instance_id),
        manifest: &manifest,
    };

    match options.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("Manifest: {}", output.path);
            if !output.exists {
                println!("Nothing deployed.");
                return Ok(());
            }
            let owner = if manifest.instance.is_empty() {
                "unknown"
            } else {
                manifest.instance.as_str()
            };
            let marker = if output.foreign { " (other instance)" } else { "" };
            println!("Instance: {owner}{marker}");
            println!(
                "Method:   {}",
                manifest.deployment_method.as_deref().unwrap_or("unknown")
            );
            println!("Files:    {}", manifest.files.len());
            for file in &manifest.files {
                println!(
                    "  {}  {}  [{}]",
                    format_time_cell(file.time),
                    file.rel_path,
                    file.source
                );
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ListItem {
    mod_type: String,
    file: String,
}

async fn list(options: &GlobalOptions) -> Result<()> {
    let target = target(options)?;
    let items: Vec<ListItem> = manifest::list_mod_types(target)
        .await?
        .into_iter()
        .map(|mod_type| ListItem {
            file: manifest::manifest_file_name(&mod_type),
            mod_type,
        })
        .collect();

    match options.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No deployment manifests in {}", target.display());
            }
            for item in items {
                let label = if item.mod_type.is_empty() {
                    "(default)"
                } else {
                    item.mod_type.as_str()
                };
                println!("{label:<12} {}", item.file);
            }
        }
    }
    Ok(())
}

async fn purge(config: &AppConfig, options: &GlobalOptions) -> Result<()> {
    let target = target(options)?;
    let methods = MethodTable::builtin();
    let confirm: &dyn PurgeConfirm = if options.yes {
        &AutoConfirm
    } else {
        &TerminalConfirm
    };

    let result = activation::resolve_activation(
        &options.mod_type,
        target,
        &config.instance_id,
        &methods,
        confirm,
        config.purge_concurrency,
    )
    .await;

    match result {
        Ok(Activation::Fresh) => {
            println!("Nothing is deployed to this target.");
            Ok(())
        }
        Ok(Activation::Owned(files)) => {
            println!(
                "{} file(s) are deployed by this instance; nothing to purge.",
                files.len()
            );
            Ok(())
        }
        Ok(Activation::Purged(report)) => {
            print_purge_report(&report);
            Ok(())
        }
        Err(err @ ActivationError::UserCanceled { .. }) => {
            println!("Canceled: {err}");
            Ok(())
        }
        Err(ActivationError::Purge(err)) => {
            if !err.removed.is_empty() {
                println!("Removed before the failure:");
                print_paths(&err.removed);
            }
            Err(anyhow::Error::new(err).context("Purge stopped; the manifest was left in place"))
        }
        Err(err) => Err(err.into()),
    }
}

fn print_purge_report(report: &PurgeReport) {
    for line in purge_report_lines(report) {
        println!("{line}");
    }
}

fn purge_report_lines(report: &PurgeReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Purged the other instance's deployment: {} removed, {} kept, {} already missing, {} refused.",
        report.removed.len(),
        report.kept.len(),
        report.missing,
        report.refused.len()
    )];
    let sections = [
        ("Removed:", &report.removed),
        ("Kept (modified since deployment, still on disk):", &report.kept),
        ("Refused (outside the target, not touched):", &report.refused),
    ];
    for (heading, paths) in sections {
        if paths.is_empty() {
            continue;
        }
        lines.push(heading.to_string());
        lines.extend(paths.iter().map(|path| format!("  {path}")));
    }
    lines
}

fn print_paths(paths: &[String]) {
    for path in paths {
        println!("  {path}");
    }
}

async fn clear(config: &AppConfig, options: &GlobalOptions) -> Result<()> {
    let target = target(options)?;
    activation::save_activation(
        &options.mod_type,
        &config.instance_id,
        target,
        Vec::new(),
        None,
    )
    .await?;
    println!(
        "Removed {}",
        manifest::manifest_path(target, &options.mod_type)?.display()
    );
    Ok(())
}

fn format_time_cell(millis: f64) -> String {
    format_timestamp(millis).unwrap_or_else(|| format!("{millis:>19}"))
}

fn format_timestamp(millis: f64) -> Option<String> {
    if !millis.is_finite() || millis <= 0.0 {
        return None;
    }
    let nanos = (millis * 1_000_000.0) as i128;
    let date = time::OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?;
    let format = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    date.format(&format).ok()
}

fn print_help() {
    println!("sigil-manifest v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  sigil-manifest show --target <dir>     Show the deployment manifest");
    println!("  sigil-manifest list --target <dir>     List mod types with manifests");
    println!("  sigil-manifest purge --target <dir>    Purge files deployed by another instance");
    println!("  sigil-manifest clear --target <dir>    Forget the deployment (keeps files)");
    println!("  sigil-manifest instance                Print this installation's instance id");
    println!();
    println!("Options:");
    println!("  -t, --target <dir>                     Deployment target directory");
    println!("  -m, --mod-type <type>                  Mod type (default: untyped)");
    println!("  --format <json|text>                   Output format for show/list");
    println!("  -y, --yes                              Purge without asking");
    println!("  -v, --verbose                          Debug logging");
    println!("  -h, --help                             Show help");
    println!("  -V, --version                          Show version");
}
