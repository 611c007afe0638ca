//! mender - recover and apply file edits from model responses
//!
//! Decodes a saved response (possibly truncated or malformed) into its file
//! edits, and optionally merges them into a project directory.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mender_adapters::{init_logging, load_snapshot, DiskStore, MenderConfig};
use mender_core::{DecodeMode, EditSet, FileStore};
use mender_engine::{merge_edit_set, stream_status, Decoder};
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "mender",
    about = "Recover and apply file edits from model responses",
    version
)]
struct Cli {
    /// Config file (defaults to ~/.config/mender/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the decoded envelope as JSON
    Decode(DecodeArgs),
    /// Merge the decoded edits into a directory
    Apply(ApplyArgs),
    /// Report per-file progress of a partially received response
    Status(StatusArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ModeArg {
    Strict,
    Lenient,
}

impl From<ModeArg> for DecodeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Strict => DecodeMode::Strict,
            ModeArg::Lenient => DecodeMode::Lenient,
        }
    }
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Response file, or `-` for stdin
    #[arg(default_value = "-")]
    input: String,
    /// Override the configured decode mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Response file, or `-` for stdin
    #[arg(default_value = "-")]
    input: String,
    /// Project directory to merge into
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Report what would change without writing
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Response file, or `-` for stdin
    #[arg(default_value = "-")]
    input: String,
    /// Paths expected in the response
    #[arg(long = "expect")]
    expected: Vec<String>,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Write the effective configuration back to the config file
    #[arg(long)]
    save: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => MenderConfig::load_from(path),
        None => MenderConfig::load(),
    };
    init_logging(&config.logging);

    match cli.command {
        Commands::Decode(args) => run_decode(args, &config),
        Commands::Apply(args) => run_apply(args, &config),
        Commands::Status(args) => run_status(args),
        Commands::Config(args) => run_config(args, &config, cli.config.as_deref()),
    }
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read response from stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {input}"))
    }
}

fn decode_input(input: &str, config: &MenderConfig, mode: Option<ModeArg>) -> Result<Option<EditSet>> {
    let mut settings = config.decoder.clone();
    if let Some(mode) = mode {
        settings.mode = mode.into();
    }
    let text = read_input(input)?;
    let decoded = Decoder::new(settings)
        .decode(&text)
        .map_err(|err| anyhow::anyhow!("Could not decode response ({}): {err}", err.category()))?;
    if let Some(set) = &decoded {
        report_diagnostics(set);
    }
    Ok(decoded)
}

fn report_diagnostics(set: &EditSet) {
    eprintln!(
        "  Decoded {} file(s) via {:?}{}",
        set.files.len(),
        set.recovery,
        if set.truncated { " (response was truncated)" } else { "" }
    );
    for skipped in &set.skipped {
        eprintln!("    - skipped {}: {}", skipped.path, skipped.reason.label());
    }
}

fn run_decode(args: DecodeArgs, config: &MenderConfig) -> Result<()> {
    match decode_input(&args.input, config, args.mode)? {
        Some(set) => println!("{}", serde_json::to_string_pretty(&set)?),
        None => eprintln!("  Nothing could be decoded"),
    }
    Ok(())
}

fn run_apply(args: ApplyArgs, config: &MenderConfig) -> Result<()> {
    let Some(set) = decode_input(&args.input, config, None)? else {
        eprintln!("  Nothing could be decoded");
        return Ok(());
    };
    let snapshot = load_snapshot(&args.root)?;
    let merged = merge_edit_set(&snapshot, &set);

    for error in &merged.errors {
        eprintln!("    ! {error}");
    }

    if !args.dry_run {
        write_changes(&args.root, &merged)?;
    }

    let report = serde_json::json!({
        "dryRun": args.dry_run,
        "stats": merged.stats,
        "changed": merged.changed,
        "errors": merged.errors,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn write_changes(root: &Path, merged: &mender_engine::MergeResult) -> Result<()> {
    let store = DiskStore::new(root)?;
    let mut written: Vec<&str> = Vec::new();
    for path in &merged.changed {
        if written.contains(&path.as_str()) {
            continue;
        }
        match merged.files.get(path) {
            Some(content) => store.update_file(path, content)?,
            None => store.delete_file(path)?,
        }
        tracing::info!(path = %path, "written");
        written.push(path);
    }
    Ok(())
}

fn run_status(args: StatusArgs) -> Result<()> {
    let text = read_input(&args.input)?;
    let status = stream_status(&text, &args.expected);
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn run_config(args: ConfigArgs, config: &MenderConfig, explicit: Option<&Path>) -> Result<()> {
    if args.save {
        let path = match explicit {
            Some(path) => {
                config.save_to(path)?;
                path.to_path_buf()
            }
            None => config.save()?,
        };
        eprintln!("  Saved config to {}", path.display());
    } else {
        eprintln!(
            "  Config: {}",
            explicit
                .map(|p| p.display().to_string())
                .unwrap_or_else(MenderConfig::config_location)
        );
    }
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
