use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sapkey_core::{import_csv, load_project, MemorySink, ProjectRegistry};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sapelli project inspection and CSV import CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a PROJECT.xml and print the derived schema as JSON
    Describe(DescribeArgs),
    /// Load a PROJECT.xml and reconcile one or more CSV exports against it
    Import(ImportArgs),
}

#[derive(Args, Debug)]
struct DescribeArgs {
    /// Path to the PROJECT.xml file
    project: PathBuf,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Path to the PROJECT.xml file
    project: PathBuf,
    /// One or more CSV export files, imported in order
    #[arg(required = true)]
    csv: Vec<PathBuf>,
    /// Form id to import into when the CSV headers carry no identity tokens
    #[arg(long)]
    form: Option<String>,
    /// Recorded as the project creator
    #[arg(long, default_value = "sapkey")]
    creator: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Describe(args) => describe(args),
        Command::Import(args) => import(args),
    }
}

fn describe(args: DescribeArgs) -> Result<()> {
    let xml = read_file(&args.project)?;
    let description = sapkey_parser::parse_project(&xml)
        .with_context(|| format!("failed to parse {}", args.project.display()))?;
    println!("{}", serde_json::to_string_pretty(&description)?);
    Ok(())
}

fn import(args: ImportArgs) -> Result<()> {
    let xml = read_file(&args.project)?;

    let mut sink = MemorySink::new();
    let mut registry = ProjectRegistry::new();
    let project = load_project(&mut sink, &mut registry, &xml, &args.creator)
        .with_context(|| format!("failed to load {}", args.project.display()))?;
    info!(project = %project.display_name, "project loaded");
    println!("{}", serde_json::to_string_pretty(&project.description())?);

    let selected = match &args.form {
        Some(form_id) => match project.form_by_sapelli_id(form_id) {
            Some(form) => Some(form.category_id),
            None => bail!("project has no form named {form_id}"),
        },
        None => None,
    };

    for path in &args.csv {
        let file = fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let receipt = import_csv(&mut sink, project, file, selected)
            .with_context(|| format!("failed to import {}", path.display()))?;
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    }
    Ok(())
}

fn read_file(path: &PathBuf) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
