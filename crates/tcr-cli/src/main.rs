//! `tcr`: load tenants, resolve modules and preview patches from a record
//! manifest

mod logging;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tcr_core::{
    LoadReport, MemoryRecordStore, OverlayHandle, PatchSet, Platform, PlatformConfig,
    RecordManifest, StorageEngine, TenantId,
};

#[derive(Debug, Serialize)]
struct LoadSummary {
    tenant: TenantId,
    alias: String,
    labels: Vec<String>,
    removed: Vec<String>,
    entities: usize,
    rebinds: usize,
    files_written: usize,
    operations_applied: usize,
    phase: tcr_schema::SyncPhase,
}

impl From<&LoadReport> for LoadSummary {
    fn from(report: &LoadReport) -> Self {
        Self {
            tenant: report.tenant.clone(),
            alias: report.alias.to_string(),
            labels: report.labels.iter().map(ToString::to_string).collect(),
            removed: report.removed.iter().map(ToString::to_string).collect(),
            entities: report.entities,
            rebinds: report.rebinds.len(),
            files_written: report.materialized.written,
            operations_applied: report.sync.apply.applied.len(),
            phase: report.sync.phase.clone(),
        }
    }
}

fn cli() -> Command {
    let manifest = Arg::new("manifest")
        .long("manifest")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("YAML or JSON record manifest");
    let tenant = Arg::new("tenant")
        .long("tenant")
        .required(true)
        .help("Tenant id");
    let json = Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON");

    Command::new("tcr")
        .version(tcr_core::VERSION)
        .about("Tenant code registry operator tool")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Platform configuration (TOML)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .arg(storage_arg())
        .subcommand(
            Command::new("load")
                .about("Load a tenant and report its labels and schema phase")
                .arg(manifest.clone())
                .arg(tenant.clone())
                .arg(json.clone()),
        )
        .subcommand(
            Command::new("resolve")
                .about("Print the transformed unit at a logical path")
                .arg(manifest.clone())
                .arg(
                    Arg::new("path")
                        .required(true)
                        .help("Logical path, e.g. tenant.7.components.blog.entities"),
                ),
        )
        .subcommand(
            Command::new("preview")
                .about("Create an overlay with a patch set applied, report it, dispose it")
                .arg(manifest)
                .arg(tenant)
                .arg(
                    Arg::new("patch")
                        .long("patch")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON map of logical path to new content"),
                )
                .arg(json),
        )
}

#[cfg(feature = "sqlite")]
fn storage_arg() -> Arg {
    Arg::new("sqlite")
        .long("sqlite")
        .global(true)
        .value_parser(value_parser!(PathBuf))
        .help("Keep partitions as SQLite files in this directory")
}

#[cfg(not(feature = "sqlite"))]
fn storage_arg() -> Arg {
    Arg::new("sqlite")
        .long("sqlite")
        .global(true)
        .hide(true)
        .value_parser(value_parser!(PathBuf))
}

fn engine(matches: &ArgMatches) -> Result<Arc<dyn StorageEngine>> {
    match matches.get_one::<PathBuf>("sqlite") {
        #[cfg(feature = "sqlite")]
        Some(dir) => Ok(Arc::new(tcr_schema::SqliteEngine::on_disk(dir))),
        #[cfg(not(feature = "sqlite"))]
        Some(_) => bail!("built without the sqlite feature"),
        None => Ok(Arc::new(tcr_schema::MemoryEngine::new())),
    }
}

async fn platform(matches: &ArgMatches, sub: &ArgMatches) -> Result<Platform> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => PlatformConfig::load(path).await?,
        None => PlatformConfig::default(),
    };
    let manifest_path = sub
        .get_one::<PathBuf>("manifest")
        .context("--manifest is required")?;
    let manifest = RecordManifest::load(manifest_path).await?;
    tracing::info!(records = manifest.records.len(), "manifest loaded");

    let store = Arc::new(MemoryRecordStore::from_manifest(manifest));
    let platform = Platform::new(config, store, engine(matches)?)?;
    platform.bootstrap().await?;
    Ok(platform)
}

fn tenant_arg(sub: &ArgMatches) -> Result<TenantId> {
    let raw = sub.get_one::<String>("tenant").context("--tenant is required")?;
    raw.parse()
        .with_context(|| format!("invalid tenant id {raw:?}"))
}

fn print_load(report: &LoadReport, json: bool) -> Result<()> {
    let summary = LoadSummary::from(report);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    println!("Tenant {} → {}", summary.tenant, summary.alias);
    for label in &summary.labels {
        println!("  label {label}");
    }
    for label in &summary.removed {
        println!("  removed {label}");
    }
    println!("  entities: {}", summary.entities);
    println!("  identity rebinds: {}", summary.rebinds);
    println!("  files written: {}", summary.files_written);
    println!("  operations applied: {}", summary.operations_applied);
    println!("  schema: {:?}", summary.phase);
    Ok(())
}

fn print_overlay(handle: &OverlayHandle, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(handle)?);
        return Ok(());
    }
    println!("Overlay {} of tenant {}", handle.id, handle.base);
    println!("  scratch tenant: {}", handle.scratch);
    println!("  alias: {}", handle.alias);
    println!("  patch: {}", handle.patch.short());
    for label in &handle.labels {
        println!("  label {label}");
    }
    println!("  reconciliation: {:?}", handle.reconciliation);
    Ok(())
}

async fn run(matches: ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("load", sub)) => {
            let platform = platform(&matches, sub).await?;
            let tenant = tenant_arg(sub)?;
            let report = platform.load_tenant(&tenant).await?;
            print_load(&report, sub.get_flag("json"))
        }
        Some(("resolve", sub)) => {
            let platform = platform(&matches, sub).await?;
            let path = sub.get_one::<String>("path").context("path is required")?;
            let unit = platform.resolve(path).await?;
            match &unit.origin {
                Some(origin) => eprintln!(
                    "# {} from {}{} ({})",
                    unit.path,
                    origin.component.as_deref().map(|c| format!("{c}:")).unwrap_or_default(),
                    origin.path,
                    unit.content_hash.short()
                ),
                None => eprintln!("# {} (package)", unit.path),
            }
            print!("{}", unit.source);
            Ok(())
        }
        Some(("preview", sub)) => {
            let platform = platform(&matches, sub).await?;
            let tenant = tenant_arg(sub)?;
            let patch_path = sub.get_one::<PathBuf>("patch").context("--patch is required")?;
            let text = tokio::fs::read_to_string(patch_path)
                .await
                .with_context(|| format!("reading {}", patch_path.display()))?;
            let patch: PatchSet = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", patch_path.display()))?;

            platform.load_tenant(&tenant).await?;
            let handle = platform.create_overlay(&tenant, &patch).await?;
            let printed = print_overlay(&handle, sub.get_flag("json"));
            platform.dispose_overlay(handle.id).await;
            printed
        }
        Some((other, _)) => bail!("unknown command {other}"),
        None => bail!("no command given"),
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    logging::init(matches.get_flag("json-logs"));

    if let Err(e) = run(matches).await {
        tracing::error!(error = %e, "command failed");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
