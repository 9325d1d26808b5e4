use std::env;
use std::path::Path;

use chronorate::config::PipelineConfig;
use chronorate::fossil_calibrations::FossilStore;
use chronorate::pipeline::{FamilyStatus, Pipeline};

fn usage() {
    eprintln!(
        "Usage:\n  \
  chronorate_cli --version\n  \
  chronorate_cli [--config PATH] run FAMILIES_DIR OUTPUT.tsv\n  \
  chronorate_cli [--config PATH] fossils TAXON\n\n  \
  FAMILIES_DIR holds one <family>.nwk gene tree plus <family>.fa alignment per family.\n  \
  Log verbosity follows RUST_LOG (default: info)."
    );
}

fn main() {
    init_logging();
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_global_config_arg(args: &[String]) -> (Option<String>, usize) {
    if args.len() >= 3 && args[1] == "--config" {
        return (Some(args[2].clone()), 3);
    }
    (None, 1)
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        anyhow::bail!("Missing command");
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("chronorate {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let (config_path, cmd_idx) = parse_global_config_arg(&args);
    let config = match config_path {
        Some(path) => PipelineConfig::from_json_file(&path)?,
        None => PipelineConfig::default(),
    };
    if args.len() <= cmd_idx {
        usage();
        anyhow::bail!("Missing command");
    }

    match args[cmd_idx].as_str() {
        "run" => {
            let families_dir = args
                .get(cmd_idx + 1)
                .ok_or_else(|| anyhow::anyhow!("run needs FAMILIES_DIR and OUTPUT.tsv"))?;
            let output = args
                .get(cmd_idx + 2)
                .ok_or_else(|| anyhow::anyhow!("run needs FAMILIES_DIR and OUTPUT.tsv"))?;
            let mut pipeline = Pipeline::new(config)?;
            let outcomes = pipeline.run_batch(Path::new(families_dir), Path::new(output))?;
            let completed = outcomes
                .iter()
                .filter(|o| matches!(o.status, FamilyStatus::Completed { .. }))
                .count();
            println!("{completed}/{} families completed", outcomes.len());
            for outcome in &outcomes {
                match &outcome.status {
                    FamilyStatus::Completed { rows } => {
                        println!("  {}: ok, {rows} rows", outcome.family_id)
                    }
                    FamilyStatus::Skipped { reason } => {
                        println!("  {}: skipped ({reason})", outcome.family_id)
                    }
                }
            }
            Ok(())
        }
        "fossils" => {
            let taxon = args
                .get(cmd_idx + 1)
                .ok_or_else(|| anyhow::anyhow!("fossils needs TAXON"))?;
            let mut store = FossilStore::new(
                config.fossil_cache_dir.clone(),
                config.fossil_service_url.clone(),
            );
            let records = store.calibrations_for(taxon)?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
        other => {
            usage();
            anyhow::bail!("Unknown command '{other}'")
        }
    }
}
