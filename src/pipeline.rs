use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::alignment::alignment_length;
use crate::calibration_runner::{parse_result, CalibrationRunner};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::fossil_calibrations::FossilStore;
use crate::fossil_mapper::{disambiguate_labels, map_fossils, resolve_calibrations};
use crate::gene_tree::NodeId;
use crate::newick;
use crate::outlier_pruner::prune_outliers;
use crate::rate_distance::{
    traverse_duplication, write_rate_table, DuplicationAnchor, RateRecord,
};
use crate::topology_index::{
    index_tree, DuplicationIndex, SLOT_CHRONOGRAM, SLOT_PHYLOGRAM, SLOT_RATOGRAM,
};

#[derive(Debug, Clone, PartialEq)]
pub enum FamilyStatus {
    Completed { rows: usize },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FamilyOutcome {
    pub family_id: String,
    pub status: FamilyStatus,
}

enum FamilyRun {
    Rows(Vec<RateRecord>),
    Skipped(String),
}

/// One gene family at a time, start to finish: parse, prune, calibrate,
/// traverse. Any per-family failure downgrades to a skip; only writing the
/// output table can abort the batch.
pub struct Pipeline {
    config: PipelineConfig,
    store: FossilStore,
    runner: CalibrationRunner,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let template = match &config.tool_template_path {
            Some(path) => Some(fs::read_to_string(path)?),
            None => None,
        };
        let runner = CalibrationRunner::new(
            config.tool_command.clone(),
            config.tool_args.clone(),
            template,
            config.tool_timeout_secs.map(Duration::from_secs),
        );
        let store = FossilStore::new(
            config.fossil_cache_dir.clone(),
            config.fossil_service_url.clone(),
        );
        Ok(Pipeline {
            config,
            store,
            runner,
        })
    }

    pub fn run_batch(&mut self, families_dir: &Path, output_path: &Path) -> Result<Vec<FamilyOutcome>> {
        let mut outcomes = Vec::new();
        let mut rows = Vec::new();
        for (family_id, tree_path) in discover_families(families_dir)? {
            let alignment_path = tree_path.with_extension("fa");
            let status = match self.run_family(&family_id, &tree_path, &alignment_path) {
                Ok(FamilyRun::Rows(family_rows)) => {
                    info!(
                        family = family_id.as_str(),
                        rows = family_rows.len(),
                        "family completed"
                    );
                    let count = family_rows.len();
                    rows.extend(family_rows);
                    FamilyStatus::Completed { rows: count }
                }
                Ok(FamilyRun::Skipped(reason)) => {
                    warn!(
                        family = family_id.as_str(),
                        reason = reason.as_str(),
                        "family skipped"
                    );
                    FamilyStatus::Skipped { reason }
                }
                Err(e) => {
                    warn!(family = family_id.as_str(), error = %e, "family failed");
                    FamilyStatus::Skipped {
                        reason: e.to_string(),
                    }
                }
            };
            outcomes.push(FamilyOutcome { family_id, status });
        }
        let file = File::create(output_path)?;
        write_rate_table(file, &rows, true)?;
        info!(
            rows = rows.len(),
            output = %output_path.display(),
            "wrote rate table"
        );
        Ok(outcomes)
    }

    fn run_family(
        &mut self,
        family_id: &str,
        tree_path: &Path,
        alignment_path: &Path,
    ) -> Result<FamilyRun> {
        let text = fs::read_to_string(tree_path)?;
        let mut tree = newick::parse(&text)?;
        let report = prune_outliers(&mut tree, self.config.deviation_multiplier)?;
        if report.pruned_tips > 0 {
            info!(
                family = family_id,
                pruned = report.pruned_tips,
                iterations = report.iterations,
                "pruned outlier tips"
            );
        }
        if !alignment_path.exists() {
            return Ok(FamilyRun::Skipped(format!(
                "no alignment at {}",
                alignment_path.display()
            )));
        }
        let alignment_columns = alignment_length(alignment_path)?;

        let taxa = disambiguate_labels(&mut tree);
        let candidates = resolve_calibrations(&mut self.store, &taxa)?;
        let mapping = map_fossils(&mut tree, &candidates);
        if mapping.fossils.is_empty() {
            return Ok(FamilyRun::Skipped(
                "no fossil calibrations mapped".to_string(),
            ));
        }
        debug!(
            family = family_id,
            fossils = mapping.fossils.len(),
            warnings = mapping.warnings.len(),
            "fossils mapped"
        );

        let raw = self
            .runner
            .run_calibration(&tree, alignment_columns, &mapping.fossils)?;
        let calibrated = parse_result(&raw)?;
        let mut chrono = newick::parse(&calibrated.chronogram)?;
        let mut rato = newick::parse(&calibrated.ratogram)?;
        let mut phylo = newick::parse(&calibrated.phylogram)?;

        let mut index = DuplicationIndex::new();
        index_tree(&mut chrono, SLOT_CHRONOGRAM, &mut index);
        index_tree(&mut rato, SLOT_RATOGRAM, &mut index);
        index_tree(&mut phylo, SLOT_PHYLOGRAM, &mut index);

        let mut rows = Vec::new();
        for (hash, bucket) in index.buckets() {
            let Some(anchor) = anchor_from_bucket(hash, bucket) else {
                debug!(hash, "bucket not matched across all three trees");
                continue;
            };
            rows.extend(traverse_duplication(
                family_id,
                &chrono,
                &rato,
                Some(&phylo),
                &anchor,
            ));
        }
        Ok(FamilyRun::Rows(rows))
    }
}

fn anchor_from_bucket(hash: &str, bucket: &[(usize, NodeId)]) -> Option<DuplicationAnchor> {
    match bucket {
        [(SLOT_CHRONOGRAM, chrono), (SLOT_RATOGRAM, rato), (SLOT_PHYLOGRAM, phylo)] => {
            Some(DuplicationAnchor {
                hash: hash.to_string(),
                chrono: *chrono,
                rato: *rato,
                phylo: Some(*phylo),
            })
        }
        _ => None,
    }
}

/// Families are `<id>.nwk` files next to their `<id>.fa` alignments,
/// processed in name order.
fn discover_families(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut families = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("nwk") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        families.push((stem.to_string(), path.clone()));
    }
    families.sort();
    Ok(families)
}
