use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::base_label;
use crate::error::Result;
use crate::fossil_calibrations::{CrownOrStem, FossilRecord, FossilStore};
use crate::gene_tree::{GeneTree, NodeId};

#[derive(Debug, Clone, PartialEq)]
pub struct MappingWarning {
    pub taxon: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FossilMapping {
    pub fossils: Vec<FossilRecord>,
    pub warnings: Vec<MappingWarning>,
}

/// First pass over the labeled internal nodes, root to tips. The
/// nearest-root occurrence of each taxon label keeps it; every later
/// occurrence is renamed with an instance suffix so a higher-taxon
/// calibration binds only to the outermost corresponding divergence. Returns
/// the taxa in first-seen order, ready for calibration lookups.
pub fn disambiguate_labels(tree: &mut GeneTree) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut first_seen = Vec::new();
    for id in tree.preorder() {
        if tree.is_tip(id) {
            continue;
        }
        let Some(name) = tree.node(id).label().map(str::to_string) else {
            continue;
        };
        let count = seen.entry(name.clone()).or_insert(0);
        if *count == 0 {
            first_seen.push(name);
        } else {
            tree.node_mut(id).name = Some(format!("{name}_{count}"));
        }
        *count += 1;
    }
    first_seen
}

/// Look up calibrations for each taxon, deduplicated by calibration id.
pub fn resolve_calibrations(
    store: &mut FossilStore,
    taxa: &[String],
) -> Result<Vec<FossilRecord>> {
    let mut records = Vec::new();
    let mut ids = HashSet::new();
    for taxon in taxa {
        for record in store.calibrations_for(taxon)? {
            if ids.insert(record.calibration_id.clone()) {
                records.push(record);
            }
        }
    }
    Ok(records)
}

/// Second pass: bind fossils to speciation nodes. Duplication-flagged nodes
/// are never calibration targets, and stem calibrations are not supported.
/// A fossil matching several paralogous copies is cloned once per copy with
/// suffixed taxa, and the nodes are renamed identically so the calibration
/// tool can address them by label. Unmatched fossils and uncalibrated nodes
/// are reported as warnings, never as failures.
pub fn map_fossils(tree: &mut GeneTree, fossils: &[FossilRecord]) -> FossilMapping {
    let mut mapping = FossilMapping::default();
    let eligible: Vec<NodeId> = tree
        .preorder()
        .into_iter()
        .filter(|&id| !tree.is_tip(id))
        .filter(|&id| tree.node(id).annotations.duplication != Some(true))
        .filter(|&id| tree.node(id).label().is_some())
        .collect();
    let mut calibrated: HashSet<NodeId> = HashSet::new();

    for fossil in fossils {
        if fossil.crown_or_stem != CrownOrStem::Crown {
            warn!(
                taxon = fossil.calibrated_taxon.as_str(),
                "stem calibrations are not supported, skipping"
            );
            mapping.warnings.push(MappingWarning {
                taxon: fossil.calibrated_taxon.clone(),
                reason: "stem calibration not supported".to_string(),
            });
            continue;
        }
        let matches: Vec<NodeId> = eligible
            .iter()
            .copied()
            .filter(|&id| {
                tree.node(id)
                    .label()
                    .is_some_and(|label| base_label(label) == fossil.calibrated_taxon)
            })
            .collect();
        if matches.is_empty() {
            warn!(
                taxon = fossil.calibrated_taxon.as_str(),
                "fossil matches no speciation node, dropping"
            );
            mapping.warnings.push(MappingWarning {
                taxon: fossil.calibrated_taxon.clone(),
                reason: "no matching speciation node".to_string(),
            });
            continue;
        }
        if matches.len() == 1 {
            let id = matches[0];
            let mut record = fossil.clone();
            record.calibrated_taxon = tree.node(id).label().unwrap_or_default().to_string();
            mapping.fossils.push(record);
            calibrated.insert(id);
            continue;
        }
        for (i, &id) in matches.iter().enumerate() {
            let clone_taxon = format!("{}_{}", fossil.calibrated_taxon, i + 1);
            tree.node_mut(id).name = Some(clone_taxon.clone());
            let mut record = fossil.clone();
            record.calibration_id = format!("{}_{}", fossil.calibration_id, i + 1);
            record.calibrated_taxon = clone_taxon;
            mapping.fossils.push(record);
            calibrated.insert(id);
        }
    }

    for id in eligible {
        if !calibrated.contains(&id) {
            if let Some(label) = tree.node(id).label() {
                warn!(taxon = label, "no fossil calibration for node");
                mapping.warnings.push(MappingWarning {
                    taxon: label.to_string(),
                    reason: "no fossil calibration".to_string(),
                });
            }
        }
    }
    mapping
}
