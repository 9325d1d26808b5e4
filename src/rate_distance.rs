use std::io::Write;

use serde::Serialize;

use crate::error::Result;
use crate::gene_tree::{GeneTree, NodeId};
use crate::is_bare_label;

/// One output row: how far below its duplication event a branch sits in
/// absolute time, and how fast it evolves there. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateRecord {
    pub family_id: String,
    pub taxon: String,
    pub distance: f64,
    pub rate: f64,
    pub duplication_hash: String,
    pub tip_count: Option<usize>,
    pub mean_tip_height: Option<f64>,
}

/// A duplication event matched across the calibrated trees. The phylogram
/// member is optional; without it the derived tip statistics are left out.
#[derive(Debug, Clone)]
pub struct DuplicationAnchor {
    pub hash: String,
    pub chrono: NodeId,
    pub rato: NodeId,
    pub phylo: Option<NodeId>,
}

/// Walk the chronogram, ratogram and (optionally) phylogram in lock-step
/// below one duplication event, children taken in identical index order.
/// Every visited internal node yields a row, the event itself included at
/// distance zero; tips end a lineage silently. A visited node carrying a
/// bare label is a nested duplication event and stops the walk on that
/// branch without a row, since it anchors its own walk. For a fully
/// resolved subtree over t tips this emits t - 1 rows in pre-order.
pub fn traverse_duplication(
    family_id: &str,
    chrono: &GeneTree,
    rato: &GeneTree,
    phylo: Option<&GeneTree>,
    anchor: &DuplicationAnchor,
) -> Vec<RateRecord> {
    let dup_distance = chrono
        .node(anchor.chrono)
        .annotations
        .distance_from_root
        .unwrap_or(0.0);
    let taxon = chrono
        .node(anchor.chrono)
        .label()
        .unwrap_or_default()
        .to_string();
    let (tip_count, mean_tip_height) = match (phylo, anchor.phylo) {
        (Some(tree), Some(id)) => {
            let (count, height) = subtree_tip_stats(tree, id);
            (Some(count), Some(height))
        }
        _ => (None, None),
    };

    let mut rows = Vec::new();
    let mut stack: Vec<(NodeId, NodeId, Option<NodeId>, bool)> =
        vec![(anchor.chrono, anchor.rato, anchor.phylo, true)];
    while let Some((c_id, r_id, p_id, is_anchor)) = stack.pop() {
        if chrono.is_tip(c_id) {
            continue;
        }
        if !is_anchor {
            if let Some(label) = chrono.node(c_id).label() {
                if is_bare_label(label) {
                    continue;
                }
            }
        }
        let distance = chrono
            .node(c_id)
            .annotations
            .distance_from_root
            .unwrap_or(0.0)
            - dup_distance;
        let rate = rato.node(r_id).branch_length.unwrap_or(0.0);
        rows.push(RateRecord {
            family_id: family_id.to_string(),
            taxon: taxon.clone(),
            distance,
            rate,
            duplication_hash: anchor.hash.clone(),
            tip_count,
            mean_tip_height,
        });
        let c_children = &chrono.node(c_id).children;
        let r_children = &rato.node(r_id).children;
        for i in (0..c_children.len()).rev() {
            let Some(&r_child) = r_children.get(i) else {
                continue;
            };
            let p_child = match (phylo, p_id) {
                (Some(tree), Some(pid)) => tree.node(pid).children.get(i).copied(),
                _ => None,
            };
            stack.push((c_children[i], r_child, p_child, false));
        }
    }
    rows
}

/// Tip count and mean tip height under one node, heights taken net of the
/// node's own root distance.
fn subtree_tip_stats(tree: &GeneTree, top: NodeId) -> (usize, f64) {
    let base = tree
        .node(top)
        .annotations
        .distance_from_root
        .unwrap_or(0.0);
    let mut count = 0usize;
    let mut total = 0.0;
    let mut stack = vec![top];
    while let Some(id) = stack.pop() {
        if tree.is_tip(id) && id != top {
            count += 1;
            total += tree.node(id).annotations.distance_from_root.unwrap_or(0.0) - base;
            continue;
        }
        stack.extend(tree.node(id).children.iter().copied());
    }
    if count == 0 {
        (0, 0.0)
    } else {
        (count, total / count as f64)
    }
}

/// Tab-separated output. The two-tree variant drops the phylogram-derived
/// columns.
pub fn write_rate_table<W: Write>(
    writer: W,
    rows: &[RateRecord],
    with_phylogram: bool,
) -> Result<()> {
    let mut out = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    if with_phylogram {
        out.write_record([
            "familyId",
            "taxon",
            "distance",
            "rate",
            "duplicationHash",
            "tipCount",
            "meanHeight",
        ])?;
    } else {
        out.write_record(["familyId", "taxon", "distance", "rate", "duplicationHash"])?;
    }
    for row in rows {
        let mut record = vec![
            row.family_id.clone(),
            row.taxon.clone(),
            row.distance.to_string(),
            row.rate.to_string(),
            row.duplication_hash.clone(),
        ];
        if with_phylogram {
            record.push(row.tip_count.map(|c| c.to_string()).unwrap_or_default());
            record.push(
                row.mean_tip_height
                    .map(|h| h.to_string())
                    .unwrap_or_default(),
            );
        }
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}
