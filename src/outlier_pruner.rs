use tracing::debug;

use crate::error::{ChronorateError, Result};
use crate::gene_tree::GeneTree;

pub const DEFAULT_DEVIATION_MULTIPLIER: f64 = 8.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneReport {
    pub iterations: usize,
    pub pruned_tips: usize,
}

/// Iteratively drop terminal branches whose length sits outside
/// `mean ± multiplier * stdev` of the remaining tips, re-estimating the
/// statistics after every pass. Terminates because each pass strictly
/// reduces the tip count; a pass that flags every remaining tip is an error.
pub fn prune_outliers(tree: &mut GeneTree, multiplier: f64) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    loop {
        let tips = tree.tips();
        if tips.len() < 2 {
            break;
        }
        let lengths: Vec<f64> = tips
            .iter()
            .map(|&tip| tree.node(tip).branch_length.unwrap_or(0.0))
            .collect();
        let n = lengths.len() as f64;
        let mean = lengths.iter().sum::<f64>() / n;
        let variance = lengths
            .iter()
            .map(|length| (length - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        let limit = multiplier * variance.sqrt();
        let outliers: Vec<_> = tips
            .iter()
            .zip(&lengths)
            .filter(|&(_, &length)| (length - mean).abs() > limit)
            .map(|(&tip, _)| tip)
            .collect();
        if outliers.is_empty() {
            break;
        }
        if outliers.len() == tips.len() {
            return Err(ChronorateError::prune(format!(
                "all {} remaining tips flagged as outliers",
                tips.len()
            )));
        }
        debug!(
            flagged = outliers.len(),
            mean,
            limit,
            "pruning outlier tips"
        );
        tree.prune_tips(&outliers)?;
        report.iterations += 1;
        report.pruned_tips += outliers.len();
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick;

    fn star_tree(lengths: &[f64]) -> GeneTree {
        let inner = lengths
            .iter()
            .enumerate()
            .map(|(i, length)| format!("T{i}:{length}"))
            .collect::<Vec<_>>()
            .join(",");
        newick::parse(&format!("({inner});")).unwrap()
    }

    #[test]
    fn a_single_runaway_tip_is_pruned() {
        let mut lengths = vec![0.1; 9];
        lengths.push(1000.0);
        let mut tree = star_tree(&lengths);
        let report = prune_outliers(&mut tree, 2.0).unwrap();
        assert_eq!(report.pruned_tips, 1);
        assert_eq!(report.iterations, 1);
        assert_eq!(tree.tip_count(), 9);
    }

    #[test]
    fn pruning_is_idempotent_at_the_fixed_point() {
        let mut lengths = vec![0.1; 9];
        lengths.push(1000.0);
        let mut tree = star_tree(&lengths);
        prune_outliers(&mut tree, 2.0).unwrap();
        let again = prune_outliers(&mut tree, 2.0).unwrap();
        assert_eq!(again, PruneReport::default());
        assert_eq!(tree.tip_count(), 9);
    }

    #[test]
    fn uniform_lengths_are_never_flagged() {
        let mut tree = star_tree(&[0.2; 6]);
        let report = prune_outliers(&mut tree, 8.0).unwrap();
        assert_eq!(report, PruneReport::default());
        assert_eq!(tree.tip_count(), 6);
    }

    #[test]
    fn flagging_every_tip_at_once_is_an_error() {
        let mut tree = star_tree(&[1.0, 100.0]);
        let result = prune_outliers(&mut tree, 0.1);
        assert!(matches!(result, Err(ChronorateError::Prune(_))));
        // the tree itself is untouched
        assert_eq!(tree.tip_count(), 2);
    }
}
