use lazy_static::lazy_static;
use regex::Regex;

pub mod alignment;
pub mod calibration_runner;
pub mod config;
pub mod error;
pub mod fossil_calibrations;
pub mod fossil_mapper;
pub mod gene_tree;
pub mod newick;
pub mod outlier_pruner;
pub mod pipeline;
pub mod rate_distance;
pub mod topology_index;

lazy_static! {
    // Instance suffix appended to repeated internal taxon labels (e.g. "Primates_2")
    pub static ref DUPLICATE_SUFFIX: Regex = Regex::new(r"_\d+$").unwrap();

    // Labeled tree line in the calibration tool's output log
    pub static ref TOOL_TREE_LINE: Regex = Regex::new(r"^\s*tree\s+(\S+)\s*=\s*(\(.*;)\s*$").unwrap();
}

/// A bare label names a duplication/speciation event directly; a suffixed one
/// is a disambiguated paralog copy.
pub fn is_bare_label(label: &str) -> bool {
    !label.is_empty() && !DUPLICATE_SUFFIX.is_match(label)
}

pub fn base_label(label: &str) -> String {
    DUPLICATE_SUFFIX.replace(label, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixed_labels_are_not_bare() {
        assert!(is_bare_label("Euarchontoglires"));
        assert!(!is_bare_label("Euarchontoglires_2"));
        assert!(!is_bare_label(""));
    }

    #[test]
    fn base_label_strips_one_instance_suffix() {
        assert_eq!(base_label("Primates_12"), "Primates");
        assert_eq!(base_label("Primates"), "Primates");
        assert_eq!(base_label("PPARG_HUMAN"), "PPARG_HUMAN".to_string());
    }
}
