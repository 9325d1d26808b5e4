use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use sha1::{Digest, Sha1};

use crate::gene_tree::{GeneTree, NodeId};
use crate::is_bare_label;

pub const SLOT_CHRONOGRAM: usize = 0;
pub const SLOT_RATOGRAM: usize = 1;
pub const SLOT_PHYLOGRAM: usize = 2;

/// Cross-tree map from topology hash to the bare-labeled internal nodes
/// carrying it, in the order the trees were indexed. Indexing the chronogram,
/// ratogram and phylogram in that order lets callers destructure a bucket
/// positionally. Unrelated events hashing identically would share a bucket;
/// the tip-set digest is accepted as-is.
#[derive(Debug, Default)]
pub struct DuplicationIndex {
    buckets: BTreeMap<String, Vec<(usize, NodeId)>>,
}

impl DuplicationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, hash: String, slot: usize, id: NodeId) {
        self.buckets.entry(hash).or_default().push((slot, id));
    }

    pub fn get(&self, hash: &str) -> Option<&[(usize, NodeId)]> {
        self.buckets.get(hash).map(|bucket| bucket.as_slice())
    }

    /// Buckets in stable hash order.
    pub fn buckets(&self) -> impl Iterator<Item = (&str, &[(usize, NodeId)])> {
        self.buckets
            .iter()
            .map(|(hash, bucket)| (hash.as_str(), bucket.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Digest of the sorted tip-label set under a node. Child order does not
/// matter; the set alone identifies the split.
pub fn tip_set_hash(tips: &BTreeSet<String>) -> String {
    let mut hasher = Sha1::new();
    hasher.update(tips.iter().join(",").as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// One depth-first pass: root distances downward, tip sets and topology
/// hashes upward. Bare-labeled internal nodes are registered in the index
/// under the given tree slot.
pub fn index_tree(tree: &mut GeneTree, slot: usize, index: &mut DuplicationIndex) {
    tree.depth_first(
        |t, id| {
            let distance = match t.node(id).parent {
                None => 0.0,
                Some(parent) => {
                    let above = t
                        .node(parent)
                        .annotations
                        .distance_from_root
                        .unwrap_or(0.0);
                    above + t.node(id).branch_length.unwrap_or(0.0)
                }
            };
            t.node_mut(id).annotations.distance_from_root = Some(distance);
        },
        |t, id| {
            if t.is_tip(id) {
                let mut set = BTreeSet::new();
                if let Some(name) = t.node(id).label() {
                    set.insert(name.to_string());
                }
                t.node_mut(id).annotations.tip_set = Some(set);
                return;
            }
            let mut set = BTreeSet::new();
            for i in 0..t.node(id).children.len() {
                let child = t.node(id).children[i];
                if let Some(child_set) = t.node(child).annotations.tip_set.as_ref() {
                    set.extend(child_set.iter().cloned());
                }
            }
            let hash = tip_set_hash(&set);
            {
                let annotations = &mut t.node_mut(id).annotations;
                annotations.tip_set = Some(set);
                annotations.topology_hash = Some(hash.clone());
            }
            if let Some(name) = t.node(id).label() {
                if is_bare_label(name) {
                    index.push(hash, slot, id);
                }
            }
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick;

    #[test]
    fn distances_accumulate_from_the_root() {
        let mut tree = newick::parse("((A:5,B:5)ab:5,(C:7,D:7)cd:3)root;").unwrap();
        let mut index = DuplicationIndex::new();
        index_tree(&mut tree, SLOT_CHRONOGRAM, &mut index);
        let by_label = |label: &str| {
            tree.preorder()
                .into_iter()
                .find(|&id| tree.node(id).label() == Some(label))
                .unwrap()
        };
        let distance =
            |label: &str| tree.node(by_label(label)).annotations.distance_from_root.unwrap();
        assert_eq!(distance("root"), 0.0);
        assert_eq!(distance("ab"), 5.0);
        assert_eq!(distance("A"), 10.0);
        assert_eq!(distance("cd"), 3.0);
        assert_eq!(distance("D"), 10.0);
    }

    #[test]
    fn hash_is_deterministic_across_reindexing() {
        let text = "((A,B)ab,(C,D)cd)root;";
        let mut first = newick::parse(text).unwrap();
        let mut second = newick::parse(text).unwrap();
        index_tree(&mut first, SLOT_CHRONOGRAM, &mut DuplicationIndex::new());
        index_tree(&mut second, SLOT_CHRONOGRAM, &mut DuplicationIndex::new());
        for (a, b) in first.preorder().into_iter().zip(second.preorder()) {
            assert_eq!(
                first.node(a).annotations.topology_hash,
                second.node(b).annotations.topology_hash
            );
        }
    }

    #[test]
    fn hash_ignores_child_order() {
        let mut forward = newick::parse("((A,B)ab,(C,D)cd)root;").unwrap();
        let mut flipped = newick::parse("((D,C)cd,(B,A)ab)root;").unwrap();
        index_tree(&mut forward, SLOT_CHRONOGRAM, &mut DuplicationIndex::new());
        index_tree(&mut flipped, SLOT_CHRONOGRAM, &mut DuplicationIndex::new());
        let hash_of = |tree: &GeneTree, label: &str| {
            tree.preorder()
                .into_iter()
                .find(|&id| tree.node(id).label() == Some(label))
                .and_then(|id| tree.node(id).annotations.topology_hash.clone())
                .unwrap()
        };
        assert_eq!(hash_of(&forward, "ab"), hash_of(&flipped, "ab"));
        assert_eq!(hash_of(&forward, "cd"), hash_of(&flipped, "cd"));
        assert_eq!(hash_of(&forward, "root"), hash_of(&flipped, "root"));
    }

    #[test]
    fn buckets_hold_one_node_per_tree_in_indexing_order() {
        let text = "((A,B)ab,(C,D)cd)root;";
        let mut chrono = newick::parse(text).unwrap();
        let mut rato = newick::parse(text).unwrap();
        let mut phylo = newick::parse(text).unwrap();
        let mut index = DuplicationIndex::new();
        index_tree(&mut chrono, SLOT_CHRONOGRAM, &mut index);
        index_tree(&mut rato, SLOT_RATOGRAM, &mut index);
        index_tree(&mut phylo, SLOT_PHYLOGRAM, &mut index);
        assert_eq!(index.len(), 3);
        for (_, bucket) in index.buckets() {
            let slots: Vec<_> = bucket.iter().map(|&(slot, _)| slot).collect();
            assert_eq!(slots, vec![SLOT_CHRONOGRAM, SLOT_RATOGRAM, SLOT_PHYLOGRAM]);
        }
    }

    #[test]
    fn suffixed_and_unlabeled_internal_nodes_stay_out_of_the_index() {
        let mut tree = newick::parse("((A,B)Primates_2,(C,D))Primates;").unwrap();
        let mut index = DuplicationIndex::new();
        index_tree(&mut tree, SLOT_CHRONOGRAM, &mut index);
        assert_eq!(index.len(), 1);
        let root_hash = tree
            .node(tree.root())
            .annotations
            .topology_hash
            .clone()
            .unwrap();
        assert!(index.get(&root_hash).is_some());
    }
}
