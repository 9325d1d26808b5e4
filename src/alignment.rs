use std::fs::File;
use std::path::Path;

use bio::io::fasta;

use crate::error::{ChronorateError, Result};

/// Length of the family alignment, in columns. All records must agree on
/// it; a ragged file is malformed, an empty one unusable.
pub fn alignment_length(path: &Path) -> Result<usize> {
    let file = File::open(path)?;
    let reader = fasta::Reader::new(file);
    let mut length: Option<usize> = None;
    for record in reader.records() {
        let record = record.map_err(|e| {
            ChronorateError::parse(format!("bad FASTA record in {}: {e}", path.display()))
        })?;
        let current = record.seq().len();
        match length {
            None => length = Some(current),
            Some(expected) if expected != current => {
                return Err(ChronorateError::parse(format!(
                    "ragged alignment in {}: {expected} vs {current} columns",
                    path.display()
                )));
            }
            Some(_) => {}
        }
    }
    match length {
        Some(length) if length > 0 => Ok(length),
        _ => Err(ChronorateError::parse(format!(
            "empty alignment in {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn fixture() -> PathBuf {
        PathBuf::from(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/test_files/alignments/ppar.fa"
        ))
    }

    #[test]
    fn reads_the_column_count_of_an_aligned_family() {
        assert_eq!(alignment_length(&fixture()).unwrap(), 24);
    }

    #[test]
    fn a_ragged_alignment_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.fa");
        fs::write(&path, ">a\nACGT\n>b\nACG\n").unwrap();
        assert!(matches!(
            alignment_length(&path),
            Err(ChronorateError::Parse(_))
        ));
    }

    #[test]
    fn an_empty_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.fa");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            alignment_length(&path),
            Err(ChronorateError::Parse(_))
        ));
    }

    #[test]
    fn a_missing_file_is_an_io_error() {
        let path = PathBuf::from("/no/such/alignment.fa");
        assert!(matches!(
            alignment_length(&path),
            Err(ChronorateError::Io(_))
        ));
    }
}
