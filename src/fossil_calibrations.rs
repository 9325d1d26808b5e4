use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;

pub const DEFAULT_FOSSIL_CACHE_DIR: &str = "data/fossils";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrownOrStem {
    Crown,
    Stem,
}

/// One fossil calibration as served by the remote database. Age bounds are
/// passed through to the calibration tool untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FossilRecord {
    pub calibration_id: String,
    pub calibrated_taxon: String,
    pub crown_or_stem: CrownOrStem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_age: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// File-per-taxon calibration store: `<cache_dir>/<taxon>.json` is reused
/// when present, fetched from the remote service and written otherwise. An
/// empty fetch result is cached too, so repeat runs stay offline. Concurrent
/// runs racing on a cache file are a known, accepted hazard.
pub struct FossilStore {
    cache_dir: PathBuf,
    service_url: Option<String>,
    client: reqwest::blocking::Client,
    remote_fetches: usize,
}

impl FossilStore {
    pub fn new(cache_dir: impl Into<PathBuf>, service_url: Option<String>) -> Self {
        FossilStore {
            cache_dir: cache_dir.into(),
            service_url,
            client: reqwest::blocking::Client::new(),
            remote_fetches: 0,
        }
    }

    /// Remote requests issued over the lifetime of this store.
    pub fn remote_fetches(&self) -> usize {
        self.remote_fetches
    }

    pub fn cache_path(&self, taxon: &str) -> PathBuf {
        self.cache_dir.join(format!("{taxon}.json"))
    }

    pub fn calibrations_for(&mut self, taxon: &str) -> Result<Vec<FossilRecord>> {
        let path = self.cache_path(taxon);
        if path.exists() {
            let text = fs::read_to_string(&path)?;
            let records: Vec<FossilRecord> = serde_json::from_str(&text)?;
            debug!(taxon, records = records.len(), "fossil cache hit");
            return Ok(records);
        }
        let Some(base) = self.service_url.clone() else {
            warn!(taxon, "no cached calibrations and no service configured");
            return Ok(Vec::new());
        };
        let records = self.fetch_remote(&base, taxon)?;
        self.write_cache(&path, &records)?;
        Ok(records)
    }

    fn fetch_remote(&mut self, base: &str, taxon: &str) -> Result<Vec<FossilRecord>> {
        self.remote_fetches += 1;
        info!(taxon, "fetching fossil calibrations");
        let records = self
            .client
            .get(format!("{}/calibrations", base.trim_end_matches('/')))
            .query(&[("taxon", taxon)])
            .send()?
            .error_for_status()?
            .json::<Vec<FossilRecord>>()?;
        debug!(taxon, records = records.len(), "fetched");
        Ok(records)
    }

    fn write_cache(&self, path: &Path, records: &[FossilRecord]) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_string_pretty(records)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EUARCHONTOGLIRES: &str =
        include_str!("../test_files/fossils/Euarchontoglires.json");

    #[test]
    fn cached_taxa_are_served_without_remote_fetches() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Euarchontoglires.json"), EUARCHONTOGLIRES).unwrap();
        let mut store = FossilStore::new(dir.path(), None);
        let records = store.calibrations_for("Euarchontoglires").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].calibration_id, "FC-0042");
        assert_eq!(records[0].crown_or_stem, CrownOrStem::Crown);
        assert_eq!(records[0].min_age, Some(61.6));
        assert_eq!(store.remote_fetches(), 0);
    }

    #[test]
    fn repeat_reads_are_identical_and_still_offline() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Euarchontoglires.json"), EUARCHONTOGLIRES).unwrap();
        let mut store = FossilStore::new(dir.path(), None);
        let first = store.calibrations_for("Euarchontoglires").unwrap();
        let second = store.calibrations_for("Euarchontoglires").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.remote_fetches(), 0);
    }

    #[test]
    fn unknown_taxon_without_a_service_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FossilStore::new(dir.path(), None);
        let records = store.calibrations_for("Rodentia").unwrap();
        assert!(records.is_empty());
        assert_eq!(store.remote_fetches(), 0);
        // nothing fetched, nothing cached
        assert!(!store.cache_path("Rodentia").exists());
    }

    #[test]
    fn a_corrupt_cache_file_is_a_serde_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Primates.json"), "not json").unwrap();
        let mut store = FossilStore::new(dir.path(), None);
        assert!(store.calibrations_for("Primates").is_err());
    }
}
