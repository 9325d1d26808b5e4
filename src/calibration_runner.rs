use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{ChronorateError, Result};
use crate::fossil_calibrations::FossilRecord;
use crate::gene_tree::GeneTree;
use crate::newick;
use crate::TOOL_TREE_LINE;

pub const DEFAULT_TEMPLATE: &str = include_str!("../assets/r8s_batch.template");
pub const PASSED_MARKER: &str = "PASSED";

/// The three calibrated renditions of one family, exactly as printed by the
/// tool: branch lengths in substitution rate, absolute time, and raw
/// substitution distance.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedTrees {
    pub ratogram: String,
    pub chronogram: String,
    pub phylogram: String,
}

/// Boundary to the external divergence-time estimator. The tool is driven
/// through a generated command script and read through its combined log;
/// nothing else is assumed about it.
pub struct CalibrationRunner {
    command: String,
    args: Vec<String>,
    template: String,
    timeout: Option<Duration>,
}

impl CalibrationRunner {
    pub fn new(
        command: String,
        args: Vec<String>,
        template: Option<String>,
        timeout: Option<Duration>,
    ) -> Self {
        CalibrationRunner {
            command,
            args,
            template: template.unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            timeout,
        }
    }

    /// Fill the command template. `{TREE}` receives the serialized tree,
    /// `{NSITES}` the alignment length, `{CONSTRAINTS}` one constraint line
    /// per fossil addressing its node by label.
    pub fn build_script(
        &self,
        tree_newick: &str,
        alignment_length: usize,
        fossils: &[FossilRecord],
    ) -> String {
        let constraints = fossils
            .iter()
            .map(constraint_line)
            .collect::<Vec<_>>()
            .join("\n");
        self.template
            .replace("{TREE}", tree_newick)
            .replace("{NSITES}", &alignment_length.to_string())
            .replace("{CONSTRAINTS}", &constraints)
    }

    /// Serialize, write the script to a scratch directory, run the tool to
    /// completion and hand back its combined output.
    pub fn run_calibration(
        &self,
        tree: &GeneTree,
        alignment_length: usize,
        fossils: &[FossilRecord],
    ) -> Result<String> {
        let script = self.build_script(&newick::write(tree, false), alignment_length, fossils);
        let workdir = tempfile::tempdir()?;
        let script_path = workdir.path().join("calibration.nex");
        fs::write(&script_path, &script)?;
        let log_path = workdir.path().join("calibration.log");
        info!(command = self.command.as_str(), "running calibration");
        self.invoke(&script_path, &log_path)
    }

    fn invoke(&self, script_path: &Path, log_path: &Path) -> Result<String> {
        let log = File::create(log_path)?;
        let log_err = log.try_clone()?;
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .arg(script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        debug!(command = ?command, "invoking");
        let mut child = command.spawn().map_err(|e| {
            ChronorateError::external_tool(format!("could not start '{}': {e}", self.command))
        })?;
        let status = match self.timeout {
            None => child.wait()?,
            Some(limit) => {
                let started = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if started.elapsed() > limit {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ChronorateError::external_tool(format!(
                            "'{}' timed out after {}s",
                            self.command,
                            limit.as_secs()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        };
        let output = fs::read_to_string(log_path)?;
        if !status.success() {
            return Err(ChronorateError::external_tool(format!(
                "'{}' exited with {status}",
                self.command
            )));
        }
        if output.trim().is_empty() {
            return Err(ChronorateError::external_tool(format!(
                "'{}' produced no output",
                self.command
            )));
        }
        Ok(output)
    }
}

fn constraint_line(fossil: &FossilRecord) -> String {
    let mut line = format!("constrain taxon={}", fossil.calibrated_taxon);
    if let Some(min_age) = fossil.min_age {
        line.push_str(&format!(" min_age={min_age}"));
    }
    if let Some(max_age) = fossil.max_age {
        line.push_str(&format!(" max_age={max_age}"));
    }
    line.push(';');
    line
}

/// Scan the tool's log for the pass marker, then pull out the next three
/// labeled tree strings. The tool prints them as ratogram, chronogram,
/// phylogram, in that order.
pub fn parse_result(raw: &str) -> Result<CalibratedTrees> {
    let mut passed = false;
    let mut trees: Vec<String> = Vec::new();
    for line in raw.lines() {
        if !passed {
            if line.contains(PASSED_MARKER) {
                passed = true;
            }
            continue;
        }
        if trees.len() == 3 {
            break;
        }
        if let Some(captures) = TOOL_TREE_LINE.captures(line) {
            trees.push(captures[2].to_string());
        }
    }
    if !passed {
        return Err(ChronorateError::calibration_failed(
            "no PASSED marker in tool output",
        ));
    }
    if trees.len() < 3 {
        return Err(ChronorateError::parse(format!(
            "expected 3 trees after the pass marker, found {}",
            trees.len()
        )));
    }
    let phylogram = trees.pop().unwrap_or_default();
    let chronogram = trees.pop().unwrap_or_default();
    let ratogram = trees.pop().unwrap_or_default();
    Ok(CalibratedTrees {
        ratogram,
        chronogram,
        phylogram,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fossil_calibrations::CrownOrStem;

    const PASSED_LOG: &str = include_str!("../test_files/r8s/ppar.passed.log");
    const FAILED_LOG: &str = include_str!("../test_files/r8s/ppar.failed.log");

    fn fossil(taxon: &str) -> FossilRecord {
        FossilRecord {
            calibration_id: format!("FC-{taxon}"),
            calibrated_taxon: taxon.to_string(),
            crown_or_stem: CrownOrStem::Crown,
            min_age: Some(61.6),
            max_age: Some(100.5),
            source: None,
        }
    }

    #[test]
    fn the_template_placeholders_are_filled() {
        let runner = CalibrationRunner::new("r8s".to_string(), vec![], None, None);
        let script = runner.build_script("(A:1,B:2);", 1212, &[fossil("Euarchontoglires_1")]);
        assert!(script.contains("tree family = (A:1,B:2);"));
        assert!(script.contains("nsites=1212"));
        assert!(script
            .contains("constrain taxon=Euarchontoglires_1 min_age=61.6 max_age=100.5;"));
        assert!(!script.contains("{TREE}"));
        assert!(!script.contains("{CONSTRAINTS}"));
    }

    #[test]
    fn a_passed_log_yields_three_trees_in_order() {
        let trees = parse_result(PASSED_LOG).unwrap();
        assert!(trees.ratogram.contains("HUMAN_PPARA:0.01"));
        assert!(trees.chronogram.contains("HUMAN_PPARA:80"));
        assert!(trees.phylogram.contains("HUMAN_PPARA:0.12"));
    }

    #[test]
    fn a_log_without_the_marker_is_a_calibration_failure() {
        assert!(matches!(
            parse_result(FAILED_LOG),
            Err(ChronorateError::CalibrationFailed(_))
        ));
    }

    #[test]
    fn too_few_trees_after_the_marker_is_a_parse_error() {
        let raw = "PASSED\ntree ratogram = (A:1,B:2);\n";
        assert!(matches!(parse_result(raw), Err(ChronorateError::Parse(_))));
    }

    #[test]
    fn a_missing_tool_is_an_external_tool_error() {
        let runner = CalibrationRunner::new(
            "definitely-not-a-real-tool".to_string(),
            vec![],
            None,
            None,
        );
        let tree = crate::newick::parse("(A:1,B:2);").unwrap();
        let result = runner.run_calibration(&tree, 100, &[]);
        assert!(matches!(result, Err(ChronorateError::ExternalTool(_))));
    }

    #[test]
    fn a_hanging_tool_is_killed_after_the_timeout() {
        let runner = CalibrationRunner::new(
            "sh".to_string(),
            vec!["-c".to_string(), "sleep 30".to_string()],
            None,
            Some(Duration::from_millis(200)),
        );
        let tree = crate::newick::parse("(A:1,B:2);").unwrap();
        let result = runner.run_calibration(&tree, 100, &[]);
        match result {
            Err(ChronorateError::ExternalTool(message)) => {
                assert!(message.contains("timed out"), "unexpected: {message}")
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[test]
    fn a_silent_tool_is_an_external_tool_error() {
        let runner = CalibrationRunner::new("true".to_string(), vec![], None, None);
        let tree = crate::newick::parse("(A:1,B:2);").unwrap();
        let result = runner.run_calibration(&tree, 100, &[]);
        match result {
            Err(ChronorateError::ExternalTool(message)) => {
                assert!(message.contains("no output"), "unexpected: {message}")
            }
            other => panic!("expected an error, got {other:?}"),
        }
    }
}
