// Run Report
// Final status of every declared unit, stage and artifact of a run

use crate::artifacts::ArtifactRef;
use crate::execution::unit::StepResult;
use crate::parser::models::RunStatus;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Succeeded,
    Failed,
    /// Operator cancellation
    Canceled,
    /// Strict-mode condition error
    Aborted,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Succeeded => 0,
            RunOutcome::Failed => 1,
            RunOutcome::Aborted => 2,
            RunOutcome::Canceled => 130,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunOutcome::Succeeded => "Succeeded",
            RunOutcome::Failed => "Failed",
            RunOutcome::Canceled => "Canceled",
            RunOutcome::Aborted => "Aborted",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub name: String,
    pub stage: String,
    pub job: String,
    pub matrix: BTreeMap<String, String>,
    pub status: RunStatus,
    pub reason: Option<String>,
    pub steps: Vec<StepResult>,
    pub artifacts: Vec<ArtifactRef>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub status: RunStatus,
    pub reason: Option<String>,
    pub duration: Duration,
}

/// Every declared unit appears with a terminal status, dispatched or not
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub outcome: RunOutcome,
    pub units: Vec<UnitReport>,
    pub stages: Vec<StageReport>,
    /// Final variable values
    pub variables: BTreeMap<String, String>,
    pub artifacts: Vec<ArtifactRef>,
    pub duration: Duration,
}

impl RunReport {
    pub fn unit(&self, name: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.name == name)
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    /// Unit count per final status
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for unit in &self.units {
            *counts.entry(unit.status.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, status: RunStatus) -> UnitReport {
        UnitReport {
            name: name.to_string(),
            stage: "Build".to_string(),
            job: "Compile".to_string(),
            matrix: BTreeMap::new(),
            status,
            reason: None,
            steps: Vec::new(),
            artifacts: Vec::new(),
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::Succeeded.exit_code(), 0);
        assert_eq!(RunOutcome::Failed.exit_code(), 1);
        assert_eq!(RunOutcome::Aborted.exit_code(), 2);
        assert_eq!(RunOutcome::Canceled.exit_code(), 130);
    }

    #[test]
    fn test_counts_and_json() {
        let report = RunReport {
            pipeline: "ci".to_string(),
            outcome: RunOutcome::Failed,
            units: vec![
                unit("Build/Compile", RunStatus::Failed),
                unit("Test/Unit", RunStatus::Skipped),
                unit("Test/Lint", RunStatus::Skipped),
            ],
            stages: Vec::new(),
            variables: BTreeMap::new(),
            artifacts: Vec::new(),
            duration: Duration::from_secs(1),
        };

        assert_eq!(report.counts().get("Skipped"), Some(&2));
        assert_eq!(report.unit("Test/Unit").map(|u| u.status), Some(RunStatus::Skipped));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["outcome"], "Failed");
        assert_eq!(json["units"][0]["status"], "Failed");
    }
}
