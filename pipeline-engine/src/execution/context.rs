// Run Context
// Versioned variables and trigger metadata shared by conditions and steps

use serde::Serialize;
use std::collections::BTreeMap;

/// Versioned variable map.
///
/// Units get a snapshot at dispatch; the scheduler applies writes
/// between completions and bumps the version.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Variables {
    version: u64,
    values: BTreeMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: BTreeMap<String, String>) -> Self {
        Self { version: 0, values }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Case-insensitive lookup, exact match first
    pub fn get(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.values.get(name) {
            return Some(value);
        }
        self.values
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Insert without bumping the version, used while layering scopes
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if let Some(existing) = self
            .values
            .keys()
            .find(|key| key.eq_ignore_ascii_case(&name))
            .cloned()
        {
            self.values.remove(&existing);
        }
        self.values.insert(name, value.into());
    }

    /// A copy with `overlay` layered on top; the version is kept
    pub fn layered(&self, overlay: &BTreeMap<String, String>) -> Self {
        let mut layered = self.clone();
        for (name, value) in overlay {
            layered.insert(name.clone(), value.clone());
        }
        layered
    }

    /// Apply a batch of writes as one new version
    pub fn apply<I>(&mut self, writes: I) -> u64
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut changed = false;
        for (name, value) in writes {
            self.insert(name, value);
            changed = true;
        }
        if changed {
            self.version += 1;
        }
        self.version
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }
}

/// What started the run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TriggerContext {
    pub branch: String,
    pub reason: String,
    pub repository: String,
}

impl TriggerContext {
    pub fn new(
        branch: impl Into<String>,
        reason: impl Into<String>,
        repository: impl Into<String>,
    ) -> Self {
        Self {
            branch: branch.into(),
            reason: reason.into(),
            repository: repository.into(),
        }
    }

    /// Branch without any `refs/heads/` prefix
    pub fn branch_name(&self) -> &str {
        self.branch
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.branch)
    }

    /// Fully qualified source branch
    pub fn source_branch(&self) -> String {
        if self.branch.is_empty() || self.branch.starts_with("refs/") {
            self.branch.clone()
        } else {
            format!("refs/heads/{}", self.branch)
        }
    }

    /// Predefined `Build.*` variables derived from the trigger
    pub fn predefined(&self, name: &str) -> Option<String> {
        match name.to_lowercase().as_str() {
            "build.sourcebranch" => Some(self.source_branch()),
            "build.sourcebranchname" => Some(
                self.branch_name()
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string(),
            ),
            "build.reason" => Some(self.reason.clone()),
            "build.repository.name" => Some(self.repository.clone()),
            _ => None,
        }
    }

    /// Predefined variables as environment-ready pairs
    pub fn predefined_variables(&self) -> Vec<(String, String)> {
        [
            "Build.SourceBranch",
            "Build.SourceBranchName",
            "Build.Reason",
            "Build.Repository.Name",
        ]
        .iter()
        .filter_map(|name| self.predefined(name).map(|v| (name.to_string(), v)))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_get() {
        let mut vars = Variables::new();
        vars.insert("Configuration", "Release");
        assert_eq!(vars.get("configuration"), Some("Release"));
        assert_eq!(vars.get("missing"), None);
    }

    #[test]
    fn test_insert_replaces_differently_cased_key() {
        let mut vars = Variables::new();
        vars.insert("Config", "Debug");
        vars.insert("CONFIG", "Release");
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get("config"), Some("Release"));
    }

    #[test]
    fn test_apply_bumps_version_once_per_batch() {
        let mut vars = Variables::new();
        let version = vars.apply(vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        assert_eq!(version, 1);
        assert_eq!(vars.apply(Vec::new()), 1);
    }

    #[test]
    fn test_layered_keeps_base() {
        let base = Variables::from_map(BTreeMap::from([("x".to_string(), "1".to_string())]));
        let layered = base.layered(&BTreeMap::from([("x".to_string(), "2".to_string())]));
        assert_eq!(base.get("x"), Some("1"));
        assert_eq!(layered.get("x"), Some("2"));
    }

    #[test]
    fn test_predefined_variables() {
        let trigger = TriggerContext::new("feature/login", "PullRequest", "app");
        assert_eq!(
            trigger.predefined("Build.SourceBranch").as_deref(),
            Some("refs/heads/feature/login")
        );
        assert_eq!(
            trigger.predefined("build.sourcebranchname").as_deref(),
            Some("login")
        );
        assert_eq!(trigger.predefined("Build.Reason").as_deref(), Some("PullRequest"));
        assert_eq!(trigger.predefined("Build.Other"), None);
    }

    #[test]
    fn test_branch_name_strips_prefix() {
        let trigger = TriggerContext::new("refs/heads/main", "", "");
        assert_eq!(trigger.branch_name(), "main");
        assert_eq!(trigger.source_branch(), "refs/heads/main");
    }
}
