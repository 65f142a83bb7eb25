// Targeting
// Narrows a run to selected Stage/Job paths and, optionally, matrix values

use crate::parser::models::MatrixFilter;

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetError {
    pub selector: String,
    pub message: String,
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid target '{}': {}", self.selector, self.message)
    }
}

impl std::error::Error for TargetError {}

/// One `--target` value: a glob over `Stage/Job` (or over the job name
/// when it has no `/`) plus optional `[axis=value,...]` matrix filters
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSelector {
    pattern: String,
    filters: Vec<MatrixFilter>,
}

impl TargetSelector {
    pub fn parse(text: &str) -> Result<Self, TargetError> {
        let invalid = |message: &str| TargetError {
            selector: text.to_string(),
            message: message.to_string(),
        };

        let text = text.trim();
        let (pattern, filters) = match split_matrix_suffix(text) {
            Some((pattern, body)) => (pattern, parse_filters(body).map_err(|m| invalid(&m))?),
            None => (text, Vec::new()),
        };

        if pattern.is_empty() {
            return Err(invalid("empty stage/job pattern"));
        }
        if pattern.matches('/').count() > 1 {
            return Err(invalid("expected 'Stage/Job' or 'Job'"));
        }

        Ok(Self {
            pattern: pattern.to_lowercase(),
            filters,
        })
    }

    pub fn matches(&self, stage: &str, job: &str) -> bool {
        let subject = if self.pattern.contains('/') {
            format!("{}/{}", stage, job).to_lowercase()
        } else {
            job.to_lowercase()
        };
        glob_match::glob_match(&self.pattern, &subject)
    }

    pub fn filters(&self) -> &[MatrixFilter] {
        &self.filters
    }
}

/// How much of a job a target filter selects
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    NotTargeted,
    All,
    /// Matrix combinations accepted by any one of these filter groups
    Matrix(Vec<Vec<MatrixFilter>>),
}

/// Union of selectors; empty selects everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetFilter {
    selectors: Vec<TargetSelector>,
}

impl TargetFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn parse_all<S: AsRef<str>>(selectors: &[S]) -> Result<Self, TargetError> {
        let selectors = selectors
            .iter()
            .map(|s| TargetSelector::parse(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { selectors })
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn select(&self, stage: &str, job: &str) -> Selection {
        if self.selectors.is_empty() {
            return Selection::All;
        }

        let mut groups = Vec::new();
        for selector in self.selectors.iter().filter(|s| s.matches(stage, job)) {
            if selector.filters.is_empty() {
                return Selection::All;
            }
            groups.push(selector.filters.clone());
        }

        if groups.is_empty() {
            Selection::NotTargeted
        } else {
            Selection::Matrix(groups)
        }
    }
}

/// `Test/Unit[os=linux]` splits into `Test/Unit` and `os=linux`. A
/// bracket that holds no `=` is glob syntax and stays in the pattern.
fn split_matrix_suffix(text: &str) -> Option<(&str, &str)> {
    let body_end = text.strip_suffix(']')?;
    let open = body_end.rfind('[')?;
    let body = &body_end[open + 1..];
    body.contains('=').then(|| (&text[..open], body))
}

/// `os=linux,windows,pyver=3.9`: a piece without `=` adds a value to the previous axis
fn parse_filters(body: &str) -> Result<Vec<MatrixFilter>, String> {
    let mut filters: Vec<MatrixFilter> = Vec::new();
    for piece in body.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match piece.split_once('=') {
            Some((axis, value)) => {
                let (axis, value) = (axis.trim(), value.trim());
                if axis.is_empty() || value.is_empty() {
                    return Err(format!("invalid matrix filter '{}'", piece));
                }
                match filters.iter_mut().find(|f| f.axis == axis) {
                    Some(existing) => existing.values.push(value.to_string()),
                    None => filters.push(MatrixFilter::new(axis, vec![value.to_string()])),
                }
            }
            None => match filters.last_mut() {
                Some(last) => last.values.push(piece.to_string()),
                None => return Err(format!("value '{}' has no axis", piece)),
            },
        }
    }
    Ok(filters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_job_glob() {
        let selector = TargetSelector::parse("Build/*").unwrap();
        assert!(selector.matches("Build", "Compile"));
        assert!(selector.matches("build", "Lint"));
        assert!(!selector.matches("Test", "Compile"));
    }

    #[test]
    fn test_job_only_pattern() {
        let selector = TargetSelector::parse("Unit*").unwrap();
        assert!(selector.matches("Test", "UnitTests"));
        assert!(!selector.matches("Unit", "Integration"));
    }

    #[test]
    fn test_matrix_suffix() {
        let selector = TargetSelector::parse("Test/Unit[os=linux,windows,pyver=3.12]").unwrap();
        assert!(selector.matches("Test", "Unit"));
        assert_eq!(
            selector.filters(),
            &[
                MatrixFilter::new("os", vec!["linux".to_string(), "windows".to_string()]),
                MatrixFilter::new("pyver", vec!["3.12".to_string()]),
            ]
        );
    }

    #[test]
    fn test_glob_class_is_not_a_matrix_suffix() {
        let selector = TargetSelector::parse("Test/Unit[ab]").unwrap();
        assert!(selector.filters().is_empty());
        assert!(selector.matches("Test", "Unita"));
    }

    #[test]
    fn test_invalid_selectors() {
        assert!(TargetSelector::parse("").is_err());
        assert!(TargetSelector::parse("a/b/c").is_err());
        assert!(TargetSelector::parse("Test/Unit[=linux]").is_err());
    }

    #[test]
    fn test_selection_union() {
        let filter = TargetFilter::parse_all(&["Test/Unit[os=linux]", "Build/*"]).unwrap();
        assert_eq!(filter.select("Build", "Compile"), Selection::All);
        assert_eq!(filter.select("Release", "Publish"), Selection::NotTargeted);
        assert_eq!(
            filter.select("Test", "Unit"),
            Selection::Matrix(vec![vec![MatrixFilter::new("os", vec!["linux".to_string()])]])
        );

        let widened = TargetFilter::parse_all(&["Test/Unit[os=linux]", "Unit"]).unwrap();
        assert_eq!(widened.select("Test", "Unit"), Selection::All);
        assert_eq!(TargetFilter::all().select("Any", "Job"), Selection::All);
    }
}
