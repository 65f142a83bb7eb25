// Matrix Expansion
// Expands a job template's matrix into concrete, deterministically named instances

use crate::error::ExpansionError;
use crate::parser::models::{AxisValues, Job, MatrixConfig, MatrixFilter, MatrixScalar, Value};
use crate::parser::parameters::ResolvedParameters;

use std::collections::{BTreeMap, HashSet};

/// One surviving matrix combination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixInstance {
    /// `Job` or `Job[axis=value,...]`, built from the selected values
    pub name: String,
    /// Axis values as selected, before replacements, in axis order
    pub selector: Vec<(String, String)>,
    /// Axis values after replacements; these are what the unit sees
    pub values: Vec<(String, String)>,
}

impl MatrixInstance {
    pub fn value(&self, axis: &str) -> Option<&str> {
        lookup(&self.values, axis)
    }
}

type Combination = Vec<String>;

/// Matrix expander for job templates.
///
/// Expansion is the Cartesian product of the dimensions (first axis
/// slowest), narrowed by the declared filters and any targeting
/// restriction, minus `exclude`, plus `include`, with replacements
/// applied to the values last. Identical input always produces the same
/// instances in the same order.
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand `job`. `targeted` holds filter groups from targeting selectors:
    /// a combination must satisfy every filter of at least one group. An
    /// empty slice means no restriction.
    pub fn expand(
        job: &Job,
        parameters: &ResolvedParameters,
        targeted: &[Vec<MatrixFilter>],
    ) -> Result<Vec<MatrixInstance>, ExpansionError> {
        let Some(config) = &job.matrix else {
            return Self::expand_plain(job, targeted);
        };

        Self::check_config(&job.job, config)?;
        let axes = Self::resolve_axes(&job.job, config, parameters)?;
        let names: Vec<&str> = axes.iter().map(|(name, _)| name.as_str()).collect();

        for group in targeted {
            for filter in group {
                axis_position(&job.job, &names, &filter.axis)?;
            }
        }

        let mut combinations: Vec<Combination> = Self::product(&axes)
            .into_iter()
            .filter(|combo| {
                config
                    .filters
                    .iter()
                    .all(|filter| accepts(filter, &names, combo))
            })
            .filter(|combo| !config.exclude.iter().any(|entry| matches_entry(entry, &names, combo)))
            .collect();

        for entry in &config.include {
            let combo = Self::included(&job.job, &names, entry)?;
            if !combinations.contains(&combo) {
                combinations.push(combo);
            }
        }

        if !targeted.is_empty() {
            combinations.retain(|combo| {
                targeted
                    .iter()
                    .any(|group| group.iter().all(|filter| accepts(filter, &names, combo)))
            });
        }

        if combinations.is_empty() {
            if job.allow_empty_matrix {
                return Ok(Vec::new());
            }
            return Err(ExpansionError::EmptyExpansion {
                job: job.job.clone(),
            });
        }

        Ok(combinations
            .into_iter()
            .map(|combo| Self::instance(&job.job, config, &names, combo))
            .collect())
    }

    /// Structural checks that do not need parameter values
    pub fn check(job: &Job) -> Result<(), ExpansionError> {
        match &job.matrix {
            Some(config) => Self::check_config(&job.job, config),
            None => Ok(()),
        }
    }

    /// Unit name for a job and its selected axis values. Separator
    /// characters inside axis names and values are backslash-escaped so
    /// distinct combinations never share a name.
    pub fn unit_name(job: &str, selector: &[(String, String)]) -> String {
        if selector.is_empty() {
            return job.to_string();
        }
        let parts: Vec<String> = selector
            .iter()
            .map(|(axis, value)| format!("{}={}", escape(axis), escape(value)))
            .collect();
        format!("{}[{}]", job, parts.join(","))
    }

    fn expand_plain(
        job: &Job,
        targeted: &[Vec<MatrixFilter>],
    ) -> Result<Vec<MatrixInstance>, ExpansionError> {
        if let Some(filter) = targeted.iter().flatten().next() {
            return Err(ExpansionError::UnknownAxis {
                job: job.job.clone(),
                axis: filter.axis.clone(),
            });
        }
        Ok(vec![MatrixInstance {
            name: job.job.clone(),
            selector: Vec::new(),
            values: Vec::new(),
        }])
    }

    fn check_config(job: &str, config: &MatrixConfig) -> Result<(), ExpansionError> {
        let names: Vec<&str> = config.dimensions.iter().map(|a| a.name.as_str()).collect();

        for axis in config.dimensions.iter() {
            match &axis.values {
                AxisValues::List(values) => {
                    unique(job, &axis.name, values.iter().map(|v| v.0.as_str()))?;
                }
                AxisValues::Reference(reference) => {
                    if parameter_name(reference).is_none() {
                        return Err(ExpansionError::InvalidAxisValues {
                            job: job.to_string(),
                            axis: axis.name.clone(),
                            message: format!(
                                "expected a list or 'parameters.<name>', got '{}'",
                                reference
                            ),
                        });
                    }
                }
            }
        }

        for filter in &config.filters {
            axis_position(job, &names, &filter.axis)?;
        }
        for replacement in &config.replacements {
            axis_position(job, &names, &replacement.axis)?;
        }
        for entry in config.exclude.iter().chain(&config.include) {
            for axis in entry.keys() {
                axis_position(job, &names, axis)?;
            }
        }
        for entry in &config.include {
            if let Some(missing) = names.iter().find(|name| !entry.contains_key(**name)) {
                return Err(ExpansionError::InvalidAxisValues {
                    job: job.to_string(),
                    axis: missing.to_string(),
                    message: "include entries must set every axis".to_string(),
                });
            }
        }

        Ok(())
    }

    fn resolve_axes(
        job: &str,
        config: &MatrixConfig,
        parameters: &ResolvedParameters,
    ) -> Result<Vec<(String, Vec<String>)>, ExpansionError> {
        config
            .dimensions
            .iter()
            .map(|axis| {
                let values = match &axis.values {
                    AxisValues::List(values) => values.iter().map(|v| v.0.clone()).collect(),
                    AxisValues::Reference(reference) => {
                        Self::parameter_values(job, &axis.name, reference, parameters)?
                    }
                };
                Ok((axis.name.clone(), values))
            })
            .collect()
    }

    fn parameter_values(
        job: &str,
        axis: &str,
        reference: &str,
        parameters: &ResolvedParameters,
    ) -> Result<Vec<String>, ExpansionError> {
        let unresolved = || ExpansionError::UnresolvedParameter {
            job: job.to_string(),
            axis: axis.to_string(),
            reference: reference.to_string(),
        };

        let name = parameter_name(reference).ok_or_else(unresolved)?;
        let values = match parameters.get(name).ok_or_else(unresolved)? {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Array(_) | Value::Object(_) => Err(ExpansionError::InvalidAxisValues {
                        job: job.to_string(),
                        axis: axis.to_string(),
                        message: format!("parameter '{}' must be a list of scalars", name),
                    }),
                    scalar => Ok(scalar.as_string()),
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => {
                return Err(ExpansionError::InvalidAxisValues {
                    job: job.to_string(),
                    axis: axis.to_string(),
                    message: format!(
                        "parameter '{}' must be a list, got '{}'",
                        name,
                        other.as_string()
                    ),
                })
            }
        };

        unique(job, axis, values.iter().map(String::as_str))?;
        Ok(values)
    }

    /// Nested-loop product: the first axis varies slowest
    fn product(axes: &[(String, Vec<String>)]) -> Vec<Combination> {
        let mut combinations: Vec<Combination> = vec![Vec::new()];
        for (_, values) in axes {
            let mut next = Vec::with_capacity(combinations.len() * values.len());
            for combo in &combinations {
                for value in values {
                    let mut extended = combo.clone();
                    extended.push(value.clone());
                    next.push(extended);
                }
            }
            combinations = next;
        }
        combinations
    }

    fn included(
        job: &str,
        names: &[&str],
        entry: &BTreeMap<String, MatrixScalar>,
    ) -> Result<Combination, ExpansionError> {
        names
            .iter()
            .map(|name| {
                entry
                    .get(*name)
                    .map(|v| v.0.clone())
                    .ok_or_else(|| ExpansionError::InvalidAxisValues {
                        job: job.to_string(),
                        axis: name.to_string(),
                        message: "include entries must set every axis".to_string(),
                    })
            })
            .collect()
    }

    fn instance(
        job: &str,
        config: &MatrixConfig,
        names: &[&str],
        combo: Combination,
    ) -> MatrixInstance {
        let selector: Vec<(String, String)> = names
            .iter()
            .map(|n| n.to_string())
            .zip(combo)
            .collect();

        let mut values = selector.clone();
        for replacement in &config.replacements {
            for (axis, value) in values.iter_mut() {
                if *axis == replacement.axis && *value == replacement.value {
                    *value = replacement.with.clone();
                }
            }
        }

        MatrixInstance {
            name: Self::unit_name(job, &selector),
            selector,
            values,
        }
    }
}

fn parameter_name(reference: &str) -> Option<&str> {
    reference
        .trim()
        .strip_prefix("parameters.")
        .filter(|name| !name.is_empty())
}

fn lookup<'a>(pairs: &'a [(String, String)], axis: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(name, _)| name == axis)
        .map(|(_, value)| value.as_str())
}

fn axis_position(job: &str, names: &[&str], axis: &str) -> Result<usize, ExpansionError> {
    names
        .iter()
        .position(|name| *name == axis)
        .ok_or_else(|| ExpansionError::UnknownAxis {
            job: job.to_string(),
            axis: axis.to_string(),
        })
}

fn unique<'a>(
    job: &str,
    axis: &str,
    values: impl Iterator<Item = &'a str>,
) -> Result<(), ExpansionError> {
    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value) {
            return Err(ExpansionError::DuplicateAxisValue {
                job: job.to_string(),
                axis: axis.to_string(),
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

/// Exact match, or a glob when the filter value carries glob syntax
fn value_matches(pattern: &str, value: &str) -> bool {
    if pattern.contains(['*', '?', '[', '{']) {
        glob_match::glob_match(pattern, value)
    } else {
        pattern == value
    }
}

fn accepts(filter: &MatrixFilter, names: &[&str], combo: &Combination) -> bool {
    match names.iter().position(|name| *name == filter.axis) {
        Some(index) => filter.values.iter().any(|p| value_matches(p, &combo[index])),
        None => false,
    }
}

fn matches_entry(
    entry: &BTreeMap<String, MatrixScalar>,
    names: &[&str],
    combo: &Combination,
) -> bool {
    entry.iter().all(|(axis, value)| {
        names
            .iter()
            .position(|name| name == axis)
            .map(|index| combo[index] == value.0)
            .unwrap_or(false)
    })
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | ',' | '=' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::models::{Axis, Dimensions, Replacement};
    use std::collections::HashMap;

    fn axis(name: &str, values: &[&str]) -> Axis {
        Axis {
            name: name.to_string(),
            values: AxisValues::List(values.iter().map(|v| MatrixScalar::from(*v)).collect()),
        }
    }

    fn job_with(config: MatrixConfig) -> Job {
        Job {
            job: "Test".to_string(),
            matrix: Some(config),
            ..Default::default()
        }
    }

    fn os_pyver() -> MatrixConfig {
        MatrixConfig {
            dimensions: Dimensions(vec![
                axis("os", &["linux", "windows"]),
                axis("pyver", &["3.9", "3.12"]),
            ]),
            ..Default::default()
        }
    }

    fn names(instances: &[MatrixInstance]) -> Vec<&str> {
        instances.iter().map(|i| i.name.as_str()).collect()
    }

    fn no_params() -> ResolvedParameters {
        ResolvedParameters::default()
    }

    #[test]
    fn test_product_order_first_axis_slowest() {
        let instances = MatrixExpander::expand(&job_with(os_pyver()), &no_params(), &[]).unwrap();
        assert_eq!(
            names(&instances),
            vec![
                "Test[os=linux,pyver=3.9]",
                "Test[os=linux,pyver=3.12]",
                "Test[os=windows,pyver=3.9]",
                "Test[os=windows,pyver=3.12]",
            ]
        );
    }

    #[test]
    fn test_separator_characters_keep_names_unique() {
        let config = MatrixConfig {
            dimensions: Dimensions(vec![axis("a", &["x", "x,b=y"]), axis("b", &["y,b=z", "z"])]),
            ..Default::default()
        };
        let instances = MatrixExpander::expand(&job_with(config), &no_params(), &[]).unwrap();
        let unique: HashSet<&str> = names(&instances).into_iter().collect();

        assert_eq!(instances.len(), 4);
        assert_eq!(unique.len(), 4);
        assert_eq!(instances[0].name, r"Test[a=x,b=y\,b\=z]");
        assert_eq!(instances[0].value("b"), Some("y,b=z"));
    }

    #[test]
    fn test_no_matrix_yields_template() {
        let job = Job {
            job: "Compile".to_string(),
            ..Default::default()
        };
        let instances = MatrixExpander::expand(&job, &no_params(), &[]).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].name, "Compile");
        assert!(instances[0].values.is_empty());
    }

    #[test]
    fn test_filter_keeps_linux_only() {
        let mut config = os_pyver();
        config.filters = vec![MatrixFilter::new("os", vec!["linux".to_string()])];
        let instances = MatrixExpander::expand(&job_with(config), &no_params(), &[]).unwrap();
        assert_eq!(instances.len(), 2);
        assert!(instances.iter().all(|i| i.value("os") == Some("linux")));
    }

    #[test]
    fn test_glob_filter() {
        let mut config = os_pyver();
        config.filters = vec![MatrixFilter::new("pyver", vec!["3.1*".to_string()])];
        let instances = MatrixExpander::expand(&job_with(config), &no_params(), &[]).unwrap();
        assert_eq!(
            names(&instances),
            vec!["Test[os=linux,pyver=3.12]", "Test[os=windows,pyver=3.12]"]
        );
    }

    #[test]
    fn test_replacement_keeps_selection_and_name() {
        let mut config = os_pyver();
        config.filters = vec![MatrixFilter::new("pyver", vec!["3.9".to_string()])];
        config.replacements = vec![Replacement {
            axis: "pyver".to_string(),
            value: "3.9".to_string(),
            with: "3.9.18".to_string(),
        }];
        let instances = MatrixExpander::expand(&job_with(config), &no_params(), &[]).unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].name, "Test[os=linux,pyver=3.9]");
        assert_eq!(instances[0].value("pyver"), Some("3.9.18"));
        assert_eq!(lookup(&instances[0].selector, "pyver"), Some("3.9"));
    }

    #[test]
    fn test_exclude_and_include() {
        let mut config = os_pyver();
        config.exclude = vec![BTreeMap::from([
            ("os".to_string(), MatrixScalar::from("windows")),
            ("pyver".to_string(), MatrixScalar::from("3.9")),
        ])];
        config.include = vec![BTreeMap::from([
            ("os".to_string(), MatrixScalar::from("macos")),
            ("pyver".to_string(), MatrixScalar::from("3.12")),
        ])];
        let instances = MatrixExpander::expand(&job_with(config), &no_params(), &[]).unwrap();
        assert_eq!(
            names(&instances),
            vec![
                "Test[os=linux,pyver=3.9]",
                "Test[os=linux,pyver=3.12]",
                "Test[os=windows,pyver=3.12]",
                "Test[os=macos,pyver=3.12]",
            ]
        );
    }

    #[test]
    fn test_targeting_intersects_with_filters() {
        let mut config = os_pyver();
        config.filters = vec![MatrixFilter::new("os", vec!["linux".to_string()])];
        let targeted = vec![vec![MatrixFilter::new("pyver", vec!["3.12".to_string()])]];
        let instances = MatrixExpander::expand(&job_with(config), &no_params(), &targeted).unwrap();
        assert_eq!(names(&instances), vec!["Test[os=linux,pyver=3.12]"]);
    }

    #[test]
    fn test_targeting_groups_are_a_union() {
        let targeted = vec![
            vec![MatrixFilter::new("os", vec!["windows".to_string()])],
            vec![MatrixFilter::new("pyver", vec!["3.9".to_string()])],
        ];
        let instances =
            MatrixExpander::expand(&job_with(os_pyver()), &no_params(), &targeted).unwrap();
        assert_eq!(instances.len(), 3);
    }

    #[test]
    fn test_empty_expansion() {
        let mut config = os_pyver();
        config.filters = vec![MatrixFilter::new("os", vec!["solaris".to_string()])];
        let err = MatrixExpander::expand(&job_with(config.clone()), &no_params(), &[]).unwrap_err();
        assert_eq!(
            err,
            ExpansionError::EmptyExpansion {
                job: "Test".to_string()
            }
        );

        let mut job = job_with(config);
        job.allow_empty_matrix = true;
        assert!(MatrixExpander::expand(&job, &no_params(), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_parameter_axis() {
        let mut config = os_pyver();
        config.dimensions.0[1].values = AxisValues::Reference("parameters.pythonVersions".to_string());
        let params = ResolvedParameters::new(HashMap::from([(
            "pythonVersions".to_string(),
            Value::from(vec!["3.10", "3.11", "3.13"]),
        )]));
        let instances = MatrixExpander::expand(&job_with(config.clone()), &params, &[]).unwrap();
        assert_eq!(instances.len(), 6);

        let err = MatrixExpander::expand(&job_with(config), &no_params(), &[]).unwrap_err();
        assert!(matches!(err, ExpansionError::UnresolvedParameter { .. }));
    }

    #[test]
    fn test_structural_errors() {
        let mut config = os_pyver();
        config.filters = vec![MatrixFilter::new("arch", vec!["x64".to_string()])];
        assert!(matches!(
            MatrixExpander::check(&job_with(config)),
            Err(ExpansionError::UnknownAxis { ref axis, .. }) if axis == "arch"
        ));

        let config = MatrixConfig {
            dimensions: Dimensions(vec![axis("os", &["linux", "linux"])]),
            ..Default::default()
        };
        assert!(matches!(
            MatrixExpander::check(&job_with(config)),
            Err(ExpansionError::DuplicateAxisValue { .. })
        ));

        let config = MatrixConfig {
            dimensions: Dimensions(vec![Axis {
                name: "os".to_string(),
                values: AxisValues::Reference("linux".to_string()),
            }]),
            ..Default::default()
        };
        assert!(matches!(
            MatrixExpander::check(&job_with(config)),
            Err(ExpansionError::InvalidAxisValues { .. })
        ));
    }

    #[test]
    fn test_targeting_plain_job_with_axes_fails() {
        let job = Job {
            job: "Compile".to_string(),
            ..Default::default()
        };
        let targeted = vec![vec![MatrixFilter::new("os", vec!["linux".to_string()])]];
        assert!(matches!(
            MatrixExpander::expand(&job, &no_params(), &targeted),
            Err(ExpansionError::UnknownAxis { .. })
        ));
    }
}
