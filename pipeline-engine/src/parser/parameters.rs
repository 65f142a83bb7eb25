// Parameter Resolution
// Merges declared parameters, defaults and caller overrides into typed values

use crate::error::DefinitionError;
use crate::parser::models::{scalar_to_string, yaml_to_value, Parameter, ParameterType, Value};

use std::collections::{HashMap, HashSet};

/// Immutable name to typed value mapping produced by [`ParameterResolver`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedParameters {
    values: HashMap<String, Value>,
}

impl ResolvedParameters {
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Exact match first, then case-insensitive
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).or_else(|| {
            self.values
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All parameters as one object value
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

pub struct ParameterResolver;

impl ParameterResolver {
    /// Resolve declared parameters against caller overrides.
    ///
    /// Overrides win over defaults. Every value is coerced to its declared
    /// type and checked against the allowed `values` list.
    pub fn resolve(
        declared: &[Parameter],
        overrides: &HashMap<String, serde_yaml::Value>,
    ) -> Result<ResolvedParameters, DefinitionError> {
        let mut seen = HashSet::new();
        for param in declared {
            if !seen.insert(param.name.to_lowercase()) {
                return Err(DefinitionError::DuplicateName {
                    kind: "parameter",
                    name: param.name.clone(),
                });
            }
        }

        let mut unknown: Vec<&String> = overrides
            .keys()
            .filter(|name| !seen.contains(&name.to_lowercase()))
            .collect();
        unknown.sort();
        if let Some(name) = unknown.first() {
            return Err(DefinitionError::UnknownParameter {
                name: name.to_string(),
            });
        }

        let mut values = HashMap::new();
        for param in declared {
            let provided = overrides
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&param.name))
                .map(|(_, value)| value);

            let raw = match provided.or(param.default.as_ref()) {
                Some(raw) => raw,
                None if param.is_required() => {
                    return Err(DefinitionError::MissingParameter {
                        name: param.name.clone(),
                    });
                }
                None => {
                    values.insert(param.name.clone(), Value::Null);
                    continue;
                }
            };

            let value = coerce(&param.name, param.param_type, raw)?;
            check_allowed(param, &value)?;
            values.insert(param.name.clone(), value);
        }

        Ok(ResolvedParameters::new(values))
    }
}

/// Convert a raw YAML value into the declared parameter type
pub fn coerce(
    name: &str,
    param_type: ParameterType,
    raw: &serde_yaml::Value,
) -> Result<Value, DefinitionError> {
    let mismatch = || DefinitionError::TypeMismatch {
        name: name.to_string(),
        expected: param_type,
        found: describe(raw),
    };

    match param_type {
        ParameterType::String => match raw {
            serde_yaml::Value::Sequence(_) | serde_yaml::Value::Mapping(_) => Err(mismatch()),
            other => scalar_to_string(other).map(Value::String).ok_or_else(mismatch),
        },
        ParameterType::Number => match raw {
            serde_yaml::Value::Number(n) => n.as_f64().map(Value::Number).ok_or_else(mismatch),
            serde_yaml::Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ParameterType::Boolean => match raw {
            serde_yaml::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_yaml::Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            serde_yaml::Value::String(s) if s.eq_ignore_ascii_case("false") => {
                Ok(Value::Bool(false))
            }
            _ => Err(mismatch()),
        },
        ParameterType::Object => match raw {
            serde_yaml::Value::Mapping(_) | serde_yaml::Value::Sequence(_) => Ok(yaml_to_value(raw)),
            _ => Err(mismatch()),
        },
        ParameterType::List => match raw {
            serde_yaml::Value::Sequence(_) => Ok(yaml_to_value(raw)),
            _ => Err(mismatch()),
        },
    }
}

fn check_allowed(param: &Parameter, value: &Value) -> Result<(), DefinitionError> {
    let Some(allowed) = &param.values else {
        return Ok(());
    };
    let allowed: Vec<Value> = allowed.iter().map(yaml_to_value).collect();
    let is_allowed = |candidate: &Value| allowed.iter().any(|a| a.loosely_equals(candidate));

    let offending = match value {
        Value::Array(items) => items.iter().find(|item| !is_allowed(item)),
        other if !is_allowed(other) => Some(other),
        _ => None,
    };

    match offending {
        Some(bad) => Err(DefinitionError::ValueNotAllowed {
            name: param.name.clone(),
            value: bad.as_string(),
            allowed: allowed
                .iter()
                .map(Value::as_string)
                .collect::<Vec<_>>()
                .join(", "),
        }),
        None => Ok(()),
    }
}

fn describe(raw: &serde_yaml::Value) -> String {
    match raw {
        serde_yaml::Value::Null => "null".to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => format!("'{}'", s),
        serde_yaml::Value::Sequence(_) => "a list".to_string(),
        serde_yaml::Value::Mapping(_) => "an object".to_string(),
        serde_yaml::Value::Tagged(_) => "a tagged value".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(yaml: &str) -> Vec<Parameter> {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, serde_yaml::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_yaml::from_str(v).unwrap()))
            .collect()
    }

    const DECLARED: &str = r#"
- name: configuration
  type: string
  default: Debug
  values: [Debug, Release]
- name: retries
  type: number
  default: 2
- name: publish
  type: boolean
  default: false
- name: pythonVersions
  type: list
  default: ["3.9", "3.12"]
"#;

    #[test]
    fn test_defaults_apply() {
        let resolved = ParameterResolver::resolve(&params(DECLARED), &HashMap::new()).unwrap();
        assert_eq!(resolved.get("configuration"), Some(&Value::from("Debug")));
        assert_eq!(resolved.get("retries"), Some(&Value::Number(2.0)));
        assert_eq!(resolved.get("publish"), Some(&Value::Bool(false)));
        assert_eq!(
            resolved.get("pythonVersions"),
            Some(&Value::from(vec!["3.9", "3.12"]))
        );
    }

    #[test]
    fn test_overrides_are_coerced() {
        let resolved = ParameterResolver::resolve(
            &params(DECLARED),
            &overrides(&[("retries", "'5'"), ("publish", "'TRUE'"), ("Configuration", "Release")]),
        )
        .unwrap();
        assert_eq!(resolved.get("retries"), Some(&Value::Number(5.0)));
        assert_eq!(resolved.get("publish"), Some(&Value::Bool(true)));
        assert_eq!(resolved.get("configuration"), Some(&Value::from("Release")));
    }

    #[test]
    fn test_type_mismatch() {
        let err = ParameterResolver::resolve(&params(DECLARED), &overrides(&[("retries", "many")]))
            .unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::TypeMismatch { ref name, expected: ParameterType::Number, .. } if name == "retries"
        ));
    }

    #[test]
    fn test_value_not_allowed() {
        let err = ParameterResolver::resolve(
            &params(DECLARED),
            &overrides(&[("configuration", "Profile")]),
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::ValueNotAllowed { ref value, .. } if value == "Profile"));
    }

    #[test]
    fn test_unknown_parameter() {
        let err = ParameterResolver::resolve(&params(DECLARED), &overrides(&[("colour", "red")]))
            .unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownParameter { ref name } if name == "colour"));
    }

    #[test]
    fn test_missing_required() {
        let declared = params("- name: target\n  type: string\n");
        let err = ParameterResolver::resolve(&declared, &HashMap::new()).unwrap_err();
        assert!(matches!(err, DefinitionError::MissingParameter { ref name } if name == "target"));
    }

    #[test]
    fn test_optional_without_default_is_null() {
        let declared = params("- name: label\n  required: false\n");
        let resolved = ParameterResolver::resolve(&declared, &HashMap::new()).unwrap();
        assert_eq!(resolved.get("label"), Some(&Value::Null));
    }

    #[test]
    fn test_duplicate_declaration() {
        let declared = params("- name: a\n  default: x\n- name: A\n  default: y\n");
        assert!(matches!(
            ParameterResolver::resolve(&declared, &HashMap::new()),
            Err(DefinitionError::DuplicateName { kind: "parameter", .. })
        ));
    }

    #[test]
    fn test_list_elements_checked_against_values() {
        let declared = params(
            "- name: oses\n  type: list\n  default: [linux]\n  values: [linux, windows]\n",
        );
        assert!(ParameterResolver::resolve(&declared, &overrides(&[("oses", "[linux, windows]")]))
            .is_ok());
        assert!(matches!(
            ParameterResolver::resolve(&declared, &overrides(&[("oses", "[linux, beos]")])),
            Err(DefinitionError::ValueNotAllowed { .. })
        ));
    }
}
