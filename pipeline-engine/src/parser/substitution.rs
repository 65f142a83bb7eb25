// Typed Parameter Substitution
// Replaces ${{ }} expressions in a YAML tree using resolved parameters

use crate::error::DefinitionError;
use crate::execution::context::{TriggerContext, Variables};
use crate::expression::evaluator::{ConditionContext, EvalErrorKind, Evaluator};
use crate::expression::lexer::{extract_segments, Segment};
use crate::expression::parser::ExprParser;
use crate::parser::models::{value_to_yaml, Value};
use crate::parser::parameters::ResolvedParameters;

use serde_yaml::Value as Yaml;

/// Walks a YAML tree once, evaluating every `${{ }}` against a fixed
/// parameter set. A string that is exactly one expression takes the
/// expression's typed value; anything else is interpolated as text.
/// `$(name)` macros are left for run time.
pub struct Substitutor<'a> {
    parameters: &'a ResolvedParameters,
    variables: Variables,
    trigger: TriggerContext,
}

impl<'a> Substitutor<'a> {
    pub fn new(parameters: &'a ResolvedParameters) -> Self {
        Self {
            parameters,
            variables: Variables::new(),
            trigger: TriggerContext::default(),
        }
    }

    pub fn substitute(&self, value: &Yaml, location: &str) -> Result<Yaml, DefinitionError> {
        match value {
            Yaml::String(text) => self.substitute_string(text, location),
            Yaml::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.substitute(item, &format!("{}[{}]", location, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Yaml::Sequence),
            Yaml::Mapping(map) => {
                let mut out = serde_yaml::Mapping::with_capacity(map.len());
                for (key, item) in map {
                    let key_text = key.as_str().unwrap_or_default();
                    if key_text.contains("${{") {
                        return Err(DefinitionError::Unsupported {
                            location: display_location(location),
                            message: format!(
                                "expression keys such as '{}' are not supported",
                                key_text
                            ),
                        });
                    }
                    let child = if location.is_empty() {
                        key_text.to_string()
                    } else {
                        format!("{}.{}", location, key_text)
                    };
                    out.insert(key.clone(), self.substitute(item, &child)?);
                }
                Ok(Yaml::Mapping(out))
            }
            Yaml::Tagged(tagged) => self.substitute(&tagged.value, location),
            other => Ok(other.clone()),
        }
    }

    fn substitute_string(&self, text: &str, location: &str) -> Result<Yaml, DefinitionError> {
        if !text.contains("${{") {
            return Ok(Yaml::String(text.to_string()));
        }

        let segments = extract_segments(text);
        if let [Segment::Expression(expr)] = segments.as_slice() {
            return Ok(value_to_yaml(&self.evaluate(expr, location)?));
        }

        let mut result = String::with_capacity(text.len());
        for segment in segments {
            match segment {
                Segment::Text(s) => result.push_str(&s),
                Segment::Macro(name) => {
                    result.push_str("$(");
                    result.push_str(&name);
                    result.push(')');
                }
                Segment::Expression(expr) => {
                    result.push_str(&self.evaluate(&expr, location)?.as_string())
                }
            }
        }
        Ok(Yaml::String(result))
    }

    fn evaluate(&self, expr: &str, location: &str) -> Result<Value, DefinitionError> {
        let ast = ExprParser::parse_str(expr).map_err(|err| DefinitionError::InvalidExpression {
            location: display_location(location),
            message: format!("'${{{{ {} }}}}': {}", expr, err),
        })?;

        let context = ConditionContext::new(&self.variables, self.parameters, &self.trigger).strict(true);
        Evaluator::new(context).eval(&ast).map_err(|err| match err.kind {
            EvalErrorKind::UnresolvedReference => DefinitionError::UndeclaredReference {
                location: display_location(location),
                name: err.message,
            },
            _ => DefinitionError::InvalidExpression {
                location: display_location(location),
                message: format!("'${{{{ {} }}}}': {}", expr, err),
            },
        })
    }
}

fn display_location(location: &str) -> String {
    if location.is_empty() {
        "definition root".to_string()
    } else {
        location.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parameters() -> ResolvedParameters {
        ResolvedParameters::new(HashMap::from([
            ("config".to_string(), Value::from("Release")),
            ("parallel".to_string(), Value::Number(3.0)),
            ("publish".to_string(), Value::Bool(true)),
            ("versions".to_string(), Value::from(vec!["3.9", "3.12"])),
        ]))
    }

    fn run(yaml: &str) -> Result<Yaml, DefinitionError> {
        let params = parameters();
        let tree: Yaml = serde_yaml::from_str(yaml).unwrap();
        Substitutor::new(&params).substitute(&tree, "")
    }

    #[test]
    fn test_whole_expression_keeps_type() {
        let out = run(
            r#"
maxParallel: ${{ parameters.parallel }}
enabled: ${{ parameters.publish }}
values: ${{ parameters.versions }}
"#,
        )
        .unwrap();
        assert_eq!(out["maxParallel"], Yaml::from(3));
        assert_eq!(out["enabled"], Yaml::Bool(true));
        assert_eq!(
            out["values"],
            serde_yaml::from_str::<Yaml>("['3.9', '3.12']").unwrap()
        );
    }

    #[test]
    fn test_interpolation_preserves_macros() {
        let out = run("script: build --config ${{ parameters.config }} --out $(outDir)").unwrap();
        assert_eq!(
            out["script"],
            Yaml::String("build --config Release --out $(outDir)".to_string())
        );
    }

    #[test]
    fn test_functions_in_expressions() {
        let out = run("name: ${{ format('{0}-{1}', parameters.config, lower('X')) }}").unwrap();
        assert_eq!(out["name"], Yaml::String("Release-x".to_string()));
    }

    #[test]
    fn test_undeclared_parameter() {
        let err = run("stages:\n  - stage: ${{ parameters.missing }}\n").unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::UndeclaredReference { ref location, ref name }
                if location == "stages[0].stage" && name == "parameters.missing"
        ));
    }

    #[test]
    fn test_expression_keys_rejected() {
        let err = run("jobs:\n  ${{ if eq(parameters.publish, true) }}:\n    - job: A\n").unwrap_err();
        assert!(matches!(err, DefinitionError::Unsupported { .. }));
    }

    #[test]
    fn test_bad_expression_syntax() {
        let err = run("script: ${{ eq(parameters.config }}").unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidExpression { .. }));
    }
}
