// Expression Evaluator
// Evaluates condition ASTs against variables, parameters, trigger data and upstream statuses

use crate::execution::context::{TriggerContext, Variables};
use crate::expression::functions::BuiltinFunctions;
use crate::expression::parser::{BinaryOp, Expr, Reference, ReferencePart, UnaryOp};
use crate::parser::models::{RunStatus, Value};
use crate::parser::parameters::ResolvedParameters;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub message: String,
    pub kind: EvalErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    /// Reference to a name that does not exist (strict mode only)
    UnresolvedReference,
    /// Wrong argument count or type
    InvalidArgument,
    UnknownFunction,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EvalError {}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: EvalErrorKind::InvalidArgument,
        }
    }

    pub fn unresolved(reference: impl Into<String>) -> Self {
        Self {
            message: reference.into(),
            kind: EvalErrorKind::UnresolvedReference,
        }
    }

    pub fn unknown_function(name: &str) -> Self {
        Self {
            message: format!("unknown function '{}'", name),
            kind: EvalErrorKind::UnknownFunction,
        }
    }
}

/// Everything a condition can read
#[derive(Debug, Clone, Copy)]
pub struct ConditionContext<'a> {
    pub variables: &'a Variables,
    pub parameters: &'a ResolvedParameters,
    pub trigger: &'a TriggerContext,
    /// Upstream entities (stages, jobs or earlier steps) and their statuses
    pub dependencies: &'a [(String, RunStatus)],
    /// Selected matrix values of the unit being gated
    pub matrix: &'a [(String, String)],
    /// Unresolved references fail instead of reading as empty
    pub strict: bool,
}

impl<'a> ConditionContext<'a> {
    pub fn new(
        variables: &'a Variables,
        parameters: &'a ResolvedParameters,
        trigger: &'a TriggerContext,
    ) -> Self {
        Self {
            variables,
            parameters,
            trigger,
            dependencies: &[],
            matrix: &[],
            strict: false,
        }
    }

    pub fn with_dependencies(mut self, dependencies: &'a [(String, RunStatus)]) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_matrix(mut self, matrix: &'a [(String, String)]) -> Self {
        self.matrix = matrix;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Status of a named dependency, case-insensitive
    pub fn dependency(&self, name: &str) -> Option<RunStatus> {
        self.dependencies
            .iter()
            .find(|(dep, _)| dep.eq_ignore_ascii_case(name))
            .map(|(_, status)| *status)
    }

    fn matrix_value(&self, axis: &str) -> Option<&str> {
        self.matrix
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(axis))
            .map(|(_, value)| value.as_str())
    }

    /// Variables, then matrix values, then predefined trigger variables
    fn lookup_variable(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.variables.get(name) {
            return Some(Value::String(value.to_string()));
        }
        if let Some(value) = self.matrix_value(name) {
            return Some(Value::String(value.to_string()));
        }
        self.trigger.predefined(name).map(Value::String)
    }
}

pub struct Evaluator<'a> {
    context: ConditionContext<'a>,
    functions: BuiltinFunctions,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: ConditionContext<'a>) -> Self {
        Self {
            context,
            functions: BuiltinFunctions::new(),
        }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),

            Expr::Reference(reference) => self.eval_reference(reference),

            Expr::FunctionCall { name, args } => self.eval_function(name, args),

            Expr::Unary {
                op: UnaryOp::Not,
                expr,
            } => Ok(Value::Bool(!self.eval(expr)?.is_truthy())),

            // Short-circuit and / or
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                if !self.eval(left)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(right)?.is_truthy()))
            }
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                if self.eval(left)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(right)?.is_truthy()))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(Value::Bool(compare(*op, &left, &right)))
            }

            Expr::Membership {
                needle,
                list,
                negated,
            } => {
                let needle = self.eval(needle)?;
                let found = match self.eval(list)? {
                    Value::Array(items) => items.iter().any(|item| item.loosely_equals(&needle)),
                    single => single.loosely_equals(&needle),
                };
                Ok(Value::Bool(found != *negated))
            }

            Expr::Array(items) => {
                let values: Result<Vec<Value>, EvalError> =
                    items.iter().map(|e| self.eval(e)).collect();
                Ok(Value::Array(values?))
            }
        }
    }

    fn eval_function(&self, name: &str, args: &[Expr]) -> Result<Value, EvalError> {
        // and/or/iif only evaluate the arguments they need
        match name.to_lowercase().as_str() {
            "and" => {
                require_at_least(args, 2, "and")?;
                for arg in args {
                    if !self.eval(arg)?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            "or" => {
                require_at_least(args, 2, "or")?;
                for arg in args {
                    if self.eval(arg)?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            "iif" => {
                if args.len() != 3 {
                    return Err(EvalError::new(format!(
                        "iif() requires 3 arguments, got {}",
                        args.len()
                    )));
                }
                if self.eval(&args[0])?.is_truthy() {
                    self.eval(&args[1])
                } else {
                    self.eval(&args[2])
                }
            }
            _ => {
                let evaluated: Result<Vec<Value>, EvalError> =
                    args.iter().map(|a| self.eval(a)).collect();
                self.functions.call(name, evaluated?, &self.context)
            }
        }
    }

    fn eval_reference(&self, reference: &Reference) -> Result<Value, EvalError> {
        let parts = &reference.parts;
        let root = reference.root().to_lowercase();

        let resolved = match root.as_str() {
            "variables" if parts.len() == 1 => Some(Value::Object(
                self.context
                    .variables
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            )),
            // variables.Build.SourceBranch names one dotted variable
            "variables" => match self.dotted_name(&parts[1..])? {
                Some(name) => self.context.lookup_variable(&name),
                None => None,
            },
            "parameters" if parts.len() == 1 => Some(self.context.parameters.to_value()),
            "parameters" => match reference.member() {
                Some(name) => match self.context.parameters.get(name) {
                    Some(value) => Some(self.navigate(value.clone(), &parts[2..])?),
                    None => None,
                },
                None => None,
            },
            "matrix" if parts.len() == 1 => Some(Value::Object(
                self.context
                    .matrix
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            )),
            "matrix" => reference
                .member()
                .and_then(|axis| self.context.matrix_value(axis))
                .map(Value::from),
            "dependencies" if parts.len() > 1 => reference
                .member()
                .and_then(|name| self.context.dependency(name))
                .map(|status| {
                    let result = Value::from(status.as_str());
                    match parts.get(2) {
                        Some(_) => result,
                        None => Value::Object(HashMap::from([("result".to_string(), result)])),
                    }
                }),
            "branch" if parts.len() == 1 => Some(Value::from(self.context.trigger.branch_name())),
            "reason" if parts.len() == 1 => Some(Value::from(self.context.trigger.reason.as_str())),
            "repository" if parts.len() == 1 => {
                Some(Value::from(self.context.trigger.repository.as_str()))
            }
            // Bare names, including dotted ones such as Build.Reason
            _ => match self.dotted_name(parts)? {
                Some(name) => self.context.lookup_variable(&name),
                None => None,
            },
        };

        match resolved {
            Some(value) => Ok(value),
            None if self.context.strict => Err(EvalError::unresolved(reference.to_string())),
            None => Ok(Value::String(String::new())),
        }
    }

    /// Join property names and string indexes into one dotted name
    fn dotted_name(&self, parts: &[ReferencePart]) -> Result<Option<String>, EvalError> {
        let mut segments = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                ReferencePart::Property(name) => segments.push(name.clone()),
                ReferencePart::Index(expr) => match self.eval(expr)? {
                    Value::String(s) => segments.push(s),
                    _ => return Ok(None),
                },
            }
        }
        Ok(Some(segments.join(".")))
    }

    fn navigate(&self, mut current: Value, parts: &[ReferencePart]) -> Result<Value, EvalError> {
        for part in parts {
            current = match part {
                ReferencePart::Property(name) => member(&current, name)?,
                ReferencePart::Index(expr) => {
                    let index = self.eval(expr)?;
                    index_value(&current, &index)?
                }
            };
        }
        Ok(current)
    }
}

fn member(object: &Value, property: &str) -> Result<Value, EvalError> {
    match object {
        Value::Object(map) => Ok(map
            .get(property)
            .or_else(|| {
                map.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(property))
                    .map(|(_, v)| v)
            })
            .cloned()
            .unwrap_or(Value::Null)),
        Value::Array(arr) if property.eq_ignore_ascii_case("length") => {
            Ok(Value::Number(arr.len() as f64))
        }
        _ => Err(EvalError::new(format!(
            "cannot read property '{}' of {}",
            property,
            object.as_string()
        ))),
    }
}

fn index_value(object: &Value, index: &Value) -> Result<Value, EvalError> {
    match (object, index) {
        (Value::Array(arr), Value::Number(n)) if *n >= 0.0 => {
            Ok(arr.get(*n as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::Object(_), key) => member(object, &key.as_string()),
        _ => Err(EvalError::new(format!(
            "cannot index {} with {}",
            object.as_string(),
            index.as_string()
        ))),
    }
}

/// Numeric when both sides are numbers, otherwise case-insensitive text
fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    match op {
        BinaryOp::Eq => left.loosely_equals(right),
        BinaryOp::Ne => !left.loosely_equals(right),
        _ => {
            let ordering = match (left.as_number(), right.as_number()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => Some(
                    left.as_string()
                        .to_lowercase()
                        .cmp(&right.as_string().to_lowercase()),
                ),
            };
            match (op, ordering) {
                (BinaryOp::Lt, Some(Ordering::Less)) => true,
                (BinaryOp::Le, Some(Ordering::Less | Ordering::Equal)) => true,
                (BinaryOp::Gt, Some(Ordering::Greater)) => true,
                (BinaryOp::Ge, Some(Ordering::Greater | Ordering::Equal)) => true,
                _ => false,
            }
        }
    }
}

fn require_at_least(args: &[Expr], count: usize, name: &str) -> Result<(), EvalError> {
    if args.len() < count {
        return Err(EvalError::new(format!(
            "{}() requires at least {} arguments, got {}",
            name,
            count,
            args.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parser::ExprParser;
    use std::collections::BTreeMap;

    struct Fixture {
        variables: Variables,
        parameters: ResolvedParameters,
        trigger: TriggerContext,
        dependencies: Vec<(String, RunStatus)>,
        matrix: Vec<(String, String)>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                variables: Variables::from_map(BTreeMap::from([
                    ("configuration".to_string(), "Release".to_string()),
                    ("Deploy.Target".to_string(), "prod".to_string()),
                ])),
                parameters: ResolvedParameters::new(HashMap::from([
                    ("runTests".to_string(), Value::Bool(true)),
                    (
                        "settings".to_string(),
                        Value::Object(HashMap::from([("region".to_string(), Value::from("eu"))])),
                    ),
                ])),
                trigger: TriggerContext::new("main", "PullRequest", "app"),
                dependencies: vec![("Build".to_string(), RunStatus::Succeeded)],
                matrix: vec![("os".to_string(), "linux".to_string())],
            }
        }

        fn context(&self, strict: bool) -> ConditionContext<'_> {
            ConditionContext::new(&self.variables, &self.parameters, &self.trigger)
                .with_dependencies(&self.dependencies)
                .with_matrix(&self.matrix)
                .strict(strict)
        }

        fn eval(&self, input: &str) -> Value {
            self.try_eval(input, false).unwrap()
        }

        fn try_eval(&self, input: &str, strict: bool) -> Result<Value, EvalError> {
            let expr = ExprParser::parse_str(input).unwrap();
            Evaluator::new(self.context(strict)).eval(&expr)
        }
    }

    #[test]
    fn test_branch_and_reason_scenario() {
        let fx = Fixture::new();
        assert_eq!(
            fx.eval(r#"branch == "main" and reason != "PullRequest""#),
            Value::Bool(false)
        );
        assert_eq!(fx.eval("branch == 'MAIN'"), Value::Bool(true));
    }

    #[test]
    fn test_variable_forms() {
        let fx = Fixture::new();
        assert_eq!(fx.eval("variables.configuration"), Value::from("Release"));
        assert_eq!(fx.eval("variables['Deploy.Target']"), Value::from("prod"));
        assert_eq!(fx.eval("variables.Deploy.Target"), Value::from("prod"));
        assert_eq!(fx.eval("configuration"), Value::from("Release"));
        assert_eq!(
            fx.eval("variables['Build.SourceBranch']"),
            Value::from("refs/heads/main")
        );
        assert_eq!(fx.eval("Build.Reason"), Value::from("PullRequest"));
    }

    #[test]
    fn test_parameters_and_matrix() {
        let fx = Fixture::new();
        assert_eq!(fx.eval("parameters.runTests"), Value::Bool(true));
        assert_eq!(fx.eval("parameters.settings.region"), Value::from("eu"));
        assert_eq!(fx.eval("matrix.os == 'linux'"), Value::Bool(true));
        assert_eq!(fx.eval("os"), Value::from("linux"));
    }

    #[test]
    fn test_dependency_result() {
        let fx = Fixture::new();
        assert_eq!(
            fx.eval("dependencies.Build.result == 'Succeeded'"),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_membership() {
        let fx = Fixture::new();
        assert_eq!(fx.eval("reason in ['Manual', 'pullrequest']"), Value::Bool(true));
        assert_eq!(fx.eval("matrix.os not in ['windows']"), Value::Bool(true));
    }

    #[test]
    fn test_ordering() {
        let fx = Fixture::new();
        assert_eq!(fx.eval("3 < 10"), Value::Bool(true));
        assert_eq!(fx.eval("'10' >= 9"), Value::Bool(true));
        assert_eq!(fx.eval("'abc' < 'ABD'"), Value::Bool(true));
    }

    #[test]
    fn test_unknown_reference_lenient_and_strict() {
        let fx = Fixture::new();
        assert_eq!(fx.eval("variables.nope"), Value::from(""));
        assert_eq!(fx.eval("not variables.nope"), Value::Bool(true));

        let err = fx.try_eval("variables.nope == 'x'", true).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UnresolvedReference);
        assert_eq!(err.message, "variables.nope");
    }

    #[test]
    fn test_short_circuit_skips_unresolved() {
        let fx = Fixture::new();
        assert_eq!(
            fx.try_eval("false and variables.nope", true).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            fx.try_eval("or(true, variables.nope)", true).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            fx.try_eval("iif(true, 'a', variables.nope)", true).unwrap(),
            Value::from("a")
        );
    }
}
