// Built-in Functions
// Comparison, string, utility and dependency-status functions for conditions

use crate::expression::evaluator::{ConditionContext, EvalError};
use crate::parser::models::{RunStatus, Value};

/// Registry of built-in functions
pub struct BuiltinFunctions;

impl BuiltinFunctions {
    pub fn new() -> Self {
        Self
    }

    /// Call a function with already evaluated arguments.
    /// `and`, `or` and `iif` are handled lazily by the evaluator.
    pub fn call(
        &self,
        name: &str,
        args: Vec<Value>,
        context: &ConditionContext<'_>,
    ) -> Result<Value, EvalError> {
        match name.to_lowercase().as_str() {
            // Comparison
            "eq" => self.fn_eq(args),
            "ne" => self.fn_ne(args),
            "in" => self.fn_in(args),
            "notin" => self.fn_in(args).map(|v| Value::Bool(!v.is_truthy())),

            // Logical
            "not" => self.fn_not(args),
            "xor" => self.fn_xor(args),

            // String
            "contains" => self.fn_contains(args),
            "startswith" => self.fn_startswith(args),
            "endswith" => self.fn_endswith(args),
            "format" => self.fn_format(args),
            "lower" => self.fn_lower(args),
            "upper" => self.fn_upper(args),
            "join" => self.fn_join(args),

            // Utility
            "coalesce" => Ok(self.fn_coalesce(args)),
            "length" => self.fn_length(args),

            // Dependency status
            "succeeded" => Ok(self.fn_status(args, context, |s| s == RunStatus::Succeeded, true)),
            "failed" => Ok(self.fn_status(args, context, |s| s == RunStatus::Failed, false)),
            "canceled" => Ok(self.fn_status(args, context, |s| s == RunStatus::Canceled, false)),
            "succeededorfailed" => Ok(self.fn_status(
                args,
                context,
                |s| s != RunStatus::Canceled,
                true,
            )),
            "always" => Ok(Value::Bool(true)),

            _ => Err(EvalError::unknown_function(name)),
        }
    }

    // =========================================================================
    // Comparison Functions
    // =========================================================================

    fn fn_eq(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "eq")?;
        Ok(Value::Bool(args[0].loosely_equals(&args[1])))
    }

    fn fn_ne(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "ne")?;
        Ok(Value::Bool(!args[0].loosely_equals(&args[1])))
    }

    fn fn_in(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        if args.len() < 2 {
            return Err(EvalError::new("in() requires at least 2 arguments"));
        }
        let needle = &args[0];
        Ok(Value::Bool(
            args[1..].iter().any(|candidate| candidate.loosely_equals(needle)),
        ))
    }

    // =========================================================================
    // Logical Functions
    // =========================================================================

    fn fn_not(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "not")?;
        Ok(Value::Bool(!args[0].is_truthy()))
    }

    fn fn_xor(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "xor")?;
        Ok(Value::Bool(args[0].is_truthy() ^ args[1].is_truthy()))
    }

    // =========================================================================
    // String Functions
    // =========================================================================

    fn fn_contains(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "contains")?;

        match &args[0] {
            Value::Array(items) => Ok(Value::Bool(
                items.iter().any(|item| item.loosely_equals(&args[1])),
            )),
            haystack => Ok(Value::Bool(
                haystack
                    .as_string()
                    .to_lowercase()
                    .contains(&args[1].as_string().to_lowercase()),
            )),
        }
    }

    fn fn_startswith(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "startsWith")?;
        let s = args[0].as_string().to_lowercase();
        Ok(Value::Bool(s.starts_with(&args[1].as_string().to_lowercase())))
    }

    fn fn_endswith(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "endsWith")?;
        let s = args[0].as_string().to_lowercase();
        Ok(Value::Bool(s.ends_with(&args[1].as_string().to_lowercase())))
    }

    fn fn_format(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        let Some(template) = args.first() else {
            return Err(EvalError::new("format() requires at least 1 argument"));
        };

        let mut result = template.as_string();
        for (i, arg) in args.iter().skip(1).enumerate() {
            result = result.replace(&format!("{{{}}}", i), &arg.as_string());
        }

        Ok(Value::String(result))
    }

    fn fn_lower(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "lower")?;
        Ok(Value::String(args[0].as_string().to_lowercase()))
    }

    fn fn_upper(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "upper")?;
        Ok(Value::String(args[0].as_string().to_uppercase()))
    }

    fn fn_join(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "join")?;
        let separator = args[0].as_string();
        match &args[1] {
            Value::Array(items) => Ok(Value::String(
                items
                    .iter()
                    .map(Value::as_string)
                    .collect::<Vec<_>>()
                    .join(&separator),
            )),
            other => Ok(Value::String(other.as_string())),
        }
    }

    // =========================================================================
    // Utility Functions
    // =========================================================================

    fn fn_coalesce(&self, args: Vec<Value>) -> Value {
        args.into_iter()
            .find(|arg| !matches!(arg, Value::Null) && !matches!(arg, Value::String(s) if s.is_empty()))
            .unwrap_or(Value::Null)
    }

    fn fn_length(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "length")?;
        match &args[0] {
            Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
            Value::Array(arr) => Ok(Value::Number(arr.len() as f64)),
            Value::Object(obj) => Ok(Value::Number(obj.len() as f64)),
            Value::Null => Ok(Value::Number(0.0)),
            _ => Err(EvalError::new("length() requires a string, list or object")),
        }
    }

    // =========================================================================
    // Status Functions
    // =========================================================================

    /// Without arguments, `all_of` decides between "every dependency matches"
    /// and "some dependency matches". With arguments every named dependency
    /// must exist and match.
    fn fn_status(
        &self,
        args: Vec<Value>,
        context: &ConditionContext<'_>,
        predicate: impl Fn(RunStatus) -> bool,
        all_of: bool,
    ) -> Value {
        if !args.is_empty() {
            return Value::Bool(args.iter().all(|name| {
                context
                    .dependency(&name.as_string())
                    .map(&predicate)
                    .unwrap_or(false)
            }));
        }

        let mut statuses = context.dependencies.iter().map(|(_, status)| *status);
        if all_of {
            Value::Bool(statuses.all(&predicate))
        } else {
            Value::Bool(statuses.any(&predicate))
        }
    }

    // =========================================================================
    // Helper Functions
    // =========================================================================

    fn require_args(&self, args: &[Value], count: usize, name: &str) -> Result<(), EvalError> {
        if args.len() != count {
            return Err(EvalError::new(format!(
                "{}() requires {} argument(s), got {}",
                name,
                count,
                args.len()
            )));
        }
        Ok(())
    }
}

impl Default for BuiltinFunctions {
    fn default() -> Self {
        Self::new()
    }
}
