// Conditions
// Parsed gate expressions with the implicit "dependencies succeeded" rule

use crate::error::ConditionError;
use crate::expression::evaluator::{ConditionContext, EvalError, EvalErrorKind, Evaluator};
use crate::expression::parser::{Expr, ExprParser, Reference};
use crate::parser::models::RunStatus;

/// A stage, job or step condition.
///
/// A missing condition means `succeeded()`. A condition that calls no
/// status function is read as `succeeded() and (<condition>)`; calling
/// `failed()`, `always()`, `canceled()` or `succeededOrFailed()` opts the
/// gated entity into running after upstream failures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    source: Option<String>,
    expr: Option<Expr>,
}

impl Condition {
    pub fn parse(source: Option<&str>) -> Result<Self, ConditionError> {
        let Some(text) = source.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self::default());
        };

        let expr = ExprParser::parse_str(text).map_err(|source| ConditionError::Syntax {
            condition: text.to_string(),
            source,
        })?;

        Ok(Self {
            source: Some(text.to_string()),
            expr: Some(expr),
        })
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Whether this entity may run after a dependency failed or was skipped
    pub fn opts_into_failure(&self) -> bool {
        self.expr
            .as_ref()
            .map(Expr::calls_status_function)
            .unwrap_or(false)
    }

    pub fn references(&self) -> Vec<&Reference> {
        self.expr.as_ref().map(Expr::references).unwrap_or_default()
    }

    /// Decide whether the gated entity runs
    pub fn gate(&self, context: &ConditionContext<'_>) -> Result<bool, ConditionError> {
        if !self.opts_into_failure() {
            let upstream_ok = context
                .dependencies
                .iter()
                .all(|(_, status)| *status == RunStatus::Succeeded);
            if !upstream_ok {
                return Ok(false);
            }
        }

        self.evaluate(context)
    }

    /// Evaluate the expression as written, without the implicit rule
    pub fn evaluate(&self, context: &ConditionContext<'_>) -> Result<bool, ConditionError> {
        let Some(expr) = &self.expr else {
            return Ok(true);
        };

        Evaluator::new(*context)
            .eval(expr)
            .map(|value| value.is_truthy())
            .map_err(|err| self.wrap(err))
    }

    fn wrap(&self, err: EvalError) -> ConditionError {
        let condition = self.source.clone().unwrap_or_default();
        match err.kind {
            EvalErrorKind::UnresolvedReference => ConditionError::UnresolvedReference {
                condition,
                reference: err.message,
            },
            _ => ConditionError::Eval {
                condition,
                source: err,
            },
        }
    }
}

/// Parse and evaluate a condition string as written
pub fn evaluate(condition: &str, context: &ConditionContext<'_>) -> Result<bool, ConditionError> {
    Condition::parse(Some(condition))?.evaluate(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::context::{TriggerContext, Variables};
    use crate::parser::parameters::ResolvedParameters;

    fn check(condition: Option<&str>, dependencies: &[(&str, RunStatus)]) -> bool {
        let variables = Variables::new();
        let parameters = ResolvedParameters::default();
        let trigger = TriggerContext::new("main", "Manual", "app");
        let deps: Vec<(String, RunStatus)> =
            dependencies.iter().map(|(n, s)| (n.to_string(), *s)).collect();
        let ctx = ConditionContext::new(&variables, &parameters, &trigger).with_dependencies(&deps);
        Condition::parse(condition).unwrap().gate(&ctx).unwrap()
    }

    #[test]
    fn test_missing_condition_requires_success() {
        assert!(check(None, &[("Build", RunStatus::Succeeded)]));
        assert!(!check(None, &[("Build", RunStatus::Failed)]));
        assert!(!check(None, &[("Build", RunStatus::Skipped)]));
        assert!(check(None, &[]));
    }

    #[test]
    fn test_plain_condition_is_implicitly_and_succeeded() {
        assert!(check(Some("eq(branch, 'main')"), &[("Build", RunStatus::Succeeded)]));
        assert!(!check(Some("eq(branch, 'main')"), &[("Build", RunStatus::Failed)]));
        assert!(!check(Some("eq(branch, 'dev')"), &[]));
    }

    #[test]
    fn test_status_functions_opt_in() {
        assert!(check(Some("failed()"), &[("Build", RunStatus::Failed)]));
        assert!(check(Some("always()"), &[("Build", RunStatus::Failed)]));
        assert!(check(
            Some("and(succeededOrFailed(), eq(branch, 'main'))"),
            &[("Build", RunStatus::Failed)]
        ));
        assert!(!check(Some("failed()"), &[("Build", RunStatus::Succeeded)]));
    }

    #[test]
    fn test_blank_condition_is_default() {
        let condition = Condition::parse(Some("  ")).unwrap();
        assert_eq!(condition, Condition::default());
        assert!(!condition.opts_into_failure());
    }

    #[test]
    fn test_syntax_error() {
        let err = Condition::parse(Some("eq(branch,")).unwrap_err();
        assert!(matches!(err, ConditionError::Syntax { .. }));
    }

    #[test]
    fn test_free_evaluate_and_strict_errors() {
        let variables = Variables::new();
        let parameters = ResolvedParameters::default();
        let trigger = TriggerContext::new("main", "PullRequest", "app");
        let ctx = ConditionContext::new(&variables, &parameters, &trigger);

        assert!(!evaluate(r#"branch == "main" and reason != "PullRequest""#, &ctx).unwrap());
        assert!(!evaluate("variables.missing", &ctx).unwrap());

        let strict = ctx.strict(true);
        assert!(matches!(
            evaluate("variables.missing", &strict),
            Err(ConditionError::UnresolvedReference { ref reference, .. }) if reference == "variables.missing"
        ));
        assert!(matches!(
            evaluate("eq(1)", &strict),
            Err(ConditionError::Eval { .. })
        ));
    }
}
