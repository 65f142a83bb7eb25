// Condition Evaluator
// Lexer, parser, evaluator and built-in functions for condition expressions

pub mod condition;
pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use condition::{evaluate, Condition};
pub use evaluator::{ConditionContext, EvalError, EvalErrorKind, Evaluator};
pub use functions::BuiltinFunctions;
pub use lexer::{extract_segments, LexError, Lexer, Segment, Token};
pub use parser::{BinaryOp, Expr, ExprParser, ParseExprError, Reference, ReferencePart, UnaryOp};
