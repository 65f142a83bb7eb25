// Parser Module
// Definition models, parameter resolution, template loading and validation

pub mod error;
pub mod loader;
pub mod models;
pub mod parameters;
pub mod substitution;

pub use error::{ParseError, ParseErrorKind};
pub use loader::{validate, DefinitionLoader, LoadedDefinition, TemplateError, TemplateErrorKind};
pub use models::*;
pub use parameters::{ParameterResolver, ResolvedParameters};
pub use substitution::Substitutor;
