// Definition Loader
// Reads a pipeline definition, resolves parameters and templates, and validates the result

use crate::error::DefinitionError;
use crate::execution::graph::PipelineGraph;
use crate::execution::matrix::MatrixExpander;
use crate::expression::condition::Condition;
use crate::parser::error::ParseError;
use crate::parser::models::{Job, Parameter, PipelineDefinition, Stage};
use crate::parser::parameters::{ParameterResolver, ResolvedParameters};
use crate::parser::substitution::Substitutor;

use serde::Deserialize;
use serde_yaml::Value as Yaml;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Maximum template inclusion depth
pub const MAX_TEMPLATE_DEPTH: usize = 50;

#[derive(Debug, Clone)]
pub struct TemplateError {
    pub message: String,
    pub template_path: Option<String>,
    pub kind: TemplateErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateErrorKind {
    NotFound,
    CircularReference,
    MaxDepthExceeded,
    /// Template file lacks the expected `stages`/`jobs` section
    InvalidContent,
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.template_path {
            write!(f, "template error in '{}': {}", path, self.message)
        } else {
            write!(f, "template error: {}", self.message)
        }
    }
}

impl std::error::Error for TemplateError {}

impl TemplateError {
    pub fn new(message: impl Into<String>, kind: TemplateErrorKind) -> Self {
        Self {
            message: message.into(),
            template_path: None,
            kind,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.template_path = Some(path.into());
        self
    }
}

/// A loaded, fully materialized definition and its resolved parameters
#[derive(Debug, Clone)]
pub struct LoadedDefinition {
    pub definition: PipelineDefinition,
    pub parameters: ResolvedParameters,
    pub source: Option<PathBuf>,
}

/// Only the parameter declarations, read before anything is substituted
#[derive(Debug, Default, Deserialize)]
struct ParameterHeader {
    #[serde(default)]
    parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Stages,
    Jobs,
}

impl Section {
    fn key(&self) -> &'static str {
        match self {
            Section::Stages => "stages",
            Section::Jobs => "jobs",
        }
    }
}

/// Loads definitions from files or strings.
///
/// Template references (`- template: path.yml` entries under `stages` or
/// `jobs`) are resolved relative to the including file and inlined, so
/// the result is one closed definition.
#[derive(Debug, Default)]
pub struct DefinitionLoader {
    include_stack: Vec<String>,
}

impl DefinitionLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_file(
        &mut self,
        path: &Path,
        overrides: &HashMap<String, Yaml>,
    ) -> Result<LoadedDefinition, DefinitionError> {
        let source = fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        self.include_stack.clear();
        self.include_stack.push(canonical_path(path));
        let mut loaded = self.load_str(&source, base_dir, overrides)?;
        loaded.source = Some(path.to_path_buf());
        Ok(loaded)
    }

    pub fn load_str(
        &mut self,
        source: &str,
        base_dir: &Path,
        overrides: &HashMap<String, Yaml>,
    ) -> Result<LoadedDefinition, DefinitionError> {
        let tree: Yaml =
            serde_yaml::from_str(source).map_err(|e| ParseError::from_yaml_error(&e, source))?;
        let header: ParameterHeader = if tree.is_null() {
            ParameterHeader::default()
        } else {
            serde_yaml::from_str(source).map_err(|e| ParseError::from_yaml_error(&e, source))?
        };

        let parameters = ParameterResolver::resolve(&header.parameters, overrides)?;

        let mut body = match tree {
            Yaml::Mapping(map) => map,
            Yaml::Null => serde_yaml::Mapping::new(),
            _ => {
                return Err(ParseError::new("a pipeline definition must be a mapping", 1, 1).into())
            }
        };
        body.remove("parameters");

        let body = Substitutor::new(&parameters).substitute(&Yaml::Mapping(body), "")?;
        let body = self.materialize(body, base_dir)?;

        let mut definition: PipelineDefinition =
            serde_yaml::from_value(body).map_err(|e| ParseError::from_value_error(&e))?;
        definition.parameters = header.parameters;

        validate(&definition, &parameters)?;

        Ok(LoadedDefinition {
            definition,
            parameters,
            source: None,
        })
    }

    /// Inline stage and job templates throughout a substituted definition
    fn materialize(&mut self, body: Yaml, base_dir: &Path) -> Result<Yaml, DefinitionError> {
        let Yaml::Mapping(mut map) = body else {
            return Ok(body);
        };

        if let Some(stages) = map.remove("stages") {
            let stages = self.expand_section(stages, base_dir, Section::Stages)?;
            map.insert(Yaml::from("stages"), stages);
        }

        Ok(Yaml::Mapping(map))
    }

    fn expand_section(
        &mut self,
        entries: Yaml,
        base_dir: &Path,
        section: Section,
    ) -> Result<Yaml, DefinitionError> {
        let Yaml::Sequence(items) = entries else {
            return Ok(entries);
        };

        let mut expanded = Vec::with_capacity(items.len());
        for item in items {
            match template_reference(&item) {
                Some(reference) => {
                    let arguments = template_arguments(&item, &reference)?;
                    expanded.extend(self.expand_template(&reference, &arguments, base_dir, section)?);
                }
                None => expanded.push(self.expand_children(item, base_dir, section)?),
            }
        }

        Ok(Yaml::Sequence(expanded))
    }

    /// Stages contain jobs, which may themselves be templates
    fn expand_children(
        &mut self,
        item: Yaml,
        base_dir: &Path,
        section: Section,
    ) -> Result<Yaml, DefinitionError> {
        match (section, item) {
            (Section::Stages, Yaml::Mapping(mut stage)) => {
                if let Some(jobs) = stage.remove("jobs") {
                    let jobs = self.expand_section(jobs, base_dir, Section::Jobs)?;
                    stage.insert(Yaml::from("jobs"), jobs);
                }
                Ok(Yaml::Mapping(stage))
            }
            (_, item) => Ok(item),
        }
    }

    fn expand_template(
        &mut self,
        reference: &str,
        arguments: &HashMap<String, Yaml>,
        base_dir: &Path,
        section: Section,
    ) -> Result<Vec<Yaml>, DefinitionError> {
        let path = base_dir.join(reference);
        if !path.is_file() {
            return Err(TemplateError::new(
                format!("template not found (looked in {})", path.display()),
                TemplateErrorKind::NotFound,
            )
            .with_path(reference)
            .into());
        }

        self.push_template(&canonical_path(&path))?;
        let result = self.expand_template_file(reference, &path, arguments, section);
        self.pop_template();
        result
    }

    fn expand_template_file(
        &mut self,
        reference: &str,
        path: &Path,
        arguments: &HashMap<String, Yaml>,
        section: Section,
    ) -> Result<Vec<Yaml>, DefinitionError> {
        let source = fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let invalid = |message: String| -> DefinitionError {
            TemplateError::new(message, TemplateErrorKind::InvalidContent)
                .with_path(reference)
                .into()
        };

        let tree: Yaml = serde_yaml::from_str(&source)
            .map_err(|e| invalid(ParseError::from_yaml_error(&e, &source).to_string()))?;
        let header: ParameterHeader = serde_yaml::from_str(&source)
            .map_err(|e| invalid(ParseError::from_yaml_error(&e, &source).to_string()))?;

        let parameters = ParameterResolver::resolve(&header.parameters, arguments)
            .map_err(|e| invalid(e.to_string()))?;

        let Yaml::Mapping(mut body) = tree else {
            return Err(invalid("template must be a mapping".to_string()));
        };
        let Some(content) = body.remove(section.key()) else {
            return Err(invalid(format!("template does not define '{}'", section.key())));
        };

        let content = Substitutor::new(&parameters).substitute(&content, section.key())?;
        let template_dir = path.parent().unwrap_or_else(|| Path::new("."));
        match self.expand_section(content, template_dir, section)? {
            Yaml::Sequence(items) => Ok(items),
            _ => Err(invalid(format!("'{}' must be a list", section.key()))),
        }
    }

    fn push_template(&mut self, canonical: &str) -> Result<(), TemplateError> {
        if self.include_stack.len() >= MAX_TEMPLATE_DEPTH {
            return Err(TemplateError::new(
                format!(
                    "maximum template inclusion depth ({}) exceeded:\n  {}",
                    MAX_TEMPLATE_DEPTH,
                    self.include_stack.join("\n  -> ")
                ),
                TemplateErrorKind::MaxDepthExceeded,
            ));
        }

        if self.include_stack.iter().any(|p| p == canonical) {
            let mut cycle = self.include_stack.clone();
            cycle.push(canonical.to_string());
            return Err(TemplateError::new(
                format!("circular template reference:\n  {}", cycle.join("\n  -> ")),
                TemplateErrorKind::CircularReference,
            ));
        }

        self.include_stack.push(canonical.to_string());
        Ok(())
    }

    fn pop_template(&mut self) {
        self.include_stack.pop();
    }
}

fn canonical_path(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

fn template_reference(item: &Yaml) -> Option<String> {
    item.as_mapping()?
        .get("template")?
        .as_str()
        .map(str::to_string)
}

fn template_arguments(item: &Yaml, reference: &str) -> Result<HashMap<String, Yaml>, DefinitionError> {
    let Some(map) = item.as_mapping() else {
        return Ok(HashMap::new());
    };

    if let Some(key) = map
        .keys()
        .filter_map(Yaml::as_str)
        .find(|key| *key != "template" && *key != "parameters")
    {
        return Err(TemplateError::new(
            format!("unexpected key '{}' next to 'template'", key),
            TemplateErrorKind::InvalidContent,
        )
        .with_path(reference)
        .into());
    }

    match map.get("parameters") {
        None | Some(Yaml::Null) => Ok(HashMap::new()),
        Some(Yaml::Mapping(params)) => Ok(params
            .iter()
            .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), v.clone())))
            .collect()),
        Some(_) => Err(TemplateError::new(
            "template 'parameters' must be a mapping",
            TemplateErrorKind::InvalidContent,
        )
        .with_path(reference)
        .into()),
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Semantic checks on a materialized definition
pub fn validate(
    definition: &PipelineDefinition,
    parameters: &ResolvedParameters,
) -> Result<(), DefinitionError> {
    let mut stage_names = HashSet::new();
    for stage in &definition.stages {
        check_name("stage", &stage.stage)?;
        if !stage_names.insert(stage.stage.to_lowercase()) {
            return Err(DefinitionError::DuplicateName {
                kind: "stage",
                name: stage.stage.clone(),
            });
        }

        let stage_deps = stage.depends_on.as_vec();
        check_condition(
            &format!("stage '{}'", stage.stage),
            stage.condition.as_deref(),
            parameters,
            &stage_deps,
            None,
        )?;

        validate_jobs(stage, parameters)?;
    }

    PipelineGraph::build(&definition.stages)?;
    Ok(())
}

fn validate_jobs(stage: &Stage, parameters: &ResolvedParameters) -> Result<(), DefinitionError> {
    let mut job_names = HashSet::new();
    for job in &stage.jobs {
        check_name("job", &job.job)?;
        if !job_names.insert(job.job.to_lowercase()) {
            return Err(DefinitionError::DuplicateName {
                kind: "job",
                name: format!("{}/{}", stage.stage, job.job),
            });
        }

        if job.max_parallel == Some(0) {
            return Err(DefinitionError::InvalidMatrix {
                job: job.job.clone(),
                message: "maxParallel must be at least 1".to_string(),
            });
        }

        MatrixExpander::check(job).map_err(|err| DefinitionError::InvalidMatrix {
            job: job.job.clone(),
            message: err.to_string(),
        })?;

        let location = format!("job '{}/{}'", stage.stage, job.job);
        let job_deps = job.depends_on.as_vec();
        check_condition(&location, job.condition.as_deref(), parameters, &job_deps, Some(job))?;

        validate_steps(stage, job, parameters)?;
    }
    Ok(())
}

fn validate_steps(
    stage: &Stage,
    job: &Job,
    parameters: &ResolvedParameters,
) -> Result<(), DefinitionError> {
    let mut step_names = HashSet::new();
    for (index, step) in job.steps.iter().enumerate() {
        if let Some(name) = &step.name {
            check_name("step", name)?;
            if !step_names.insert(name.to_lowercase()) {
                return Err(DefinitionError::DuplicateName {
                    kind: "step",
                    name: format!("{}/{}/{}", stage.stage, job.job, name),
                });
            }
        }

        let location = format!("step {} of job '{}/{}'", index + 1, stage.stage, job.job);
        check_condition(&location, step.condition.as_deref(), parameters, &[], Some(job))?;
    }
    Ok(())
}

fn check_name(kind: &'static str, name: &str) -> Result<(), DefinitionError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DefinitionError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}

/// The condition must parse and only reference declared parameters,
/// dependencies the entity actually has, and its job's matrix axes
fn check_condition(
    location: &str,
    condition: Option<&str>,
    parameters: &ResolvedParameters,
    dependencies: &[String],
    job: Option<&Job>,
) -> Result<(), DefinitionError> {
    let condition = Condition::parse(condition).map_err(|err| DefinitionError::InvalidCondition {
        location: location.to_string(),
        message: err.to_string(),
    })?;

    for reference in condition.references() {
        let Some(member) = reference.member() else {
            continue;
        };

        let undeclared = match reference.root().to_lowercase().as_str() {
            "parameters" if !parameters.contains(member) => Some(format!("parameter '{}'", member)),
            "dependencies"
                if !dependencies.iter().any(|d| d.eq_ignore_ascii_case(member)) =>
            {
                Some(format!("dependency '{}'", member))
            }
            "matrix" => {
                let declared = job
                    .and_then(|j| j.matrix.as_ref())
                    .map(|m| m.dimensions.iter().any(|a| a.name.eq_ignore_ascii_case(member)))
                    .unwrap_or(false);
                (!declared).then(|| format!("matrix axis '{}'", member))
            }
            _ => None,
        };

        if let Some(name) = undeclared {
            return Err(DefinitionError::UndeclaredReference {
                location: location.to_string(),
                name,
            });
        }
    }

    Ok(())
}
