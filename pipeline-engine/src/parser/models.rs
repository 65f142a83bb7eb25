// Pipeline Definition Data Models
// Typed representation of a materialized stage/job/step definition

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Root of a fully materialized pipeline definition.
///
/// Templates and `${{ }}` expressions have already been resolved by the
/// loader when this type is produced, so every field is plain data.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    /// Pipeline name
    pub name: Option<String>,

    /// Declared parameters
    #[serde(default)]
    pub parameters: Vec<Parameter>,

    /// Global variables
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub variables: BTreeMap<String, String>,

    /// Stages in declaration order
    #[serde(default)]
    pub stages: Vec<Stage>,
}

// =============================================================================
// Parameters
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    pub display_name: Option<String>,
    #[serde(rename = "type", default)]
    pub param_type: ParameterType,
    pub default: Option<serde_yaml::Value>,
    /// Allowed values
    pub values: Option<Vec<serde_yaml::Value>>,
    /// Defaults to "no default declared"
    pub required: Option<bool>,
}

impl Parameter {
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(self.default.is_none())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    String,
    Number,
    Boolean,
    Object,
    List,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Boolean => "boolean",
            ParameterType::Object => "object",
            ParameterType::List => "list",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Stage
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    /// Stage identifier
    pub stage: String,

    /// Display name
    pub display_name: Option<String>,

    /// Dependency on other stages
    #[serde(default)]
    pub depends_on: DependsOn,

    /// Condition for running this stage
    pub condition: Option<String>,

    /// Stage-level variables
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub variables: BTreeMap<String, String>,

    /// Jobs in this stage
    #[serde(default)]
    pub jobs: Vec<Job>,
}

// =============================================================================
// Job
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Job identifier
    pub job: String,

    /// Display name
    pub display_name: Option<String>,

    /// Dependency on other jobs in the same stage
    #[serde(default)]
    pub depends_on: DependsOn,

    /// Condition for running this job
    pub condition: Option<String>,

    /// Matrix configuration
    pub matrix: Option<MatrixConfig>,

    /// Concurrent matrix units of this job
    pub max_parallel: Option<usize>,

    /// Tolerate a matrix that filters down to zero units
    #[serde(default)]
    pub allow_empty_matrix: bool,

    /// Per-unit timeout
    pub timeout_in_minutes: Option<u64>,

    /// Job-level variables
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub variables: BTreeMap<String, String>,

    /// Steps to execute
    #[serde(default)]
    pub steps: Vec<Step>,
}

// =============================================================================
// Matrix
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MatrixConfig {
    /// Axis name to ordered values, in declaration order
    #[serde(default)]
    pub dimensions: Dimensions,

    /// Conjunctive (axis, allowed values) constraints
    #[serde(default)]
    pub filters: Vec<MatrixFilter>,

    /// Combinations to drop
    #[serde(default)]
    pub exclude: Vec<BTreeMap<String, MatrixScalar>>,

    /// Extra combinations appended after filtering
    #[serde(default)]
    pub include: Vec<BTreeMap<String, MatrixScalar>>,

    /// Value substitutions applied last
    #[serde(default)]
    pub replacements: Vec<Replacement>,
}

/// Ordered matrix dimensions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dimensions(pub Vec<Axis>);

impl Dimensions {
    pub fn iter(&self) -> impl Iterator<Item = &Axis> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, axis: &str) -> bool {
        self.0.iter().any(|a| a.name == axis)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub name: String,
    pub values: AxisValues,
}

/// Where an axis gets its values from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisValues {
    /// Inline list: `os: [linux, windows]`
    List(Vec<MatrixScalar>),
    /// Parameter reference: `pyver: parameters.pythonVersions`
    Reference(String),
}

impl<'de> Deserialize<'de> for Dimensions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{MapAccess, Visitor};

        struct DimensionsVisitor;

        impl<'de> Visitor<'de> for DimensionsVisitor {
            type Value = Dimensions;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of axis names to value lists")
            }

            fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut axes = Vec::new();
                while let Some((name, values)) = map.next_entry::<String, AxisValues>()? {
                    axes.push(Axis { name, values });
                }
                Ok(Dimensions(axes))
            }
        }

        deserializer.deserialize_map(DimensionsVisitor)
    }
}

impl Serialize for Dimensions {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for axis in &self.0 {
            map.serialize_entry(&axis.name, &axis.values)?;
        }
        map.end()
    }
}

/// A scalar matrix value, kept as its textual form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "serde_yaml::Value", into = "String")]
pub struct MatrixScalar(pub String);

impl TryFrom<serde_yaml::Value> for MatrixScalar {
    type Error = String;

    fn try_from(value: serde_yaml::Value) -> Result<Self, Self::Error> {
        scalar_to_string(&value)
            .map(MatrixScalar)
            .ok_or_else(|| format!("matrix values must be scalars, got {:?}", value))
    }
}

impl From<MatrixScalar> for String {
    fn from(value: MatrixScalar) -> Self {
        value.0
    }
}

impl From<&str> for MatrixScalar {
    fn from(value: &str) -> Self {
        MatrixScalar(value.to_string())
    }
}

/// Filter: keep combinations whose `axis` value is one of `values`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFilter")]
pub struct MatrixFilter {
    pub axis: String,
    pub values: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFilter {
    Full { axis: String, values: Vec<MatrixScalar> },
    /// `axis=value1,value2`
    Shorthand(String),
}

impl TryFrom<RawFilter> for MatrixFilter {
    type Error = String;

    fn try_from(raw: RawFilter) -> Result<Self, Self::Error> {
        match raw {
            RawFilter::Full { axis, values } => Ok(MatrixFilter {
                axis,
                values: values.into_iter().map(String::from).collect(),
            }),
            RawFilter::Shorthand(text) => MatrixFilter::parse(&text),
        }
    }
}

impl MatrixFilter {
    pub fn new(axis: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            axis: axis.into(),
            values,
        }
    }

    /// Parse the `axis=value1,value2` form
    pub fn parse(text: &str) -> Result<Self, String> {
        let (axis, values) = text
            .split_once('=')
            .ok_or_else(|| format!("invalid filter '{}', expected axis=value[,value]", text))?;
        let axis = axis.trim();
        let values: Vec<String> = values
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if axis.is_empty() || values.is_empty() {
            return Err(format!(
                "invalid filter '{}', expected axis=value[,value]",
                text
            ));
        }
        Ok(Self::new(axis, values))
    }
}

/// Replacement: `axis` value `value` becomes `with`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawReplacement")]
pub struct Replacement {
    pub axis: String,
    pub value: String,
    pub with: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawReplacement {
    Full {
        axis: String,
        value: MatrixScalar,
        with: MatrixScalar,
    },
    /// `axis=value/replacement`
    Shorthand(String),
}

impl TryFrom<RawReplacement> for Replacement {
    type Error = String;

    fn try_from(raw: RawReplacement) -> Result<Self, Self::Error> {
        match raw {
            RawReplacement::Full { axis, value, with } => Ok(Replacement {
                axis,
                value: value.0,
                with: with.0,
            }),
            RawReplacement::Shorthand(text) => {
                let invalid = || {
                    format!(
                        "invalid replacement '{}', expected axis=value/replacement",
                        text
                    )
                };
                let (axis, rest) = text.split_once('=').ok_or_else(invalid)?;
                let (value, with) = rest.split_once('/').ok_or_else(invalid)?;
                if axis.trim().is_empty() || value.trim().is_empty() {
                    return Err(invalid());
                }
                Ok(Replacement {
                    axis: axis.trim().to_string(),
                    value: value.trim().to_string(),
                    with: with.trim().to_string(),
                })
            }
        }
    }
}

// =============================================================================
// DependsOn
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum DependsOn {
    /// Not declared: stages follow the previous stage, jobs are roots
    #[default]
    Implicit,
    /// Single dependency
    Single(String),
    /// Multiple dependencies (`[]` is an explicit root)
    Multiple(Vec<String>),
}

impl DependsOn {
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            DependsOn::Implicit => vec![],
            DependsOn::Single(s) => vec![s.clone()],
            DependsOn::Multiple(v) => v.clone(),
        }
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self, DependsOn::Implicit)
    }
}

// =============================================================================
// Step
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Step name for references
    pub name: Option<String>,

    /// Display name
    pub display_name: Option<String>,

    /// Condition for running this step
    pub condition: Option<String>,

    /// A failure does not fail the unit
    #[serde(default)]
    pub continue_on_error: bool,

    /// Enable/disable step
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Step-level environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// The action to perform
    #[serde(flatten)]
    pub action: StepAction,
}

impl Step {
    /// Label used in logs and reports
    pub fn label(&self, index: usize) -> String {
        self.display_name
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| match &self.action {
                StepAction::Script(_) => format!("Script {}", index + 1),
                StepAction::Publish(p) => format!("Publish {}", p.publish),
                StepAction::Download(d) => format!("Download {}", d.download),
            })
    }
}

/// The specific action a step performs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepAction {
    /// `- script: echo hello`
    Script(ScriptStep),
    /// `- publish: dist/app.whl`
    Publish(PublishStep),
    /// `- download: wheels-linux`
    Download(DownloadStep),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStep {
    pub script: String,
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishStep {
    /// Path of the file to publish
    pub publish: String,
    /// Artifact name (defaults to the file name)
    pub artifact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStep {
    /// Artifact name
    pub download: String,
    /// Destination path (defaults to the artifact name)
    pub path: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Variables accept both `name: value` maps and `- name: x / value: y` lists
fn deserialize_variables<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{Error, MapAccess, SeqAccess, Visitor};

    #[derive(Deserialize)]
    struct NamedVariable {
        name: String,
        value: serde_yaml::Value,
    }

    struct VariablesVisitor;

    impl<'de> Visitor<'de> for VariablesVisitor {
        type Value = BTreeMap<String, String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of variables or a list of name/value pairs")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(BTreeMap::new())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut vars = BTreeMap::new();
            while let Some(var) = seq.next_element::<NamedVariable>()? {
                let value = scalar_to_string(&var.value).ok_or_else(|| {
                    A::Error::custom(format!("variable '{}' must be a scalar", var.name))
                })?;
                vars.insert(var.name, value);
            }
            Ok(vars)
        }

        fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
        where
            M: MapAccess<'de>,
        {
            let mut vars = BTreeMap::new();
            while let Some((key, value)) = map.next_entry::<String, serde_yaml::Value>()? {
                let value = scalar_to_string(&value).ok_or_else(|| {
                    M::Error::custom(format!("variable '{}' must be a scalar", key))
                })?;
                vars.insert(key, value);
            }
            Ok(vars)
        }
    }

    deserializer.deserialize_any(VariablesVisitor)
}

/// Textual form of a YAML scalar; `None` for sequences, mappings and tags
pub fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => Some(String::new()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

// =============================================================================
// Execution Results (for runtime)
// =============================================================================

/// Status of a run unit, a job aggregate or a stage aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Skipped | RunStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "Pending",
            RunStatus::Ready => "Ready",
            RunStatus::Running => "Running",
            RunStatus::Succeeded => "Succeeded",
            RunStatus::Failed => "Failed",
            RunStatus::Skipped => "Skipped",
            RunStatus::Canceled => "Canceled",
        }
    }

    /// Fold terminal statuses: any failure wins, then cancellation,
    /// all-skipped stays skipped, anything else (including nothing) succeeded.
    pub fn aggregate<I>(statuses: I) -> RunStatus
    where
        I: IntoIterator<Item = RunStatus>,
    {
        let mut any = false;
        let mut failed = false;
        let mut canceled = false;
        let mut all_skipped = true;

        for status in statuses {
            any = true;
            match status {
                RunStatus::Failed => failed = true,
                RunStatus::Canceled => canceled = true,
                _ => {}
            }
            if status != RunStatus::Skipped {
                all_skipped = false;
            }
        }

        if failed {
            RunStatus::Failed
        } else if canceled {
            RunStatus::Canceled
        } else if any && all_skipped {
            RunStatus::Skipped
        } else {
            RunStatus::Succeeded
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Succeeded,
    /// Failed with `continueOnError`
    SucceededWithIssues,
    Failed,
    Canceled,
    Skipped,
}

impl StepStatus {
    /// Status as seen by later step conditions
    pub fn as_run_status(&self) -> RunStatus {
        match self {
            StepStatus::Succeeded | StepStatus::SucceededWithIssues => RunStatus::Succeeded,
            StepStatus::Failed => RunStatus::Failed,
            StepStatus::Canceled => RunStatus::Canceled,
            StepStatus::Skipped => RunStatus::Skipped,
        }
    }
}

// =============================================================================
// Value type for expressions
// =============================================================================

/// Runtime value type used in expression evaluation
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            Value::Null => "".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    (*n as i64).to_string()
                } else {
                    n.to_string()
                }
            }
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => self.to_json(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.to_json_value()).unwrap_or_default()
    }

    fn to_json_value(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(|v| v.to_json_value()).collect())
            }
            Value::Object(obj) => {
                let sorted: BTreeMap<_, _> = obj.iter().collect();
                serde_json::Value::Object(
                    sorted
                        .into_iter()
                        .map(|(k, v)| (k.clone(), v.to_json_value()))
                        .collect(),
                )
            }
        }
    }

    /// Equality used by conditions: strings compare case-insensitively and
    /// numbers/booleans are coerced from their string forms.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => (a - b).abs() < f64::EPSILON,
            (Value::String(a), Value::String(b)) => a.to_lowercase() == b.to_lowercase(),
            (Value::Number(a), Value::String(b)) | (Value::String(b), Value::Number(a)) => b
                .trim()
                .parse::<f64>()
                .map(|n| (a - n).abs() < f64::EPSILON)
                .unwrap_or(false),
            (Value::Bool(a), Value::String(b)) | (Value::String(b), Value::Bool(a)) => {
                let b_lower = b.to_lowercase();
                (*a && b_lower == "true") || (!*a && b_lower == "false")
            }
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

/// Convert serde_yaml::Value to our Value type
pub fn yaml_to_value(yaml: &serde_yaml::Value) -> Value {
    match yaml {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            Value::Number(n.as_f64().unwrap_or(n.as_i64().unwrap_or(0) as f64))
        }
        serde_yaml::Value::String(s) => Value::String(s.clone()),
        serde_yaml::Value::Sequence(seq) => Value::Array(seq.iter().map(yaml_to_value).collect()),
        serde_yaml::Value::Mapping(map) => Value::Object(
            map.iter()
                .filter_map(|(k, v)| scalar_to_string(k).map(|key| (key, yaml_to_value(v))))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_value(&tagged.value),
    }
}

/// Convert our Value type back to serde_yaml::Value
pub fn value_to_yaml(value: &Value) -> serde_yaml::Value {
    match value {
        Value::Null => serde_yaml::Value::Null,
        Value::Bool(b) => serde_yaml::Value::Bool(*b),
        Value::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                serde_yaml::Value::Number(serde_yaml::Number::from(*n as i64))
            } else {
                serde_yaml::Value::Number(serde_yaml::Number::from(*n))
            }
        }
        Value::String(s) => serde_yaml::Value::String(s.clone()),
        Value::Array(arr) => serde_yaml::Value::Sequence(arr.iter().map(value_to_yaml).collect()),
        Value::Object(map) => {
            let sorted: BTreeMap<_, _> = map.iter().collect();
            let mut mapping = serde_yaml::Mapping::new();
            for (k, v) in sorted {
                mapping.insert(serde_yaml::Value::String(k.clone()), value_to_yaml(v));
            }
            serde_yaml::Value::Mapping(mapping)
        }
    }
}
