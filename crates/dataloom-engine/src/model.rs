use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
}

/// The relational form of [`Column`]: a pivot/cross-tab specification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RelationalColumn {
    #[serde(default)]
    pub index: Vec<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub aggfunc: Option<String>,
}

/// `column` is polymorphic: a bare name, a list of names, or a relational
/// mapping for pivot/cross-tab style operations. Modeled as a tagged
/// 3-case variant rather than a single loosely-typed field so the
/// Executor's resolution logic can dispatch on the tag directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Column {
    Single(String),
    Many(Vec<String>),
    Relational(RelationalColumn),
}

impl Column {
    /// All bare column names this variant references, used for resolution
    /// against the dataset's merged columns.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Column::Single(s) => vec![s.as_str()],
            Column::Many(items) => items.iter().map(String::as_str).collect(),
            Column::Relational(r) => r
                .index
                .iter()
                .chain(r.columns.iter())
                .chain(r.values.iter())
                .map(String::as_str)
                .collect(),
        }
    }

    pub fn is_relational(&self) -> bool {
        matches!(self, Column::Relational(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub name: String,
    pub column: Column,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Plan {
    pub task_type: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub rationale: String,
}

impl Plan {
    /// A minimal fallback plan used when the planner's LLM response fails
    /// to parse.
    pub fn fallback(error: impl Into<String>) -> Self {
        Plan {
            task_type: "basic".to_string(),
            rationale: format!("fallback: {}", error.into()),
            ..Default::default()
        }
    }
}

/// A single slot of a [`Results`] mapping. The error-marker variant must be
/// listed before `Mapping` so serde's untagged matching (which tries
/// variants in declaration order) prefers it for `{"error": "..."}` shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResultValue {
    Error { error: String },
    Number(f64),
    Text(String),
    Sequence(Vec<ResultValue>),
    Mapping(IndexMap<String, ResultValue>),
}

impl ResultValue {
    pub fn error(message: impl Into<String>) -> Self {
        ResultValue::Error { error: message.into() }
    }

    pub fn from_sandbox(value: dataloom_sandbox::SandboxValue) -> Self {
        match value {
            dataloom_sandbox::SandboxValue::Number(n) => ResultValue::Number(n),
            dataloom_sandbox::SandboxValue::Text(s) => ResultValue::Text(s),
            dataloom_sandbox::SandboxValue::Bool(b) => ResultValue::Text(b.to_string()),
            dataloom_sandbox::SandboxValue::None => ResultValue::Text(String::new()),
            dataloom_sandbox::SandboxValue::Sequence(items) => {
                ResultValue::Sequence(items.into_iter().map(ResultValue::from_sandbox).collect())
            }
            dataloom_sandbox::SandboxValue::Mapping(pairs) => ResultValue::Mapping(
                pairs.into_iter().map(|(k, v)| (k, ResultValue::from_sandbox(v))).collect(),
            ),
        }
    }
}

/// `operation-key -> value`. Keys are human-readable and stable
/// (e.g. `sales_sum`, `date_mean`). An insertion-ordered map so the tape's
/// JSON rendering is a plain object, not an array of pairs.
pub type Results = IndexMap<String, ResultValue>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    #[serde(skip)]
    pub results: Results,
    pub quality_score: f64,
    pub success: bool,
    pub feedback: String,
    #[serde(default)]
    pub next_actions: Vec<String>,
}

impl Observation {
    pub fn failed(feedback: impl Into<String>) -> Self {
        Observation {
            results: Results::new(),
            quality_score: 0.0,
            success: false,
            feedback: feedback.into(),
            next_actions: vec!["replan".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Init,
    Planning,
    Processing,
    Observing,
    Replanning,
    Reporting,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

/// Per-request state owned by the orchestrator. Transitions never mutate
/// in place: each step takes a `SessionState` by value and returns a new
/// one.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub request: String,
    pub document_full: String,
    pub document_preview: String,
    pub history: Vec<Message>,
    pub plan_history: Vec<Plan>,
    pub current_plan: Option<Plan>,
    pub results: Option<Results>,
    pub observation: Option<Observation>,
    pub report: Option<String>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub needs_replan: bool,
    pub step: Step,
    pub error: Option<ErrorInfo>,
}

impl SessionState {
    pub fn new(request: String, document_full: String, history: Vec<Message>, max_iterations: u32) -> Self {
        SessionState {
            request,
            document_full,
            document_preview: String::new(),
            history,
            plan_history: Vec::new(),
            current_plan: None,
            results: None,
            observation: None,
            report: None,
            iteration: 0,
            max_iterations,
            needs_replan: false,
            step: Step::Init,
            error: None,
        }
    }
}
