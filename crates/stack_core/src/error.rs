use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeclarationError {
    #[error("declaration node '{0}' is defined more than once")]
    DuplicateNode(String),

    #[error("declaration node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency { node: String, dependency: String },

    #[error("declaration graph contains a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("declaration node '{node}' failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<NodeError>,
    },
}

/// Failure raised while evaluating a single declaration node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("provider lookup failed: {0}")]
    Provider(String),

    #[error("input '{0}' was not resolved")]
    MissingInput(String),

    #[error("input '{input}' has unexpected shape: {message}")]
    InvalidInput { input: String, message: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("stack reference '{0}' must have the form organization/project/stack")]
    MalformedPath(String),

    #[error("referenced stack '{0}' has no published outputs")]
    MissingStack(String),

    #[error("referenced stack '{reference}' has no output named '{key}'")]
    MissingOutput { reference: String, key: String },

    #[error("output store failure for '{reference}': {message}")]
    Store { reference: String, message: String },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build stage '{stage}' exited with code {code}")]
    StageFailed { stage: String, code: i32 },

    #[error("build stage '{stage}' could not be started: {message}")]
    Spawn { stage: String, message: String },

    #[error("expected build output at '{0}'")]
    MissingOutput(String),

    #[error("trigger '{path}' could not be fingerprinted: {source}")]
    Fingerprint {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build record error: {0}")]
    Record(String),

    #[error("failed to package artifact: {0}")]
    Packaging(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Exit code the process should terminate with for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::StageFailed { code, .. } => *code,
            _ => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    #[error("{field} '{value}' may only contain ASCII letters, digits, '-' and '_'")]
    InvalidCharacters { field: &'static str, value: String },

    #[error("failed to read settings file '{path}': {message}")]
    Settings { path: String, message: String },
}
