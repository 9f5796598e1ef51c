use crate::manifest::ValidationViolation;
use thiserror::Error;

/// Structured error context for configuration and runtime failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "config.similarity_threshold", "inputs.image")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config", "manifest_cache")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the resolution engine.
///
/// Every failure a caller can observe maps to one of these categories; step
/// failures during execution never surface here, they land in the
/// [`ExecutionReport`](crate::executor::ExecutionReport).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Manifest validation failed: {}", format_violations(.violations))]
    Validation {
        manifest_id: Option<String>,
        violations: Vec<ValidationViolation>,
    },

    #[error("Invalid {kind} schema payload: {message}")]
    Schema { kind: String, message: String },

    #[error("No compatible candidate for '{capability}' ({requirement}): {reason}")]
    Compatibility {
        capability: String,
        requirement: String,
        reason: String,
    },

    #[error("No match found for '{capability}' (best score {best_score:.3} < threshold {threshold:.3})")]
    NoMatchFound {
        capability: String,
        best_score: f64,
        threshold: f64,
    },

    #[error("Conflict unresolved for '{capability}' after strategies [{}]", .attempted.join(", "))]
    ConflictUnresolved {
        capability: String,
        attempted: Vec<String>,
    },

    #[error("Dependency cycle detected: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("Plan execution exceeded {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },

    #[error("Registry unavailable: {message}")]
    RegistryUnavailable { message: String },

    #[error("Version conflict for {module_id}/{capability}: {message}")]
    VersionConflict {
        module_id: String,
        capability: String,
        message: String,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML syntax error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

fn format_violations(violations: &[ValidationViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn registry_unavailable(msg: impl Into<String>) -> Self {
        Error::RegistryUnavailable {
            message: msg.into(),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Whether the failure comes from the registry collaborator being unreachable.
    pub fn is_registry_unavailable(&self) -> bool {
        matches!(self, Error::RegistryUnavailable { .. })
    }
}
