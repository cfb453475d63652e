//! Error types for the three phases named in the design: definition (static),
//! execution (runtime), and rollback (best-effort, logged only).

use thiserror::Error;

/// Source location of a property inside a flow definition, carried on
/// definition errors so a caller can pinpoint `(flow, breakpoint, path)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expr {
    pub file: String,
    pub line: u32,
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Static-phase errors raised while defining a manifest. All are fatal and
/// abort manifest loading with no partial state kept.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("undefined service '{service}' in flow '{flow}'")]
    UndefinedService { flow: String, service: String },

    #[error("undefined method '{method}' in flow '{flow}'")]
    UndefinedMethod { flow: String, method: String },

    #[error("undefined object '{object}' in schema collection")]
    UndefinedSchemaObject { object: String },

    #[error("undefined resource '{reference}' in '{flow}'.'{breakpoint}'")]
    UndefinedReference {
        flow: String,
        breakpoint: String,
        reference: String,
        expr: Option<Expr>,
    },

    #[error("circular {kind} dependency detected: {from} <-> {to}")]
    CircularDependency {
        kind: &'static str,
        from: String,
        to: String,
    },

    #[error("unknown label '{label}' on property '{path}'")]
    UnknownLabel { path: String, label: String },
}

/// Runtime errors surfaced from `Manager::do_flow`. The first one wins.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("node '{node}' call failed: {source}")]
    NodeCallFailed {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("hook '{hook}' failed: {source}")]
    HookFailed {
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("stack function '{index}' failed: {source}")]
    StoreFunctionFailed {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// Rollback errors are logged, never returned in place of the forward error,
/// but are collected so a caller can inspect them after the fact.
#[derive(Debug, Error)]
#[error("node '{node}' rollback failed: {source}")]
pub struct RollbackError {
    pub node: String,
    #[source]
    pub source: anyhow::Error,
}
