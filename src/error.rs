use std::time::Duration;
use thiserror::Error;

/// Failures raised by an interactive device session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no match within {waited:?}; last output: {tail:?}")]
    Timeout { waited: Duration, tail: String },
    #[error("connection closed by device")]
    ConnectionLost,
    #[error("session is not connected")]
    NotConnected,
    #[error("invalid session url '{0}' (only telnet and ssh are supported)")]
    InvalidUrl(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of an FSM run that did not reach the terminal state.
#[derive(Debug, Error)]
pub enum FsmError {
    #[error("{fsm}: timed out in state {state}; last output: {last_output:?}")]
    Timeout {
        fsm: String,
        state: i32,
        last_output: String,
    },
    #[error("{fsm}: unexpected event '{event}' in state {state}")]
    UnexpectedEvent { fsm: String, event: String, state: i32 },
    #[error("{fsm}: action for '{event}' failed in state {state}")]
    ActionFailed { fsm: String, event: String, state: i32 },
    #[error("{fsm}: {source}")]
    Session {
        fsm: String,
        #[source]
        source: SessionError,
    },
}

#[derive(Debug, Error)]
pub enum ConvergenceError {
    #[error("not all nodes came up after {attempts} poll(s): {}", last_output.as_deref().unwrap_or("<no output>"))]
    NotConverged {
        attempts: u32,
        last_output: Option<String>,
    },
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Error returned by a plugin run. Any variant aborts the dispatch pass.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{0}")]
    Fatal(String),
    #[error(transparent)]
    Fsm(#[from] FsmError),
    #[error(transparent)]
    Convergence(#[from] ConvergenceError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Data(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("missing the following selected plugin(s): {}", missing.join(", "))]
    Resolution { missing: Vec<String> },
    #[error("no plugins found for phase {phase}")]
    NoMatch { phase: String },
    #[error("no phase requested for an unordered dispatch")]
    MissingPhase,
    #[error("plugin '{plugin}' failed: {source}")]
    Plugin {
        plugin: String,
        #[source]
        source: PluginError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unknown phase '{0}'")]
    UnknownPhase(String),
    #[error(transparent)]
    Url(#[from] SessionError),
    #[error("{0}")]
    Invalid(String),
}
