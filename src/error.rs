use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{test}: async operation did not complete within {timeout:?} (waited {elapsed:?})")]
    Timeout {
        test: String,
        timeout: Duration,
        elapsed: Duration,
    },

    #[error("Failed to start listener thread: {0}")]
    ListenerSpawn(#[source] std::io::Error),

    #[error("Failed to build event loop runtime: {0}")]
    RuntimeBuild(#[source] std::io::Error),

    #[error("Listener thread exited before its event loop was ready")]
    ListenerExited,

    #[error("Listener context has been shut down")]
    ListenerShutDown,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl HarnessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
