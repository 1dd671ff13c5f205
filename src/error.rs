use thiserror::Error;

use crate::field_agent::AgentStatus;

#[derive(Debug, Error)]
pub enum FieldAgentError {
    #[error("cannot {operation} while the agent is {status}")]
    InvalidState {
        operation: &'static str,
        status: AgentStatus,
    },

    #[error("no decision is pending")]
    NoPendingDecision,

    #[error("invalid settings: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message template render error: {0}")]
    TemplateRender(#[from] handlebars::RenderError),
}

impl FieldAgentError {
    /// Protocol misuse by the caller. The run is left untouched when this
    /// is returned.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. } | Self::NoPendingDecision)
    }
}
