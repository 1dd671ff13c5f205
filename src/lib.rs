pub mod error;
pub mod field_agent;

pub use error::FieldAgentError;
pub use field_agent::{
    generate_steps,
    render_message,
    AgentConfig,
    AgentRun,
    AgentSnapshot,
    AgentStatus,
    Budget,
    Decision,
    DecisionItem,
    EventStream,
    FieldAgent,
    FieldAgentEvent,
    FieldAgentOptions,
    FieldAgentSettings,
    Step,
};
