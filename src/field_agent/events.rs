use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::field_agent::{
    run::{AgentRun, AgentStatus},
    script::{Decision, DecisionItem},
};

pub type EventStream = Pin<Box<dyn Stream<Item = FieldAgentEvent> + Send>>;

/// Everything the engine publishes, in the order it happened. `run` is the
/// generation of the run that produced the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldAgentEvent {
    Started {
        run: u64,
        total_steps: usize,
    },
    Log {
        run: u64,
        at: DateTime<Utc>,
        line: String,
    },
    DecisionRequired {
        run: u64,
        item: DecisionItem,
    },
    DecisionResolved {
        run: u64,
        item_id: String,
        decision: Decision,
    },
    StatusChanged {
        run: u64,
        status: AgentStatus,
    },
}

impl FieldAgentEvent {
    pub fn run(&self) -> u64 {
        match self {
            FieldAgentEvent::Started { run, .. }
            | FieldAgentEvent::Log { run, .. }
            | FieldAgentEvent::DecisionRequired { run, .. }
            | FieldAgentEvent::DecisionResolved { run, .. }
            | FieldAgentEvent::StatusChanged { run, .. } => *run,
        }
    }
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub run: u64,
    pub status: AgentStatus,
    pub cursor: usize,
    pub total_steps: usize,
    pub log: Vec<String>,
    pub pending_decision: Option<DecisionItem>,
}

impl AgentSnapshot {
    pub(crate) fn capture(generation: u64, run: &AgentRun) -> Self {
        Self {
            run: generation,
            status: run.status(),
            cursor: run.cursor(),
            total_steps: run.steps().len(),
            log: run.log().to_vec(),
            pending_decision: run.pending_decision().cloned(),
        }
    }
}

/// Adapts a broadcast receiver into a stream. Lagging subscribers skip
/// what they missed; the stream ends when the engine is gone.
pub(crate) fn into_stream(mut receiver: broadcast::Receiver<FieldAgentEvent>) -> EventStream {
    Box::pin(async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(event) => yield event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "field agent event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
