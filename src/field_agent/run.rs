use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    field_agent::script::{Decision, DecisionItem, Step},
    FieldAgentError,
};

pub(crate) const RUN_COMPLETE: &str = "Run complete. All steps processed.";
pub(crate) const RUN_ABORTED: &str = "Run aborted by user.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
}

impl AgentStatus {
    /// `idle` and `stopped` only leave through a fresh start.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Idle | AgentStatus::Stopped)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Idle => f.write_str("idle"),
            AgentStatus::Running => f.write_str("running"),
            AgentStatus::Paused => f.write_str("paused"),
            AgentStatus::Stopped => f.write_str("stopped"),
        }
    }
}

/// State of one run. The fields are only reachable through the transition
/// methods below, which keep these invariants:
///
/// * `cursor <= steps.len()`, and `cursor == steps.len()` implies `Stopped`
/// * `pending_decision.is_some()` iff `Paused`
/// * `log` is append-only and only cleared by [`AgentRun::begin`]
#[derive(Debug, Clone, Default)]
pub struct AgentRun {
    status: AgentStatus,
    steps: Vec<Step>,
    cursor: usize,
    log: Vec<String>,
    pending_decision: Option<DecisionItem>,
}

impl AgentRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn pending_decision(&self) -> Option<&DecisionItem> {
        self.pending_decision.as_ref()
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.cursor)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    /// Replaces whatever came before with a fresh running run.
    pub fn begin(&mut self, steps: Vec<Step>) {
        self.steps = steps;
        self.cursor = 0;
        self.log.clear();
        self.pending_decision = None;
        self.status = AgentStatus::Running;
    }

    pub fn append(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    /// Appends a finished log step's message and moves past it.
    pub fn complete_log_step(&mut self, message: impl Into<String>) -> Result<(), FieldAgentError> {
        self.expect_status(AgentStatus::Running, "complete a step")?;
        if !matches!(self.current_step(), Some(Step::Log { .. })) {
            return Err(self.invalid("complete a step"));
        }
        self.append(message);
        self.cursor += 1;
        Ok(())
    }

    /// Parks the run on the decision step under the cursor.
    pub fn pause_for_decision(&mut self) -> Result<&DecisionItem, FieldAgentError> {
        self.expect_status(AgentStatus::Running, "pause for a decision")?;
        let item = match self.current_step() {
            Some(Step::Decision { item, .. }) => item.clone(),
            _ => return Err(self.invalid("pause for a decision")),
        };
        self.append(format!("Awaiting decision: {}", item.title));
        self.status = AgentStatus::Paused;
        let item = self.pending_decision.insert(item);
        Ok(&*item)
    }

    /// Clears the pending decision and moves past its step. `log_line` turns
    /// the resolved item into the transcript entry for the choice.
    pub fn resolve_decision(
        &mut self,
        decision: Decision,
        log_line: impl FnOnce(Decision, &DecisionItem) -> String,
    ) -> Result<DecisionItem, FieldAgentError> {
        if self.status != AgentStatus::Paused {
            return Err(self.invalid("resolve a decision"));
        }
        let item = self
            .pending_decision
            .take()
            .ok_or(FieldAgentError::NoPendingDecision)?;
        self.append(log_line(decision, &item));
        self.cursor += 1;
        self.status = AgentStatus::Running;
        Ok(item)
    }

    /// Marks an exhausted run as stopped with its completion entry.
    pub fn finish(&mut self) -> Result<(), FieldAgentError> {
        self.expect_status(AgentStatus::Running, "finish")?;
        if !self.is_exhausted() {
            return Err(self.invalid("finish"));
        }
        self.cursor = self.steps.len();
        self.status = AgentStatus::Stopped;
        self.append(RUN_COMPLETE);
        Ok(())
    }

    /// User abort; only valid from `running` or `paused`.
    pub fn abort(&mut self) -> Result<(), FieldAgentError> {
        if self.status.is_terminal() {
            return Err(self.invalid("stop"));
        }
        self.pending_decision = None;
        self.status = AgentStatus::Stopped;
        self.append(RUN_ABORTED);
        Ok(())
    }

    fn expect_status(&self, status: AgentStatus, operation: &'static str) -> Result<(), FieldAgentError> {
        if self.status == status {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&self, operation: &'static str) -> FieldAgentError {
        FieldAgentError::InvalidState {
            operation,
            status: self.status,
        }
    }
}
