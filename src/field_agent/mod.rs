//! Scripted field agent simulation.
//!
//! A [`FieldAgent`] walks a fixed script of timed steps. Log steps append to
//! the run's transcript and move on; decision steps pause the run until the
//! caller answers with [`FieldAgent::resolve_decision`]. Exactly one timer
//! drives the main sequence at any time, and every `start`/`stop` cancels it
//! before touching state, so a callback from a superseded run never writes
//! into the current one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::FieldAgentError;

pub mod config;
pub mod events;
pub mod run;
pub mod script;
mod timer;

pub use config::{AgentConfig, Budget, FieldAgentOptions, FieldAgentSettings};
pub use events::{AgentSnapshot, EventStream, FieldAgentEvent};
pub use run::{AgentRun, AgentStatus};
pub use script::{generate_steps, render_message, Decision, DecisionItem, Step};

use timer::{StepTimer, TimerTicket};

/// The engine. Must be created and driven from within a tokio runtime.
/// Dropping it cancels every outstanding timer.
pub struct FieldAgent {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<Engine>,
    events: broadcast::Sender<FieldAgentEvent>,
    options: FieldAgentOptions,
}

#[derive(Default)]
struct Engine {
    generation: u64,
    config: AgentConfig,
    run: AgentRun,
    timer: StepTimer,
    // Parent of the detached send confirmations for the current run.
    session: CancellationToken,
}

impl Default for FieldAgent {
    fn default() -> Self {
        Self::new(FieldAgentOptions::default())
    }
}

impl FieldAgent {
    pub fn new(options: FieldAgentOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(Engine::default()),
                events,
                options,
            }),
        }
    }

    pub fn options(&self) -> &FieldAgentOptions {
        &self.shared.options
    }

    /// Begins a fresh run of the standard script for `config`, replacing any
    /// previous run.
    pub fn start(&self, config: AgentConfig) {
        let steps = generate_steps(&config);
        self.start_script(config, steps);
    }

    /// Like [`FieldAgent::start`] but with caller-supplied steps.
    pub fn start_script(&self, config: AgentConfig, steps: Vec<Step>) {
        let mut engine = self.shared.lock();
        engine.timer.cancel();
        engine.session.cancel();
        engine.session = CancellationToken::new();
        engine.generation += 1;
        engine.config = config;
        engine.run.begin(steps);

        let generation = engine.generation;
        let total_steps = engine.run.steps().len();
        tracing::info!(run = generation, total_steps, "field agent run started");
        self.shared.publish(FieldAgentEvent::Started {
            run: generation,
            total_steps,
        });
        self.shared.publish_status(&engine);

        schedule_next(&self.shared, &mut engine);
    }

    /// Aborts the current run. Rejected, without side effects, unless the
    /// agent is running or paused.
    pub fn stop(&self) -> Result<(), FieldAgentError> {
        let mut engine = self.shared.lock();
        engine.timer.cancel();

        let from = engine.run.log().len();
        if let Err(error) = engine.run.abort() {
            tracing::warn!(%error, "ignoring stop request");
            return Err(error);
        }

        tracing::info!(run = engine.generation, cursor = engine.run.cursor(), "field agent run stopped");
        self.shared.publish_log_since(&engine, from);
        self.shared.publish_status(&engine);
        Ok(())
    }

    /// Answers the pending decision and resumes the run. Rejected, without
    /// side effects, unless the agent is paused.
    pub fn resolve_decision(&self, decision: Decision) -> Result<(), FieldAgentError> {
        let mut engine = self.shared.lock();
        let from = engine.run.log().len();

        let Engine { run, config, .. } = &mut *engine;
        let resolved = run.resolve_decision(decision, |decision, item| match decision {
            Decision::Skip => format!("Skipped: {}", item.title),
            Decision::Send => format!(
                "Sending message to seller of \"{}\": {}",
                item.title,
                seller_message(config, item)
            ),
        });
        let item = match resolved {
            Ok(item) => item,
            Err(error) => {
                tracing::warn!(%error, %decision, "ignoring decision");
                return Err(error);
            }
        };

        let generation = engine.generation;
        tracing::info!(run = generation, item = %item.id, %decision, "decision resolved");
        self.shared.publish_log_since(&engine, from);
        self.shared.publish(FieldAgentEvent::DecisionResolved {
            run: generation,
            item_id: item.id.clone(),
            decision,
        });
        self.shared.publish_status(&engine);

        if decision == Decision::Send {
            spawn_confirmation(&self.shared, &engine, item.title);
        }

        schedule_next(&self.shared, &mut engine);
        Ok(())
    }

    pub fn status(&self) -> AgentStatus {
        self.shared.lock().run.status()
    }

    pub fn pending_decision(&self) -> Option<DecisionItem> {
        self.shared.lock().run.pending_decision().cloned()
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let engine = self.shared.lock();
        AgentSnapshot::capture(engine.generation, &engine.run)
    }

    /// Whether a main-sequence advance is currently scheduled.
    pub fn is_scheduled(&self) -> bool {
        self.shared.lock().timer.is_armed()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FieldAgentEvent> {
        self.shared.events.subscribe()
    }

    pub fn events(&self) -> EventStream {
        events::into_stream(self.subscribe())
    }

    /// Tears the engine down. Equivalent to dropping it.
    pub fn dispose(self) {
        drop(self);
    }
}

impl Drop for FieldAgent {
    fn drop(&mut self) {
        let mut engine = self.shared.lock();
        engine.timer.cancel();
        engine.session.cancel();
        tracing::debug!(run = engine.generation, "field agent disposed");
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Engine> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: FieldAgentEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_status(&self, engine: &Engine) {
        self.publish(FieldAgentEvent::StatusChanged {
            run: engine.generation,
            status: engine.run.status(),
        });
    }

    fn publish_log_since(&self, engine: &Engine, from: usize) {
        let at = Utc::now();
        for line in engine.run.log().iter().skip(from) {
            self.publish(FieldAgentEvent::Log {
                run: engine.generation,
                at,
                line: line.clone(),
            });
        }
    }
}

fn seller_message(config: &AgentConfig, item: &DecisionItem) -> String {
    match render_message(config, item) {
        Ok(message) => message,
        Err(error) => {
            tracing::warn!(%error, "message template failed to render, sending it verbatim");
            config.message_template.clone()
        }
    }
}

/// Arms the timer for the step under the cursor, or completes the run when
/// the script is exhausted.
fn schedule_next(shared: &Arc<Shared>, engine: &mut Engine) {
    let Some(step) = engine.run.current_step() else {
        complete(shared, engine);
        return;
    };

    let delay = shared.options.scale(step.delay());
    let generation = engine.generation;
    let cursor = engine.run.cursor();
    let ticket = engine.timer.arm();
    let weak = Arc::downgrade(shared);
    tracing::debug!(run = generation, cursor, ?delay, "scheduled next step");

    tokio::spawn(async move {
        tokio::select! {
            _ = ticket.token().cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        advance(&weak, &ticket, generation);
    });
}

fn advance(shared: &Weak<Shared>, ticket: &TimerTicket, generation: u64) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut engine = shared.lock();
    if engine.generation != generation || !engine.timer.fire(ticket) {
        tracing::debug!(run = generation, "stale step timer ignored");
        return;
    }

    let Some(step) = engine.run.current_step().cloned() else {
        complete(&shared, &mut engine);
        return;
    };

    let from = engine.run.log().len();
    match step {
        Step::Log { message, .. } => {
            if let Err(error) = engine.run.complete_log_step(message) {
                tracing::warn!(%error, "log step rejected");
                return;
            }
            shared.publish_log_since(&engine, from);
            if engine.run.status() == AgentStatus::Running {
                schedule_next(&shared, &mut engine);
            }
        }
        Step::Decision { item, .. } => {
            if let Err(error) = engine.run.pause_for_decision() {
                tracing::warn!(%error, "decision step rejected");
                return;
            }
            tracing::info!(run = generation, item = %item.id, "awaiting decision");
            shared.publish_log_since(&engine, from);
            shared.publish(FieldAgentEvent::DecisionRequired {
                run: generation,
                item,
            });
            shared.publish_status(&engine);
        }
    }
}

fn complete(shared: &Shared, engine: &mut Engine) {
    let from = engine.run.log().len();
    match engine.run.finish() {
        Ok(()) => {
            tracing::info!(run = engine.generation, "field agent run complete");
            shared.publish_log_since(engine, from);
            shared.publish_status(engine);
        }
        Err(error) => tracing::warn!(%error, "run could not be completed"),
    }
}

/// Fire-and-forget "message sent" line. It is tied to the run's session, so
/// a restart or teardown cancels it, while a plain stop lets it land.
fn spawn_confirmation(shared: &Arc<Shared>, engine: &Engine, title: String) {
    let token = engine.session.child_token();
    let generation = engine.generation;
    let delay = shared.options.scale(shared.options.confirmation_delay);
    let weak = Arc::downgrade(shared);

    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let mut engine = shared.lock();
        if token.is_cancelled() || engine.generation != generation {
            return;
        }
        let from = engine.run.log().len();
        engine.run.append(format!("Message sent successfully: {title}"));
        shared.publish_log_since(&engine, from);
    });
}
