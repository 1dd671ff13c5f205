use std::{collections::VecDeque, path::PathBuf, time::Duration};

use chrono::Local;
use clap::Parser;
use fieldwerk::{
    AgentStatus, Budget, Decision, DecisionItem, FieldAgent, FieldAgentError, FieldAgentEvent,
    FieldAgentSettings,
};
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "field-agent")]
#[command(about = "Run the scripted field agent simulation")]
struct Args {
    /// YAML settings file with `agent` and `options` sections
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target platform, e.g. eBay
    #[arg(long)]
    platform: Option<String>,

    /// Search query
    #[arg(long)]
    query: Option<String>,

    /// Maximum budget in euros
    #[arg(long)]
    budget: Option<String>,

    /// Seller message template (handlebars)
    #[arg(long)]
    template: Option<String>,

    /// Multiplier for every scripted delay
    #[arg(long)]
    time_scale: Option<f64>,

    /// Delay before the "message sent" confirmation, in milliseconds
    #[arg(long)]
    confirmation_delay: Option<u64>,

    /// Answer every decision automatically (send or skip)
    #[arg(long)]
    auto: Option<Decision>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,fieldwerk=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let settings = load_settings(&args)?;

    let agent = FieldAgent::new(settings.options.clone());
    let grace = agent
        .options()
        .scale(agent.options().confirmation_delay)
        .saturating_add(Duration::from_millis(100));
    let mut events = agent.events();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut inbox = DecisionInbox::default();
    let mut stdin_open = args.auto.is_none();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    tracing::info!(
        platform = %settings.agent.target_platform,
        query = %settings.agent.search_query,
        budget = %settings.agent.max_budget,
        "starting field agent"
    );
    agent.start(settings.agent);

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                if render(&event) {
                    break;
                }
                if let FieldAgentEvent::DecisionRequired { item, .. } = &event {
                    match args.auto {
                        Some(decision) => {
                            println!("  -> auto: {decision}");
                            if let Err(error) = agent.resolve_decision(decision) {
                                tracing::warn!(%error, item = %item.id, "auto decision rejected");
                            }
                        }
                        None => {
                            if !inbox.has_queued() && !inbox.is_closed() {
                                println!("  [s]end message, s[k]ip, [q]uit?");
                            }
                            report(inbox.dispatch(&agent));
                        }
                    }
                }
            }
            line = input.next_line(), if stdin_open => {
                match line? {
                    Some(text) => {
                        if let Err(message) = inbox.push_line(&text) {
                            println!("  {message}");
                        }
                    }
                    None => {
                        stdin_open = false;
                        inbox.close();
                    }
                }
                report(inbox.dispatch(&agent));
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if let Err(error) = agent.stop() {
                    tracing::debug!(%error, "ctrl-c after the run ended");
                }
            }
        }
    }

    // Let a detached send confirmation land before exiting.
    let _ = tokio::time::timeout(grace, async {
        while let Some(event) = events.next().await {
            render(&event);
        }
    })
    .await;

    Ok(())
}

fn load_settings(args: &Args) -> Result<FieldAgentSettings, FieldAgentError> {
    let mut settings = match &args.config {
        Some(path) => FieldAgentSettings::from_yaml_file(path)?,
        None => FieldAgentSettings::default(),
    };

    if let Some(platform) = &args.platform {
        settings.agent.target_platform = platform.clone();
    }
    if let Some(query) = &args.query {
        settings.agent.search_query = query.clone();
    }
    if let Some(budget) = &args.budget {
        settings.agent.max_budget = Budget::new(budget.clone());
    }
    if let Some(template) = &args.template {
        settings.agent.message_template = template.clone();
    }
    if let Some(time_scale) = args.time_scale {
        settings.options.time_scale = time_scale;
    }
    if let Some(delay_ms) = args.confirmation_delay {
        settings.options = settings
            .options
            .with_confirmation_delay(Duration::from_millis(delay_ms));
    }

    Ok(settings)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Decide(Decision),
    Stop,
}

/// Operator input waiting for the agent. Decisions are held until the run
/// pauses; a stop is applied right away and drops queued decisions. Once
/// input is closed, a pause with nothing queued stops the run.
#[derive(Debug, Default)]
struct DecisionInbox {
    queued: VecDeque<Command>,
    closed: bool,
}

impl DecisionInbox {
    fn push_line(&mut self, text: &str) -> Result<(), String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let command = if matches!(text, "q" | "quit" | "stop") {
            Command::Stop
        } else {
            Command::Decide(text.parse::<Decision>()?)
        };
        self.queued.push_back(command);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn has_queued(&self) -> bool {
        !self.queued.is_empty()
    }

    /// Applies whatever the agent can accept right now.
    fn dispatch(&mut self, agent: &FieldAgent) -> Result<(), FieldAgentError> {
        if self.queued.contains(&Command::Stop) {
            self.queued.clear();
            return stop_if_active(agent);
        }
        if agent.status() != AgentStatus::Paused {
            return Ok(());
        }
        match self.queued.pop_front() {
            Some(Command::Decide(decision)) => agent.resolve_decision(decision),
            Some(Command::Stop) => stop_if_active(agent),
            None if self.closed => {
                tracing::info!("input closed while a decision is pending, stopping");
                agent.stop()
            }
            None => Ok(()),
        }
    }
}

fn stop_if_active(agent: &FieldAgent) -> Result<(), FieldAgentError> {
    if agent.status().is_terminal() {
        return Ok(());
    }
    agent.stop()
}

fn report(result: Result<(), FieldAgentError>) {
    if let Err(error) = result {
        println!("  {error}");
    }
}

/// Prints one event. Returns true once the run has stopped.
fn render(event: &FieldAgentEvent) -> bool {
    match event {
        FieldAgentEvent::Log { at, line, .. } => {
            println!("[{}] {}", at.with_timezone(&Local).format("%H:%M:%S"), line);
            false
        }
        FieldAgentEvent::DecisionRequired { item, .. } => {
            print_item(item);
            false
        }
        FieldAgentEvent::StatusChanged { status, .. } => *status == AgentStatus::Stopped,
        FieldAgentEvent::Started { .. } | FieldAgentEvent::DecisionResolved { .. } => false,
    }
}

fn print_item(item: &DecisionItem) {
    println!();
    println!("  == User decision needed ==");
    println!("  {} ({})", item.title, item.price);
    println!("  {}", item.description);
    println!("  {}", item.image);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fieldwerk::{AgentConfig, AgentStatus, FieldAgent, FieldAgentOptions};
    use tokio::time::sleep;

    use super::{Command, Decision, DecisionInbox};

    fn instant_agent() -> FieldAgent {
        FieldAgent::new(FieldAgentOptions::default().with_time_scale(0.0))
    }

    fn config() -> AgentConfig {
        AgentConfig::new("eBay", "defektes macbook pro", "200")
    }

    #[test]
    fn parses_operator_lines() {
        let mut inbox = DecisionInbox::default();
        inbox.push_line("s").unwrap();
        inbox.push_line("  ").unwrap();
        inbox.push_line("skip").unwrap();
        inbox.push_line("q").unwrap();
        assert!(inbox.push_line("maybe").is_err());
        assert_eq!(
            inbox.queued.iter().copied().collect::<Vec<_>>(),
            vec![
                Command::Decide(Decision::Send),
                Command::Decide(Decision::Skip),
                Command::Stop
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn early_answer_waits_for_the_pause() {
        let agent = instant_agent();
        let mut inbox = DecisionInbox::default();
        agent.start(config());

        inbox.push_line("s").unwrap();
        inbox.dispatch(&agent).unwrap();
        assert_eq!(agent.status(), AgentStatus::Running);
        assert!(inbox.has_queued());

        sleep(Duration::from_millis(50)).await;
        assert_eq!(agent.status(), AgentStatus::Paused);
        inbox.dispatch(&agent).unwrap();

        assert!(!inbox.has_queued());
        assert!(agent
            .snapshot()
            .log
            .iter()
            .any(|line| line.starts_with("Sending message to seller of \"MacBook Pro 2018 defekt\"")));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_input_stops_a_paused_run() {
        let agent = instant_agent();
        let mut inbox = DecisionInbox::default();
        agent.start(config());

        inbox.push_line("s").unwrap();
        inbox.close();
        inbox.dispatch(&agent).unwrap();
        assert_eq!(agent.status(), AgentStatus::Running);

        sleep(Duration::from_millis(50)).await;
        inbox.dispatch(&agent).unwrap();
        assert_eq!(agent.status(), AgentStatus::Running);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(
            agent.pending_decision().map(|item| item.id),
            Some("item-2".to_string())
        );
        inbox.dispatch(&agent).unwrap();
        assert_eq!(agent.status(), AgentStatus::Stopped);
        assert_eq!(
            agent.snapshot().log.last().map(String::as_str),
            Some("Run aborted by user.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_applies_before_any_pause() {
        let agent = instant_agent();
        let mut inbox = DecisionInbox::default();
        agent.start(config());

        inbox.push_line("k").unwrap();
        inbox.dispatch(&agent).unwrap();
        assert_eq!(agent.status(), AgentStatus::Running);

        inbox.push_line("stop").unwrap();
        inbox.dispatch(&agent).unwrap();
        assert_eq!(agent.status(), AgentStatus::Stopped);
        assert!(!inbox.has_queued());

        inbox.push_line("q").unwrap();
        inbox.dispatch(&agent).unwrap();
    }
}
