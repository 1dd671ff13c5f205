use std::time::Duration;

use fieldwerk::{
    AgentConfig, AgentStatus, Decision, FieldAgent, FieldAgentEvent, FieldAgentSettings,
};
use futures_util::StreamExt;
use tokio::time::sleep;

fn macbook_config() -> AgentConfig {
    AgentConfig::new("eBay", "defektes macbook pro", "200")
}

async fn wait_for_pause(agent: &FieldAgent) {
    for _ in 0..100 {
        if agent.status() == AgentStatus::Paused {
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("agent never paused; status is {}", agent.status());
}

#[tokio::test(start_paused = true)]
async fn macbook_search_pauses_on_defective_macbook() {
    let agent = FieldAgent::default();
    agent.start(macbook_config());
    wait_for_pause(&agent).await;

    let pending = agent.pending_decision().expect("paused run has a pending decision");
    assert_eq!(pending.title, "MacBook Pro 2018 defekt");
    assert_eq!(pending.price, "180 €");

    let log = agent.snapshot().log;
    assert!(log[0].contains("eBay"));
    assert!(log[1].contains("\"defektes macbook pro\""));
    assert!(log[1].contains("200 €"));
}

#[tokio::test(start_paused = true)]
async fn full_run_with_both_decisions() {
    let agent = FieldAgent::default();
    agent.start(macbook_config());

    wait_for_pause(&agent).await;
    agent.resolve_decision(Decision::Skip).unwrap();
    assert_eq!(agent.status(), AgentStatus::Running);
    assert!(agent.pending_decision().is_none());

    wait_for_pause(&agent).await;
    assert_eq!(
        agent.pending_decision().map(|item| item.id),
        Some("item-2".to_string())
    );
    agent.resolve_decision(Decision::Send).unwrap();

    sleep(Duration::from_secs(5)).await;
    let snapshot = agent.snapshot();
    assert_eq!(snapshot.status, AgentStatus::Stopped);
    assert_eq!(snapshot.cursor, snapshot.total_steps);
    assert!(snapshot.log.contains(&"Skipped: MacBook Pro 2018 defekt".to_string()));
    assert!(snapshot
        .log
        .iter()
        .any(|line| line.starts_with("Sending message to seller of \"MacBook Air 2019 Wasserschaden\"")));
    assert!(snapshot
        .log
        .contains(&"Message sent successfully: MacBook Air 2019 Wasserschaden".to_string()));
    assert_eq!(
        snapshot
            .log
            .iter()
            .filter(|line| line.as_str() == "Run complete. All steps processed.")
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn log_only_grows_during_a_run() {
    let agent = FieldAgent::default();
    agent.start(macbook_config());

    let mut previous: Vec<String> = Vec::new();
    for _ in 0..80 {
        sleep(Duration::from_millis(100)).await;
        let log = agent.snapshot().log;
        assert!(log.len() >= previous.len());
        assert_eq!(&log[..previous.len()], previous.as_slice());
        if agent.status() == AgentStatus::Paused {
            agent.resolve_decision(Decision::Send).unwrap();
        }
        previous = log;
    }
}

#[tokio::test(start_paused = true)]
async fn events_stream_in_transcript_order() {
    let agent = FieldAgent::default();
    let mut events = agent.events();
    agent.start(macbook_config());

    let mut lines = Vec::new();
    while let Some(event) = events.next().await {
        match event {
            FieldAgentEvent::Log { line, .. } => lines.push(line),
            FieldAgentEvent::DecisionRequired { item, .. } => {
                assert_eq!(item.id, "item-1");
                break;
            }
            _ => {}
        }
    }

    assert_eq!(lines, agent.snapshot().log);
}

#[tokio::test(start_paused = true)]
async fn restart_while_paused_discards_old_run() {
    let agent = FieldAgent::default();
    let mut events = agent.subscribe();
    agent.start(macbook_config());
    wait_for_pause(&agent).await;

    agent.start(AgentConfig::new("Kleinanzeigen", "thinkpad", 90u32));
    assert_eq!(agent.status(), AgentStatus::Running);
    assert!(agent.pending_decision().is_none());
    sleep(Duration::from_secs(20)).await;

    let mut seen_second_run = false;
    while let Ok(event) = events.try_recv() {
        if event.run() == 2 {
            seen_second_run = true;
        } else {
            assert!(!seen_second_run, "event from superseded run after restart: {event:?}");
        }
    }
    assert!(seen_second_run);
    assert!(agent.snapshot().log[0].contains("Kleinanzeigen"));
}

#[tokio::test(start_paused = true)]
async fn settings_file_drives_the_run() {
    let settings = FieldAgentSettings::from_yaml_str(
        r#"
agent:
  target_platform: eBay
  search_query: defektes macbook pro
  max_budget: 200
  message_template: "Moin, {{title}} für {{budget}} €?"
options:
  time_scale: 0.1
"#,
    )
    .unwrap();

    let agent = FieldAgent::new(settings.options);
    agent.start(settings.agent);
    sleep(Duration::from_millis(600)).await;
    assert_eq!(agent.status(), AgentStatus::Paused);

    agent.resolve_decision(Decision::Send).unwrap();
    assert!(agent
        .snapshot()
        .log
        .contains(&"Sending message to seller of \"MacBook Pro 2018 defekt\": Moin, MacBook Pro 2018 defekt für 200 €?".to_string()));
}
