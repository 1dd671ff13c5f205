use std::{fmt, str::FromStr, time::Duration};

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{field_agent::config::AgentConfig, FieldAgentError};

/// A candidate listing surfaced during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionItem {
    pub id: String,
    pub title: String,
    pub price: String,
    pub image: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Log { message: String, delay: Duration },
    Decision { delay: Duration, item: DecisionItem },
}

impl Step {
    pub fn log(message: impl Into<String>, delay: Duration) -> Self {
        Step::Log {
            message: message.into(),
            delay,
        }
    }

    pub fn decision(delay: Duration, item: DecisionItem) -> Self {
        Step::Decision { delay, item }
    }

    pub fn delay(&self) -> Duration {
        match self {
            Step::Log { delay, .. } | Step::Decision { delay, .. } => *delay,
        }
    }

    pub fn is_decision(&self) -> bool {
        matches!(self, Step::Decision { .. })
    }
}

pub const DEFAULT_MESSAGE_TEMPLATE: &str =
    "Hello, is \"{{title}}\" still available? I could offer up to {{budget}} €.";

/// The user's answer to a paused run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Send,
    Skip,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Send => f.write_str("send"),
            Decision::Skip => f.write_str("skip"),
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "send" | "s" => Ok(Decision::Send),
            "skip" | "k" => Ok(Decision::Skip),
            other => Err(format!("unknown decision `{other}` (expected send or skip)")),
        }
    }
}

/// Builds the field agent script. The shape never changes; only the
/// config values interpolated into the messages do.
pub fn generate_steps(config: &AgentConfig) -> Vec<Step> {
    let platform = &config.target_platform;
    let query = &config.search_query;
    let budget = &config.max_budget;

    vec![
        Step::log(format!("Field agent initialised for {platform}."), ms(800)),
        Step::log(
            format!("Searching {platform} for \"{query}\" (max budget {budget} €)..."),
            ms(1200),
        ),
        Step::log("12 listings found. Filtering by budget and condition...", ms(1500)),
        Step::log(format!("2 candidates within budget of {budget} €."), ms(1000)),
        Step::decision(
            ms(1200),
            DecisionItem {
                id: "item-1".to_string(),
                title: "MacBook Pro 2018 defekt".to_string(),
                price: "180 €".to_string(),
                image: "https://picsum.photos/seed/macbook-pro-2018/400/300".to_string(),
                description: "Display flickers after a few minutes, keyboard works. Pickup or shipping possible."
                    .to_string(),
            },
        ),
        Step::log("Analysing next candidate...", ms(1000)),
        Step::decision(
            ms(1200),
            DecisionItem {
                id: "item-2".to_string(),
                title: "MacBook Air 2019 Wasserschaden".to_string(),
                price: "120 €".to_string(),
                image: "https://picsum.photos/seed/macbook-air-2019/400/300".to_string(),
                description: "Liquid damage, does not power on. Sold as-is for parts.".to_string(),
            },
        ),
        Step::log(format!("Search on {platform} finished."), ms(800)),
    ]
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Renders the seller message for `item`. Available variables are
/// `title`, `price`, `platform`, `query` and `budget`. A blank template
/// falls back to [`DEFAULT_MESSAGE_TEMPLATE`].
pub fn render_message(config: &AgentConfig, item: &DecisionItem) -> Result<String, FieldAgentError> {
    let template = if config.message_template.trim().is_empty() {
        DEFAULT_MESSAGE_TEMPLATE
    } else {
        config.message_template.as_str()
    };

    let mut hb = Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);
    let data = json!({
        "title": item.title,
        "price": item.price,
        "platform": config.target_platform,
        "query": config.search_query,
        "budget": config.max_budget.as_str(),
    });

    Ok(hb.render_template(template, &data)?)
}
