use std::{fmt, fs, path::Path, time::Duration};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::FieldAgentError;

const DEFAULT_CONFIRMATION_DELAY: Duration = Duration::from_millis(1500);
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Parameters captured from the field agent form. Values are taken as-is;
/// an empty or nonsensical config still yields a script with those values
/// interpolated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub target_platform: String,
    #[serde(default)]
    pub search_query: String,
    #[serde(default)]
    pub max_budget: Budget,
    #[serde(default)]
    pub message_template: String,
}

impl AgentConfig {
    pub fn new(
        target_platform: impl Into<String>,
        search_query: impl Into<String>,
        max_budget: impl Into<Budget>,
    ) -> Self {
        Self {
            target_platform: target_platform.into(),
            search_query: search_query.into(),
            max_budget: max_budget.into(),
            message_template: String::new(),
        }
    }

    pub fn with_message_template(mut self, template: impl Into<String>) -> Self {
        self.message_template = template.into();
        self
    }
}

/// Maximum budget in euros, kept as the raw text the user entered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Budget(String);

impl Budget {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value, if the raw input parses as one. A comma decimal
    /// separator is accepted.
    pub fn amount(&self) -> Option<f64> {
        let trimmed = self.0.trim().trim_end_matches('€').trim();
        trimmed
            .parse::<f64>()
            .or_else(|_| trimmed.replace(',', ".").parse::<f64>())
            .ok()
            .filter(|value| value.is_finite())
    }
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Budget {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Budget {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<f64> for Budget {
    fn from(value: f64) -> Self {
        Self(value.to_string())
    }
}

impl From<u32> for Budget {
    fn from(value: u32) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for Budget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Budget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Integer(i64),
            Float(f64),
            Null,
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Budget(text),
            Raw::Integer(value) => Budget(value.to_string()),
            // `{:?}` keeps the fractional part of whole floats (`200.0`).
            Raw::Float(value) => Budget(format!("{value:?}")),
            Raw::Null => Budget::default(),
        })
    }
}

/// Engine tuning that is not part of the user-facing form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldAgentOptions {
    /// Multiplier applied to every scripted delay; `0.0` runs the script
    /// without waiting.
    pub time_scale: f64,
    #[serde(with = "duration_ms")]
    pub confirmation_delay: Duration,
    pub event_capacity: usize,
}

impl Default for FieldAgentOptions {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            confirmation_delay: DEFAULT_CONFIRMATION_DELAY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl FieldAgentOptions {
    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale;
        self
    }

    pub fn with_confirmation_delay(mut self, delay: Duration) -> Self {
        self.confirmation_delay = delay;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn scale(&self, delay: Duration) -> Duration {
        if self.time_scale == 1.0 {
            delay
        } else if self.time_scale.is_finite() && self.time_scale > 0.0 {
            Duration::try_from_secs_f64(delay.as_secs_f64() * self.time_scale).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }
}

/// Settings file layout:
///
/// ```yaml
/// agent:
///   target_platform: eBay
///   search_query: defektes macbook pro
///   max_budget: 200
///   message_template: "Hallo, ist {{title}} noch zu haben?"
/// options:
///   time_scale: 0.5
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldAgentSettings {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub options: FieldAgentOptions,
}

impl FieldAgentSettings {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, FieldAgentError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, FieldAgentError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
