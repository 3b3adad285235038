use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// The kind of interaction a recorded action represents.
///
/// The engine never interprets the kind; it is carried through to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    DoubleClick,
    RightClick,
    Input,
    Select,
    Scroll,
    Wait,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Click => "click",
            ActionKind::DoubleClick => "double_click",
            ActionKind::RightClick => "right_click",
            ActionKind::Input => "input",
            ActionKind::Select => "select",
            ActionKind::Scroll => "scroll",
            ActionKind::Wait => "wait",
        };
        write!(f, "{name}")
    }
}

/// One recorded step of a replay.
///
/// Everything besides `type` and `delay` is target data owned by the executor
/// and kept verbatim in `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,

    /// Milliseconds to wait after this action before the next one starts.
    /// Fractional values from recorders are rounded.
    #[serde(
        default,
        deserialize_with = "deserialize_delay",
        skip_serializing_if = "Option::is_none"
    )]
    pub delay: Option<u64>,

    #[serde(flatten)]
    pub target: serde_json::Map<String, serde_json::Value>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            delay: None,
            target: serde_json::Map::new(),
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = Some(delay_ms);
        self
    }

    pub fn with_target(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.target.insert(key.into(), value);
        self
    }

    /// Post-action delay in milliseconds, zero when absent.
    pub fn delay_ms(&self) -> u64 {
        self.delay.unwrap_or(0)
    }
}

fn deserialize_delay<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<f64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(ms) if ms.is_finite() && ms >= 0.0 => Ok(Some(ms.round() as u64)),
        Some(ms) => Err(D::Error::custom(format!("invalid delay: {ms}"))),
    }
}

/// What the executor reports for a single action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Opaque routing data the relay hands back to the execution port untouched
/// (which tab, session or window an action must reach).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext(pub serde_json::Value);
