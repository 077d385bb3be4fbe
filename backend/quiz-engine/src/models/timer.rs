use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::FinishReason;

/// Events pushed to the front end over the session stream.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimerEvent {
    TimerTick(TimerTick),
    Autosaved(Autosaved),
    TimeExpired(TimeExpired),
    SessionFinished(SessionFinished),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimerTick {
    pub remaining_seconds: u32,
    pub elapsed_seconds: u32,
    pub total_seconds: u32,
    pub current_index: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Autosaved {
    pub answered: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimeExpired {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionFinished {
    pub attempt_id: String,
    pub reason: FinishReason,
    pub score: u32,
    pub percent: f64,
    pub timestamp: DateTime<Utc>,
}

impl TimerEvent {
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            TimerEvent::TimerTick(_) => "timer-tick",
            TimerEvent::Autosaved(_) => "autosaved",
            TimerEvent::TimeExpired(_) => "time-expired",
            TimerEvent::SessionFinished(_) => "session-finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_payload_is_tagged() {
        let event = TimerEvent::TimeExpired(TimeExpired {
            timestamp: Utc::now(),
            message: "Time is up".into(),
        });
        assert_eq!(event.event_name(), "time-expired");
        assert!(event.to_sse_data().contains("\"type\":\"time-expired\""));
    }
}
