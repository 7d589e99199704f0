//! Connectivity lifecycle events.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// Connection lifecycle states published by the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ConnectivityState {
    Unknown = 0,
    Connected = 1,
    Disconnected = 2,
    Retrying = 3,
    Shutdown = 4,
}

impl ConnectivityState {
    /// Lower-case name used in logs and the event JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectivityState::Unknown => "unknown",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Retrying => "retrying",
            ConnectivityState::Shutdown => "shutdown",
        }
    }

    pub(crate) fn from_i32(value: i32) -> Self {
        match value {
            1 => ConnectivityState::Connected,
            2 => ConnectivityState::Disconnected,
            3 => ConnectivityState::Retrying,
            4 => ConnectivityState::Shutdown,
            _ => ConnectivityState::Unknown,
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes a connection lifecycle update.
#[derive(Debug, Clone)]
pub struct ConnectivityEvent {
    /// Site name of the actor emitting the event.
    pub actor: String,
    pub state: ConnectivityState,
    pub time: DateTime<Utc>,
    pub reason: String,
    pub attempt: u32,
    pub backoff: Duration,
    pub error: Option<String>,
}

impl ConnectivityEvent {
    pub(crate) fn new(actor: &str, state: ConnectivityState, reason: &str) -> Self {
        Self {
            actor: actor.to_string(),
            state,
            time: Utc::now(),
            reason: reason.to_string(),
            attempt: 0,
            backoff: Duration::ZERO,
            error: None,
        }
    }

    pub(crate) fn with_error(mut self, error: &crate::error::LivestatusError) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Renders the event as JSON with a stable key set:
    /// `actor`, `state` (lower-case name), `time` (RFC3339), `reason`,
    /// `attempt`, `error`, `backoff` (human duration). Empty and zero fields
    /// are omitted.
    pub fn to_json(&self) -> String {
        let wire = ConnectivityEventJson {
            actor: non_empty(&self.actor),
            state: self.state.as_str(),
            time: self.time.to_rfc3339_opts(SecondsFormat::Millis, true),
            reason: non_empty(&self.reason),
            attempt: (self.attempt > 0).then_some(self.attempt),
            error: self.error.as_deref().and_then(non_empty),
            backoff: (!self.backoff.is_zero()).then(|| format_duration(self.backoff)),
        };
        serde_json::to_string_pretty(&wire)
            .unwrap_or_else(|e| format!("{{\"state\":{:?},\"error\":{:?}}}", self.state.as_str(), e.to_string()))
    }
}

/// Wire shape for [`ConnectivityEvent::to_json`]; kept separate so the JSON
/// stays stable regardless of internal field changes.
#[derive(Serialize)]
struct ConnectivityEventJson<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    actor: Option<&'a str>,
    state: &'a str,
    time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    backoff: Option<String>,
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

/// Formats a duration the way operators read them: `250ms`, `5s`, `2m30s`,
/// `1h5s`.
pub(crate) fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 || out.is_empty() {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(ConnectivityState::Unknown.as_str(), "unknown");
        assert_eq!(ConnectivityState::Connected.as_str(), "connected");
        assert_eq!(ConnectivityState::Disconnected.as_str(), "disconnected");
        assert_eq!(ConnectivityState::Retrying.as_str(), "retrying");
        assert_eq!(ConnectivityState::Shutdown.as_str(), "shutdown");
    }

    #[test]
    fn state_atomic_roundtrip() {
        for state in [
            ConnectivityState::Unknown,
            ConnectivityState::Connected,
            ConnectivityState::Disconnected,
            ConnectivityState::Retrying,
            ConnectivityState::Shutdown,
        ] {
            assert_eq!(ConnectivityState::from_i32(state as i32), state);
        }
        assert_eq!(
            ConnectivityState::from_i32(99),
            ConnectivityState::Unknown
        );
    }

    #[test]
    fn json_omits_empty_fields() {
        let event = ConnectivityEvent::new("", ConnectivityState::Connected, "");
        let json = event.to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["state"], "connected");
        assert!(value.get("actor").is_none());
        assert!(value.get("reason").is_none());
        assert!(value.get("attempt").is_none());
        assert!(value.get("error").is_none());
        assert!(value.get("backoff").is_none());
        // time is always present and RFC3339-parsable
        let time = value["time"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(time).is_ok());
    }

    #[test]
    fn json_carries_full_shape() {
        let mut event = ConnectivityEvent::new("site_a", ConnectivityState::Retrying, "conn_error");
        event.attempt = 3;
        event.backoff = Duration::from_millis(90_500);
        event.error = Some("connection refused".to_string());

        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["actor"], "site_a");
        assert_eq!(value["state"], "retrying");
        assert_eq!(value["reason"], "conn_error");
        assert_eq!(value["attempt"], 3);
        assert_eq!(value["error"], "connection refused");
        assert_eq!(value["backoff"], "1m30s");
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(150)), "2m30s");
        assert_eq!(format_duration(Duration::from_secs(3605)), "1h5s");
        assert_eq!(format_duration(Duration::from_secs(60)), "1m");
    }
}
