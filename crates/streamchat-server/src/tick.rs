//! Demo tick events.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde::Serialize;

/// SSE event name used for every tick.
pub const TICK_EVENT: &str = "message";

/// Payload of one demo event: `{"dt": <ISO-8601>, "value": <0..99>}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    pub dt: String,
    pub value: u8,
}

impl Tick {
    /// Creates a tick for `now` with a random value in `0..100`.
    pub fn random(now: DateTime<Utc>) -> Self {
        Self::new(now, rand::thread_rng().gen_range(0..100))
    }

    pub fn new(now: DateTime<Utc>, value: u8) -> Self {
        Self {
            dt: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            value,
        }
    }

    /// Renders the tick as an SSE event: name `message`, JSON data, id = value.
    pub fn to_event(&self) -> Result<axum::response::sse::Event, serde_json::Error> {
        let data = serde_json::to_string(self)?;
        Ok(axum::response::sse::Event::default()
            .event(TICK_EVENT)
            .data(data)
            .id(self.value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_is_iso_with_millis() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap();
        let tick = Tick::new(now, 42);

        assert_eq!(tick.dt, "2024-05-01T12:30:05.000Z");
        assert_eq!(
            serde_json::to_string(&tick).unwrap(),
            r#"{"dt":"2024-05-01T12:30:05.000Z","value":42}"#
        );
    }

    #[test]
    fn test_random_value_in_range() {
        for _ in 0..500 {
            assert!(Tick::random(Utc::now()).value < 100);
        }
    }
}
