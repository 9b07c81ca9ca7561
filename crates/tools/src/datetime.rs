//! Current date/time lookup, with optional IANA timezone argument.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use chrono_tz::Tz;
use serde_json::json;

use crate::Tool;

pub struct DatetimeTool;

#[async_trait]
impl Tool for DatetimeTool {
    fn name(&self) -> &str {
        "get_datetime"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Use when the user asks what time or date it is, \
         or needs time-related information."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "IANA timezone name (e.g., \"America/New_York\"). Defaults to system timezone.",
                },
            },
            "required": [],
        })
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let zone_name = match args.get("timezone").and_then(|v| v.as_str()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string()),
        };
        let Ok(zone) = zone_name.parse::<Tz>() else {
            bail!("unknown timezone: {zone_name}");
        };

        let now = Utc::now();
        let formatted = now
            .with_timezone(&zone)
            .format("%A, %B %-d, %Y at %I:%M:%S %p %Z")
            .to_string();
        Ok(json!({
            "datetime": now.to_rfc3339_opts(SecondsFormat::Millis, true),
            "formatted": formatted,
            "timezone": zone_name,
        })
        .to_string())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn explicit_timezone_is_echoed_back() {
        let output = DatetimeTool
            .execute(&json!({"timezone": "America/New_York"}))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["timezone"], "America/New_York");
        assert!(parsed["datetime"].as_str().unwrap().ends_with('Z'));
        let formatted = parsed["formatted"].as_str().unwrap();
        assert!(formatted.contains("at"));
    }

    #[tokio::test]
    async fn missing_timezone_falls_back_to_system_zone() {
        let output = DatetimeTool.execute(&json!({})).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert!(!parsed["timezone"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_timezone_is_an_error() {
        let result = DatetimeTool
            .execute(&json!({"timezone": "Mars/Olympus_Mons"}))
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Mars/Olympus_Mons"));
    }
}
