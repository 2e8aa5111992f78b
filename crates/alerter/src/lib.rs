use crate::error::AlerterError;
use configuration::TelegramConfig;
use core_types::{Anomaly, CycleOutcome};
use reqwest::Client;
use serde::Serialize;

pub mod error;

/// The JSON payload for the Telegram `sendMessage` endpoint.
#[derive(Debug, Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str, // To allow for formatting like bold, italics etc.
}

/// A client for sending messages to the Telegram Bot API.
pub struct TelegramAlerter {
    client: Client,
    token: String,
    chat_id: String,
}

impl TelegramAlerter {
    /// Creates a new `TelegramAlerter`.
    ///
    /// Returns `None` if the token or chat_id is missing from the configuration,
    /// allowing the system to gracefully disable alerting.
    pub fn new(config: &TelegramConfig) -> Option<Self> {
        if config.token.is_empty() || config.chat_id.is_empty() {
            tracing::warn!("Telegram alerter is not configured (missing token or chat_id).");
            return None;
        }
        Some(Self {
            client: Client::new(),
            token: config.token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }

    /// Sends a text message to the configured Telegram chat.
    pub async fn send_message(&self, message: &str) -> Result<(), AlerterError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);

        let payload = SendMessagePayload {
            chat_id: &self.chat_id,
            text: message,
            parse_mode: "MarkdownV2", // Use Markdown for rich formatting
        };

        let response = self.client.post(&url).json(&payload).send().await?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to decode error response".to_string());
            return Err(AlerterError::ApiError(error_text));
        }

        Ok(())
    }

    /// Announces engine startup.
    pub async fn notify_started(&self, owner_id: &str) {
        let message = format!("✅ *Meridian Engine Started*\n`{}`", escape_markdown(owner_id));
        self.send_logged(&message).await;
    }

    /// Alerts on a cycle that sealed with anything other than success.
    pub async fn notify_cycle_outcome(&self, seq: i64, outcome: CycleOutcome) {
        if outcome == CycleOutcome::Success {
            return;
        }
        let icon = match outcome {
            CycleOutcome::PartialFailure => "⚠️",
            _ => "🚨",
        };
        let message = format!(
            "{} *Cycle {} sealed as {}*",
            icon,
            seq,
            escape_markdown(outcome.as_str())
        );
        self.send_logged(&message).await;
    }

    /// Alerts on an execution ambiguity that needs an operator.
    pub async fn notify_anomaly(&self, anomaly: &Anomaly) {
        let message = format!(
            "🚨 *Anomaly on {}*\n{}",
            escape_markdown(&anomaly.instrument),
            escape_markdown(&anomaly.reason)
        );
        self.send_logged(&message).await;
    }

    /// Alerting must never take the engine down with it: failures are
    /// logged and swallowed.
    async fn send_logged(&self, message: &str) {
        if let Err(e) = self.send_message(message).await {
            tracing::error!(error = ?e, "Failed to send Telegram alert.");
        }
    }
}

/// A helper function to escape characters that have special meaning in Telegram's MarkdownV2.
fn escape_markdown(text: &str) -> String {
    let special_chars = r"_*[]()~`>#+-=|{}.!";
    special_chars
        .chars()
        .fold(text.to_string(), |s, c| s.replace(c, &format!("\\{}", c)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_disable_the_alerter() {
        let config = TelegramConfig::default();
        assert!(TelegramAlerter::new(&config).is_none());
    }

    #[test]
    fn markdown_special_characters_are_escaped() {
        assert_eq!(escape_markdown("BTC-USD"), "BTC\\-USD");
        assert_eq!(escape_markdown("a.b!c"), "a\\.b\\!c");
    }
}
