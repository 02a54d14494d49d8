// Fire-and-forget notifications; failures never reach the caller
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best effort: implementations log failures and return normally
    async fn notify(&self, kind: &str, message: &str);
}

pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _kind: &str, _message: &str) {}
}

/// Posts events to a Discord webhook
pub struct DiscordNotifier {
    client: Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: Client::new(),
            webhook_url,
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, kind: &str, message: &str) {
        let body = json!({ "content": format!("**[{}]** {}", kind, message) });
        let result = self
            .client
            .post(&self.webhook_url)
            .json(&body)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await;

        match result {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(status = response.status().as_u16(), "discord webhook rejected");
            }
            Err(e) => {
                tracing::warn!(error = %e, "discord webhook failed");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discord_posts_content() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/webhook")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"content": "**[trade]** EURUSD long opened"}"#.to_string(),
            ))
            .with_status(204)
            .create_async()
            .await;

        let notifier = DiscordNotifier::new(format!("{}/webhook", server.url()));
        notifier.notify("trade", "EURUSD long opened").await;
        hook.assert_async().await;
    }

    #[tokio::test]
    async fn test_failure_does_not_panic() {
        let notifier = DiscordNotifier::new("http://127.0.0.1:1/webhook".to_string());
        notifier.notify("trade", "unreachable").await;
    }
}
