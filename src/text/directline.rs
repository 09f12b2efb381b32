//! Direct Line client — the production [`TextChannel`].
//!
//! Wire shape (Bot Framework Direct Line v3):
//!
//! * `POST /v3/directline/conversations` opens a conversation (bearer
//!   secret) and returns a `conversationId`.
//! * `POST .../conversations/{id}/activities` sends a user `message`
//!   activity.
//! * `GET  .../conversations/{id}/activities?watermark=` returns activities
//!   newer than the watermark; the client polls this on an interval and
//!   folds `message` activities into a cumulative ordered list.
//!
//! A `typing` activity from the bot raises the typing signal; the next bot
//! `message` activity lowers it.  Poll failures flip the connection state to
//! disconnected but polling keeps going, so the channel recovers on its own
//! once the backend is reachable again.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::TextConfig;
use crate::text::channel::{ConnectionState, TextChannel, TextError, TextEvent, TextMessage};

/// `from.id` used for activities this client sends.
const USER_ID: &str = "user";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Conversation {
    #[serde(rename = "conversationId")]
    conversation_id: String,
}

#[derive(Debug, Deserialize)]
struct ActivitySet {
    #[serde(default)]
    activities: Vec<Activity>,
    watermark: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Activity {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    from: ChannelAccount,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChannelAccount {
    id: String,
}

// ---------------------------------------------------------------------------
// Activity folding
// ---------------------------------------------------------------------------

/// Fold one poll's worth of activities into the cumulative message list.
///
/// Returns whether the list changed and the last typing signal observed in
/// this batch (`Some(true)` for a bot `typing` activity, `Some(false)` for a
/// bot `message` activity, `None` when neither occurred).
fn fold_activities(messages: &mut Vec<TextMessage>, activities: Vec<Activity>) -> (bool, Option<bool>) {
    let mut changed = false;
    let mut typing = None;

    for activity in activities {
        let from_bot = activity.from.id != USER_ID;
        match activity.kind.as_str() {
            "message" => {
                messages.push(TextMessage {
                    id: activity.id,
                    sender: activity.from.id,
                    text: activity.text.unwrap_or_default(),
                });
                changed = true;
                if from_bot {
                    typing = Some(false);
                }
            }
            "typing" if from_bot => {
                typing = Some(true);
            }
            _ => {}
        }
    }

    (changed, typing)
}

// ---------------------------------------------------------------------------
// DirectLineChannel
// ---------------------------------------------------------------------------

/// Production [`TextChannel`] backed by the Direct Line REST endpoint.
pub struct DirectLineChannel {
    config: TextConfig,
    client: reqwest::Client,
    conversation_id: Option<String>,
    poll_task: Option<tokio::task::JoinHandle<()>>,
}

impl DirectLineChannel {
    pub fn new(config: TextConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            config,
            client,
            conversation_id: None,
            poll_task: None,
        }
    }

    fn secret(&self) -> Result<&str, TextError> {
        match self.config.secret.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(secret),
            _ => Err(TextError::NotConnected),
        }
    }

    fn conversations_url(&self) -> String {
        format!("{}/v3/directline/conversations", self.config.base_url)
    }

    fn activities_url(&self, conversation_id: &str) -> String {
        format!(
            "{}/v3/directline/conversations/{}/activities",
            self.config.base_url, conversation_id
        )
    }
}

impl Drop for DirectLineChannel {
    fn drop(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl TextChannel for DirectLineChannel {
    async fn open(&mut self, events: mpsc::Sender<TextEvent>) -> Result<(), TextError> {
        let secret = match self.secret() {
            Ok(secret) => secret.to_string(),
            Err(e) => {
                let _ = events
                    .send(TextEvent::Connection(ConnectionState {
                        connected: false,
                        loading: false,
                        error: Some("no Direct Line secret configured".into()),
                    }))
                    .await;
                return Err(e);
            }
        };

        let _ = events
            .send(TextEvent::Connection(ConnectionState {
                connected: false,
                loading: true,
                error: None,
            }))
            .await;

        let response = self
            .client
            .post(self.conversations_url())
            .bearer_auth(&secret)
            .send()
            .await?;

        if !response.status().is_success() {
            let reason = format!("conversation start failed: {}", response.status());
            let _ = events
                .send(TextEvent::Connection(ConnectionState {
                    connected: false,
                    loading: false,
                    error: Some(reason.clone()),
                }))
                .await;
            return Err(TextError::Rejected(reason));
        }

        let conversation: Conversation = response
            .json()
            .await
            .map_err(|e| TextError::Parse(e.to_string()))?;

        log::info!("text: conversation {} opened", conversation.conversation_id);
        self.conversation_id = Some(conversation.conversation_id.clone());

        let _ = events
            .send(TextEvent::Connection(ConnectionState {
                connected: true,
                loading: false,
                error: None,
            }))
            .await;

        // Poll task: fetch activities after the watermark, fold them into
        // the cumulative list, and push snapshots into the session queue.
        let client = self.client.clone();
        let activities_url = self.activities_url(&conversation.conversation_id);
        let interval = std::time::Duration::from_millis(self.config.poll_interval_ms);

        let task = tokio::spawn(async move {
            let mut watermark: Option<String> = None;
            let mut messages: Vec<TextMessage> = Vec::new();
            let mut healthy = true;

            loop {
                tokio::time::sleep(interval).await;

                let mut request = client.get(&activities_url).bearer_auth(&secret);
                if let Some(w) = watermark.as_deref() {
                    request = request.query(&[("watermark", w)]);
                }

                let set: Result<ActivitySet, String> = match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        response.json().await.map_err(|e| e.to_string())
                    }
                    Ok(response) => Err(format!("activity poll failed: {}", response.status())),
                    Err(e) => Err(e.to_string()),
                };

                match set {
                    Ok(set) => {
                        if !healthy {
                            healthy = true;
                            let _ = events
                                .send(TextEvent::Connection(ConnectionState {
                                    connected: true,
                                    loading: false,
                                    error: None,
                                }))
                                .await;
                        }
                        if set.watermark.is_some() {
                            watermark = set.watermark;
                        }

                        let (changed, typing) = fold_activities(&mut messages, set.activities);
                        if let Some(typing) = typing {
                            if events.send(TextEvent::Typing(typing)).await.is_err() {
                                break;
                            }
                        }
                        if changed
                            && events
                                .send(TextEvent::Messages(messages.clone()))
                                .await
                                .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("text: {e}");
                        healthy = false;
                        if events
                            .send(TextEvent::Connection(ConnectionState {
                                connected: false,
                                loading: false,
                                error: Some(e),
                            }))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
            log::debug!("text: poll task finished");
        });

        self.poll_task = Some(task);
        Ok(())
    }

    async fn send_message(&self, text: &str) -> Result<(), TextError> {
        let secret = self.secret()?;
        let conversation_id = self
            .conversation_id
            .as_deref()
            .ok_or(TextError::NotConnected)?;

        let body = serde_json::json!({
            "type": "message",
            "from": { "id": USER_ID },
            "text": text,
        });

        let response = self
            .client
            .post(self.activities_url(conversation_id))
            .bearer_auth(secret)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TextError::Rejected(format!(
                "send failed: {}",
                response.status()
            )));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
