//! Chat transcript controller sitting on top of one `RealtimeChannel`.

use crate::channel::{ChannelError, ObserverId, RealtimeChannel};
use gba_core::{wire::InboundFrame, ConnectionState, Message, ModelConfig};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const MISSING_API_KEY_MESSAGE: &str = "Please configure the AI model API key first.";
pub const BACKEND_UNREACHABLE_MESSAGE: &str =
    "Unable to reach the backend service; check that it is running.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("model API key is not configured")]
    ConfigurationMissing,
    #[error("message is empty")]
    EmptyMessage,
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestConnectionStatus {
    #[default]
    Idle,
    Testing,
    Success,
    Error,
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Also record send failures as assistant messages, so the transcript
    /// stays the single place a user looks for outcomes.
    pub errors_in_transcript: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            errors_in_transcript: true,
        }
    }
}

#[derive(Default)]
struct SessionState {
    messages: Vec<Message>,
    loading: bool,
    model_config: ModelConfig,
    test_status: TestConnectionStatus,
    test_message: Option<String>,
}

struct Shared {
    state: Mutex<SessionState>,
    revision: watch::Sender<u64>,
    options: ChatOptions,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn push_error(&self, text: String) {
        if !self.options.errors_in_transcript {
            return;
        }
        self.state().messages.push(Message::assistant(text));
    }

    fn on_frame(&self, frame: &InboundFrame) {
        match frame {
            InboundFrame::ConnectionTestResult { success, message } => {
                let mut state = self.state();
                state.test_status = if *success {
                    TestConnectionStatus::Success
                } else {
                    TestConnectionStatus::Error
                };
                state.test_message = message.clone();
                info!(event = "connection_test_result", success = *success);
            }
            other => {
                let Some(content) = other.reply_content() else {
                    debug!(event = "frame_ignored");
                    return;
                };
                let mut state = self.state();
                state.messages.push(Message::assistant(content));
                state.loading = false;
                if state.test_status == TestConnectionStatus::Testing {
                    state.test_status = TestConnectionStatus::Success;
                }
            }
        }
        self.bump();
    }

    fn on_state(&self, connection: ConnectionState) {
        if connection == ConnectionState::Connected {
            self.bump();
            return;
        }
        {
            let mut state = self.state();
            state.loading = false;
            if state.test_status == TestConnectionStatus::Testing {
                state.test_status = TestConnectionStatus::Error;
                state.test_message = Some(format!("connection {connection}"));
            }
        }
        self.bump();
    }
}

pub struct ChatSession {
    channel: RealtimeChannel,
    shared: Arc<Shared>,
    observers: Vec<ObserverId>,
}

impl ChatSession {
    pub fn new(channel: RealtimeChannel, model_config: ModelConfig, options: ChatOptions) -> Self {
        let (revision, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState {
                model_config,
                ..SessionState::default()
            }),
            revision,
            options,
        });
        let on_frame = shared.clone();
        let on_state = shared.clone();
        let observers = vec![
            channel.on_frame(move |frame| on_frame.on_frame(frame)),
            channel.on_state_change(move |state| on_state.on_state(state)),
        ];
        Self {
            channel,
            shared,
            observers,
        }
    }

    pub fn channel(&self) -> &RealtimeChannel {
        &self.channel
    }

    pub async fn start(&self) -> Result<(), ChatError> {
        if let Err(err) = self.channel.connect().await {
            self.shared
                .push_error(BACKEND_UNREACHABLE_MESSAGE.to_string());
            self.shared.bump();
            return Err(err.into());
        }
        Ok(())
    }

    /// Appends `content` as a user message and forwards it with the prior
    /// transcript. Failures are returned and, unless disabled, also written
    /// to the transcript; the loading flag is never left set on error.
    pub fn send_user_message(&self, content: &str) -> Result<(), ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let (history, model_config) = {
            let mut state = self.shared.state();
            if !state.model_config.has_api_key() {
                drop(state);
                warn!(event = "chat_send_blocked", reason = "missing_api_key");
                self.shared.push_error(MISSING_API_KEY_MESSAGE.to_string());
                self.shared.bump();
                return Err(ChatError::ConfigurationMissing);
            }
            let history = state.messages.clone();
            state.messages.push(Message::user(content));
            state.loading = true;
            (history, state.model_config.clone())
        };
        self.shared.bump();

        match self.channel.send_query(content, &model_config, &history) {
            Ok(_) => {
                debug!(event = "chat_sent", history = history.len());
                Ok(())
            }
            Err(err) => {
                warn!(event = "chat_send_failed", error = %err);
                self.shared.state().loading = false;
                self.shared
                    .push_error(format!("Failed to send message: {err}"));
                self.shared.bump();
                Err(err.into())
            }
        }
    }

    pub fn test_connection(&self, model_config: &ModelConfig) -> Result<(), ChatError> {
        {
            let mut state = self.shared.state();
            state.test_status = TestConnectionStatus::Testing;
            state.test_message = None;
        }
        self.shared.bump();
        if let Err(err) = self.channel.send_test_connection(model_config) {
            {
                let mut state = self.shared.state();
                state.test_status = TestConnectionStatus::Error;
                state.test_message = Some(err.to_string());
            }
            self.shared.bump();
            return Err(err.into());
        }
        Ok(())
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.state().messages.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.state().loading
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn model_config(&self) -> ModelConfig {
        self.shared.state().model_config.clone()
    }

    pub fn set_model_config(&self, model_config: ModelConfig) {
        self.shared.state().model_config = model_config;
        self.shared.bump();
    }

    pub fn test_status(&self) -> (TestConnectionStatus, Option<String>) {
        let state = self.shared.state();
        (state.test_status, state.test_message.clone())
    }

    pub fn reset(&self) {
        {
            let mut state = self.shared.state();
            state.messages.clear();
            state.loading = false;
        }
        self.shared.bump();
    }

    /// Bumped on every transcript, loading, test or connection change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    pub async fn shutdown(&mut self) {
        for id in self.observers.drain(..) {
            self.channel.remove_observer(id);
        }
        self.channel.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use crate::navigation::{GatewayConfig, NavigationGateway};
    use gba_core::Role;
    use url::Url;

    fn configured() -> ModelConfig {
        ModelConfig {
            api_base_url: "https://api.example.test/v1".to_string(),
            api_key: "sk-test".to_string(),
            model_name: "qwen".to_string(),
        }
    }

    fn offline_session(model_config: ModelConfig, options: ChatOptions) -> ChatSession {
        let channel = RealtimeChannel::new(
            ChannelConfig::new(Url::parse("ws://127.0.0.1:9/ws").expect("url")),
            Arc::new(NavigationGateway::new(GatewayConfig::default())),
        );
        ChatSession::new(channel, model_config, options)
    }

    #[test]
    fn missing_api_key_short_circuits_locally() {
        let session = offline_session(ModelConfig::default(), ChatOptions::default());
        let err = session.send_user_message("Show me TP53").expect_err("no key");
        assert!(matches!(err, ChatError::ConfigurationMissing));

        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, Role::Assistant);
        assert_eq!(messages[0].content, MISSING_API_KEY_MESSAGE);
        assert!(!session.is_loading());
    }

    #[test]
    fn blank_input_is_rejected_without_touching_transcript() {
        let session = offline_session(configured(), ChatOptions::default());
        assert!(matches!(
            session.send_user_message("   \n"),
            Err(ChatError::EmptyMessage)
        ));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn send_failure_lands_in_transcript_and_clears_loading() {
        let session = offline_session(configured(), ChatOptions::default());
        let err = session.send_user_message("hello").expect_err("offline");
        assert!(matches!(
            err,
            ChatError::Channel(ChannelError::NotConnected(ConnectionState::Disconnected))
        ));

        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Role::User);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].sender, Role::Assistant);
        assert!(messages[1].content.starts_with("Failed to send message: "));
        assert!(!session.is_loading());
    }

    #[test]
    fn send_failure_can_stay_out_of_transcript() {
        let session = offline_session(
            configured(),
            ChatOptions {
                errors_in_transcript: false,
            },
        );
        assert!(session.send_user_message("hello").is_err());
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, Role::User);
    }

    #[test]
    fn reply_frame_appends_one_message_and_clears_loading() {
        let session = offline_session(configured(), ChatOptions::default());
        session.shared.state().loading = true;
        let mut revisions = session.subscribe();

        session.shared.on_frame(&InboundFrame::ChatReply {
            content: "TP53 is on chromosome 17.".to_string(),
        });

        assert!(revisions.has_changed().expect("sender alive"));
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "TP53 is on chromosome 17.");
        assert!(!session.is_loading());
    }

    #[test]
    fn connection_test_tracks_status() {
        let session = offline_session(configured(), ChatOptions::default());
        assert_eq!(session.test_status().0, TestConnectionStatus::Idle);

        assert!(session.test_connection(&configured()).is_err());
        assert_eq!(session.test_status().0, TestConnectionStatus::Error);

        session.shared.on_frame(&InboundFrame::ConnectionTestResult {
            success: true,
            message: Some("Connection OK".to_string()),
        });
        assert_eq!(
            session.test_status(),
            (
                TestConnectionStatus::Success,
                Some("Connection OK".to_string())
            )
        );
        assert!(session.messages().is_empty());
    }

    #[test]
    fn leaving_connected_clears_loading_and_pending_test() {
        let session = offline_session(configured(), ChatOptions::default());
        {
            let mut state = session.shared.state();
            state.loading = true;
            state.test_status = TestConnectionStatus::Testing;
        }
        session.shared.on_state(ConnectionState::Reconnecting);
        assert!(!session.is_loading());
        assert_eq!(session.test_status().0, TestConnectionStatus::Error);
    }

    #[test]
    fn reset_clears_transcript() {
        let session = offline_session(ModelConfig::default(), ChatOptions::default());
        let _ = session.send_user_message("hi");
        assert!(!session.messages().is_empty());
        session.reset();
        assert!(session.messages().is_empty());

        session.set_model_config(configured());
        assert!(session.model_config().has_api_key());
    }

    #[tokio::test]
    async fn unreachable_backend_is_reported_on_start() {
        let session = offline_session(configured(), ChatOptions::default());
        assert!(session.start().await.is_err());
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, BACKEND_UNREACHABLE_MESSAGE);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }
}
