//! Per-connection protocol state: answers queries and connection tests, and
//! tracks the navigation commands the client still owes a response for.

use crate::planner::{capabilities_text, PlannedNavigation, QueryPlanner};
use chrono::Utc;
use gba_core::{
    chromosome_aliases,
    wire::{
        AiResponseBody, NavigationPayload, NavigationResponse, NavigationStatus, ServerFrame,
        NAVIGATE_TO_LOCATION,
    },
    Location, ModelConfig,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
struct IncomingQuery {
    query: String,
    #[serde(default)]
    ai_model_config: Option<ModelConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationRecord {
    pub request_id: String,
    pub requested: PlannedNavigation,
    pub status: NavigationStatus,
    pub message: String,
    pub landed: Option<Location>,
    pub timestamp: String,
}

pub struct Conversation {
    planner: QueryPlanner,
    pending: HashMap<String, PlannedNavigation>,
    history: Vec<NavigationRecord>,
}

impl Conversation {
    pub fn new(planner: QueryPlanner) -> Self {
        Self {
            planner,
            pending: HashMap::new(),
            history: Vec::new(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn history(&self) -> &[NavigationRecord] {
        &self.history
    }

    /// Frames to send back for one inbound text frame, in order.
    pub fn handle_text(&mut self, text: &str) -> Vec<ServerFrame> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "frame_parse", error = %err);
                return Vec::new();
            }
        };
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match kind.as_str() {
            "test_connection" => vec![self.test_connection(&value)],
            "navigation_response" => {
                self.navigation_response(value);
                Vec::new()
            }
            _ if value.get("query").is_some() => match serde_json::from_value(value) {
                Ok(query) => self.query(query),
                Err(err) => {
                    warn!(event = "query_parse", error = %err);
                    Vec::new()
                }
            },
            other => {
                debug!(event = "frame_ignored", kind = other);
                Vec::new()
            }
        }
    }

    fn test_connection(&self, value: &Value) -> ServerFrame {
        let config: ModelConfig = value
            .get("config")
            .cloned()
            .and_then(|config| serde_json::from_value(config).ok())
            .unwrap_or_default();
        let success = config.has_api_key();
        info!(event = "connection_test", model = %config.model_name, success = success);
        ServerFrame::TestConnectionResult {
            success,
            message: Some(if success {
                format!("Connection test succeeded for {}", display_model(&config))
            } else {
                "Connection test failed: API key is missing".to_string()
            }),
        }
    }

    fn query(&mut self, query: IncomingQuery) -> Vec<ServerFrame> {
        let config = query.ai_model_config.unwrap_or_default();
        info!(event = "query", chars = query.query.len(), model = %config.model_name);
        let mut frames = Vec::new();
        let content = match self.planner.find_target(&query.query) {
            None => capabilities_text(),
            Some(target) => match self.planner.plan(&target) {
                Ok(planned) => {
                    let content = match target.gene {
                        Some(gene) => format!(
                            "Navigating to {}. {} spans {} bp.",
                            planned.describe(),
                            gene.description,
                            planned.end - planned.start
                        ),
                        None => format!("Navigating to {}.", planned.describe()),
                    };
                    frames.push(self.navigation_command(planned));
                    content
                }
                Err(err) => {
                    warn!(event = "plan_rejected", error = %err);
                    err.to_string()
                }
            },
        };
        frames.push(ServerFrame::AiResponse {
            response: AiResponseBody {
                content,
                model_used: config.model_name.clone(),
                tool_results: Vec::new(),
                test_mode: !config.has_api_key(),
                error: None,
            },
            timestamp: Utc::now().to_rfc3339(),
        });
        frames
    }

    fn navigation_command(&mut self, planned: PlannedNavigation) -> ServerFrame {
        let request_id = uuid::Uuid::new_v4().to_string();
        info!(
            event = "navigation_sent",
            request_id = %request_id,
            target = %planned.describe()
        );
        let frame = ServerFrame::Navigation {
            action: NAVIGATE_TO_LOCATION.to_string(),
            payload: NavigationPayload {
                chromosome: planned.chromosome.clone(),
                chromosome_ucsc: Some(planned.chromosome_ucsc.clone()),
                chromosome_ensembl: Some(planned.chromosome_ensembl.clone()),
                start: planned.start,
                end: planned.end,
                gene_name: planned.gene_name.clone(),
            },
            request_id: request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
        };
        self.pending.insert(request_id, planned);
        frame
    }

    fn navigation_response(&mut self, value: Value) {
        let response: NavigationResponse = match serde_json::from_value(value) {
            Ok(response) => response,
            Err(err) => {
                warn!(event = "navigation_response_parse", error = %err);
                return;
            }
        };
        let Some(requested) = self.pending.remove(&response.request_id) else {
            warn!(event = "navigation_response_unknown", request_id = %response.request_id);
            return;
        };
        match (&response.status, &response.location) {
            (NavigationStatus::Success, Some(landed)) => {
                let same_chromosome =
                    chromosome_aliases(&requested.chromosome).contains(&landed.chromosome);
                if !same_chromosome || landed.start != requested.start || landed.end != requested.end
                {
                    warn!(
                        event = "navigation_landed_elsewhere",
                        request_id = %response.request_id,
                        requested = %requested.describe(),
                        landed = %landed
                    );
                }
                info!(event = "navigation_ok", request_id = %response.request_id, landed = %landed);
            }
            (NavigationStatus::Success, None) => {
                info!(event = "navigation_ok", request_id = %response.request_id);
            }
            (NavigationStatus::Error, _) => {
                warn!(
                    event = "navigation_failed",
                    request_id = %response.request_id,
                    message = %response.message
                );
            }
        }
        self.history.push(NavigationRecord {
            request_id: response.request_id,
            requested,
            status: response.status,
            message: response.message,
            landed: response.location,
            timestamp: Utc::now().to_rfc3339(),
        });
        if self.history.len() > HISTORY_LIMIT {
            let overflow = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..overflow);
        }
    }
}

fn display_model(config: &ModelConfig) -> &str {
    if config.model_name.trim().is_empty() {
        "the configured model"
    } else {
        &config.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gba_core::ChromosomeFormat;
    use serde_json::json;

    fn conversation() -> Conversation {
        Conversation::new(QueryPlanner::new(ChromosomeFormat::Ensembl))
    }

    fn query(text: &str) -> String {
        json!({
            "query": text,
            "messages": [{"role": "user", "content": text}],
            "ai_model_config": {"apiBaseUrl": "", "apiKey": "sk-test", "modelName": "qwen"}
        })
        .to_string()
    }

    #[test]
    fn gene_query_emits_command_then_reply() {
        let mut conversation = conversation();
        let frames = conversation.handle_text(&query("Show me TP53"));
        assert_eq!(frames.len(), 2);

        let ServerFrame::Navigation {
            action,
            payload,
            request_id,
            ..
        } = &frames[0]
        else {
            panic!("expected navigation first")
        };
        assert_eq!(action, NAVIGATE_TO_LOCATION);
        assert_eq!(payload.chromosome, "17");
        assert_eq!(payload.chromosome_ucsc.as_deref(), Some("chr17"));
        assert_eq!(payload.gene_name.as_deref(), Some("TP53"));
        assert!(uuid::Uuid::parse_str(request_id).is_ok());

        let ServerFrame::AiResponse { response, .. } = &frames[1] else {
            panic!("expected reply second")
        };
        assert!(response.content.starts_with("Navigating to TP53"));
        assert!(!response.test_mode);
        assert_eq!(conversation.pending_count(), 1);
    }

    #[test]
    fn navigation_response_settles_pending_request() {
        let mut conversation = conversation();
        let frames = conversation.handle_text(&query("chr7:55019017-55211628"));
        let ServerFrame::Navigation { request_id, .. } = &frames[0] else {
            panic!("expected navigation")
        };

        let answer = json!({
            "type": "navigation_response",
            "requestId": request_id,
            "status": "success",
            "message": "Successfully navigated to chr7:55019017..55211628",
            "location": {"chromosome": "chr7", "start": 55019017, "end": 55211628}
        });
        assert!(conversation.handle_text(&answer.to_string()).is_empty());
        assert_eq!(conversation.pending_count(), 0);
        let record = &conversation.history()[0];
        assert_eq!(record.status, NavigationStatus::Success);
        assert_eq!(record.requested.chromosome, "7");
        assert_eq!(
            record.landed.as_ref().map(|l| l.chromosome.as_str()),
            Some("chr7")
        );

        let unknown = json!({
            "type": "navigation_response",
            "requestId": "never-sent",
            "status": "error",
            "message": "nope"
        });
        conversation.handle_text(&unknown.to_string());
        assert_eq!(conversation.history().len(), 1);
    }

    #[test]
    fn invalid_targets_are_explained_without_a_command() {
        let mut conversation = conversation();
        let frames = conversation.handle_text(&query("go to chr3:900-100"));
        assert_eq!(frames.len(), 1);
        let ServerFrame::AiResponse { response, .. } = &frames[0] else {
            panic!("expected reply")
        };
        assert_eq!(
            response.content,
            "End position (100) must be greater than start position (900)"
        );
        assert_eq!(conversation.pending_count(), 0);
    }

    #[test]
    fn oversized_locus_gets_a_reply_not_a_command() {
        let mut conversation = conversation();
        let frames = conversation.handle_text(&query("go to chr1:18446744073709551615"));
        assert_eq!(frames.len(), 1);
        let ServerFrame::AiResponse { response, .. } = &frames[0] else {
            panic!("expected reply")
        };
        assert!(response.content.contains("too large"));
        assert_eq!(conversation.pending_count(), 0);
    }

    #[test]
    fn connection_test_checks_api_key() {
        let conversation = conversation();
        let ok = conversation.test_connection(&json!({
            "type": "test_connection",
            "config": {"apiBaseUrl": "", "apiKey": "sk", "modelName": "qwen"}
        }));
        assert!(matches!(ok, ServerFrame::TestConnectionResult { success: true, .. }));

        let missing = conversation.test_connection(&json!({"type": "test_connection"}));
        assert!(matches!(
            missing,
            ServerFrame::TestConnectionResult { success: false, .. }
        ));
    }

    #[test]
    fn junk_is_ignored() {
        let mut conversation = conversation();
        assert!(conversation.handle_text("{broken").is_empty());
        assert!(conversation.handle_text(r#"{"type":"ping"}"#).is_empty());
        let frames = conversation.handle_text(&query("hello"));
        let ServerFrame::AiResponse { response, .. } = &frames[0] else {
            panic!("expected reply")
        };
        assert_eq!(response.content, capabilities_text());
    }
}
