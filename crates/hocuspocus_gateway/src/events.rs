//! Webhook event dispatch.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::GatewayError;
use crate::identity::Principal;
use crate::models::{Model, ModelRegistry};
use crate::payload::{WebhookPayload, state_bytes};
use crate::queue::{Task, TaskQueue};

/// Lifecycle events sent by the collaboration server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEvent {
    Create,
    Connect,
    Change,
    Disconnect,
}

impl WebhookEvent {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "create" => Some(WebhookEvent::Create),
            "connect" => Some(WebhookEvent::Connect),
            "change" => Some(WebhookEvent::Change),
            "disconnect" => Some(WebhookEvent::Disconnect),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::Create => "create",
            WebhookEvent::Connect => "connect",
            WebhookEvent::Change => "change",
            WebhookEvent::Disconnect => "disconnect",
        }
    }
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an event handler answers with.
#[derive(Debug, Clone, PartialEq)]
pub enum EventResponse {
    Json(Value),
    Handled,
    Empty,
}

impl IntoResponse for EventResponse {
    fn into_response(self) -> Response {
        match self {
            EventResponse::Json(value) => Json(value).into_response(),
            EventResponse::Handled => "handled".into_response(),
            EventResponse::Empty => StatusCode::OK.into_response(),
        }
    }
}

/// Runs the handler for an authorized event and dispatches its task.
#[derive(Clone)]
pub struct EventRouter {
    queue: Arc<dyn TaskQueue>,
    registry: Arc<ModelRegistry>,
}

impl EventRouter {
    pub fn new(queue: Arc<dyn TaskQueue>, registry: Arc<ModelRegistry>) -> Self {
        Self { queue, registry }
    }

    pub async fn route(
        &self,
        event: WebhookEvent,
        principal: &Principal,
        document: &Model,
        payload: &WebhookPayload,
    ) -> Result<EventResponse, GatewayError> {
        debug!(
            "Handling {} for collaborator {} on {}",
            event,
            principal.collaborator_id(),
            document.reference()
        );

        match event {
            WebhookEvent::Create => Ok(EventResponse::Json(Value::Object(
                self.registry.collaborative_snapshot(document),
            ))),
            WebhookEvent::Connect => {
                self.queue
                    .dispatch(Task::RecordConnect {
                        collaborator_id: principal.collaborator_id(),
                        document: document.reference(),
                    })
                    .await?;
                Ok(EventResponse::Json(principal.public.clone()))
            }
            WebhookEvent::Change => {
                let state = payload
                    .state
                    .as_ref()
                    .or(payload.document.as_ref())
                    .ok_or_else(|| GatewayError::Validation("Missing document state".to_string()))?;
                self.queue
                    .dispatch(Task::StoreSnapshot {
                        collaborator_id: principal.collaborator_id(),
                        document: document.reference(),
                        payload: state_bytes(state)?,
                    })
                    .await?;
                Ok(EventResponse::Handled)
            }
            WebhookEvent::Disconnect => {
                self.queue
                    .dispatch(Task::RecordDisconnect {
                        collaborator_id: principal.collaborator_id(),
                        document: document.reference(),
                    })
                    .await?;
                Ok(EventResponse::Handled)
            }
        }
    }
}
