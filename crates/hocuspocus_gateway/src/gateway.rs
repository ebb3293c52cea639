//! Request pipelines for the three webhook entry points.
//!
//! Every pipeline runs the same steps in order: verify the signature, parse
//! and validate the body, resolve the principal and the document, ask the
//! access gate, then act.

use axum::http::Method;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::access::AccessGate;
use crate::config::HocuspocusConfig;
use crate::db::CollabRepo;
use crate::document::DocumentResolver;
use crate::error::GatewayError;
use crate::events::{EventResponse, EventRouter, WebhookEvent};
use crate::identity::{IdentityResolver, Principal};
use crate::models::{Model, ModelRegistry};
use crate::payload::{EventRequest, FetchResponse, StoreRequest, WebhookBody};
use crate::queue::{Task, TaskQueue};
use crate::signature::{SignatureVerifier, SignedRequest};
use crate::snapshot::SnapshotStore;

/// Shared state for the webhook handlers
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<HocuspocusConfig>,
    pub verifier: SignatureVerifier,
    pub identity: IdentityResolver,
    pub documents: DocumentResolver,
    pub snapshots: SnapshotStore,
    pub router: EventRouter,
    pub queue: Arc<dyn TaskQueue>,
    pub gate: Arc<dyn AccessGate>,
}

impl GatewayState {
    pub fn new(
        config: HocuspocusConfig,
        repo: Arc<CollabRepo>,
        registry: Arc<ModelRegistry>,
        queue: Arc<dyn TaskQueue>,
        gate: Arc<dyn AccessGate>,
    ) -> Self {
        Self {
            verifier: SignatureVerifier::new(config.secret.clone()),
            identity: IdentityResolver::new(
                repo.clone(),
                registry.clone(),
                config.access_token_parameter.clone(),
            ),
            documents: DocumentResolver::new(registry.clone()),
            snapshots: SnapshotStore::new(repo),
            router: EventRouter::new(queue.clone(), registry),
            config: Arc::new(config),
            queue,
            gate,
        }
    }

    /// Reject the request unless its signature matches.
    pub fn verify(&self, request: &SignedRequest<'_>) -> Result<(), GatewayError> {
        if self.verifier.verify(request)? {
            Ok(())
        } else {
            warn!("Rejected webhook request with invalid signature");
            Err(GatewayError::Protocol("Invalid signature".to_string()))
        }
    }

    /// Resolve the principal and the document, then consult the access gate.
    pub fn authorize(
        &self,
        parameters: &Map<String, Value>,
        document_name: &str,
    ) -> Result<(Principal, Model), GatewayError> {
        let principal = self.identity.resolve_user(parameters)?;
        let document = self.documents.resolve(document_name)?;

        if !self
            .gate
            .can(&principal, &self.config.policy_method_name, &document)
        {
            warn!(
                "Collaborator {} denied \"{}\" on {}",
                principal.collaborator_id(),
                self.config.policy_method_name,
                document.reference()
            );
            return Err(GatewayError::Authorization(
                "User is not allowed to access this document".to_string(),
            ));
        }

        Ok((principal, document))
    }

    /// `POST {route}`: lifecycle events.
    pub async fn ingest_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<EventResponse, GatewayError> {
        self.verify(&SignedRequest {
            method: &Method::POST,
            body,
            query: &BTreeMap::new(),
            document_name: None,
            signature,
        })?;

        let request = EventRequest::try_from(WebhookBody::from_slice(body)?)?;

        if !self.config.allows_event(&request.event) {
            debug!("Ignoring event \"{}\"", request.event);
            return Ok(EventResponse::Empty);
        }

        let (principal, document) =
            self.authorize(&request.request_parameters, &request.document_name)?;

        match WebhookEvent::parse(&request.event) {
            Some(event) => {
                self.router
                    .route(event, &principal, &document, &request.payload)
                    .await
            }
            None => Ok(EventResponse::Empty),
        }
    }

    /// `POST {route}/store`: explicit state persistence.
    pub async fn ingest_store(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.verify(&SignedRequest {
            method: &Method::POST,
            body,
            query: &BTreeMap::new(),
            document_name: None,
            signature,
        })?;

        let request = StoreRequest::try_from(WebhookBody::from_slice(body)?)?;
        let (principal, document) =
            self.authorize(&request.request_parameters, &request.document_name)?;

        self.queue
            .dispatch(Task::StoreSnapshot {
                collaborator_id: principal.collaborator_id(),
                document: document.reference(),
                payload: request.state,
            })
            .await?;
        Ok(())
    }

    /// `GET {route}/get/{documentName}`: current state for the principal.
    pub fn fetch(
        &self,
        document_name: &str,
        query: &BTreeMap<String, String>,
        signature: Option<&str>,
    ) -> Result<FetchResponse, GatewayError> {
        self.verify(&SignedRequest {
            method: &Method::GET,
            body: &[],
            query,
            document_name: Some(document_name),
            signature,
        })?;

        let parameters: Map<String, Value> = query
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let (principal, document) = self.authorize(&parameters, document_name)?;

        let data = self
            .snapshots
            .fetch_payload(principal.collaborator_id(), &document.reference())?;
        Ok(FetchResponse { data })
    }
}
