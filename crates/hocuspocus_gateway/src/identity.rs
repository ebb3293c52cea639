//! Token-based identity resolution.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::db::{CollabRepo, CollaboratorInfo};
use crate::error::GatewayError;
use crate::models::{Model, ModelError, ModelRegistry};

/// An authenticated collaborator together with its identity entity.
#[derive(Debug, Clone)]
pub struct Principal {
    pub collaborator: CollaboratorInfo,
    pub model: Model,
    /// Identity entity attributes without the hidden ones.
    pub public: Value,
}

impl Principal {
    pub fn collaborator_id(&self) -> i64 {
        self.collaborator.id
    }
}

/// Maps an opaque access token to a [`Principal`].
#[derive(Clone)]
pub struct IdentityResolver {
    repo: Arc<CollabRepo>,
    registry: Arc<ModelRegistry>,
    token_parameter: String,
}

impl IdentityResolver {
    pub fn new(
        repo: Arc<CollabRepo>,
        registry: Arc<ModelRegistry>,
        token_parameter: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            registry,
            token_parameter: token_parameter.into(),
        }
    }

    /// Resolve the principal from the request parameters forwarded by the
    /// collaboration server.
    pub fn resolve_user(&self, parameters: &Map<String, Value>) -> Result<Principal, GatewayError> {
        // Numeric tokens are looked up by their decimal form.
        let token = parameters
            .get(&self.token_parameter)
            .and_then(|value| match value {
                Value::String(token) => Some(token.clone()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                GatewayError::Authentication(format!(
                    "Missing \"{}\" request parameter",
                    self.token_parameter
                ))
            })?;

        let collaborator = self
            .repo
            .get_collaborator_by_token(&token)?
            .ok_or_else(|| GatewayError::NotFound("Collaborator not found".to_string()))?;

        let model = match self
            .registry
            .find(&collaborator.model_type, collaborator.model_id)
        {
            Ok(Some(model)) => model,
            Ok(None)
            | Err(ModelError::UnknownType(_))
            | Err(ModelError::NotPersisted(_)) => {
                debug!(
                    "Identity {}:{} of collaborator {} could not be loaded",
                    collaborator.model_type, collaborator.model_id, collaborator.id
                );
                return Err(GatewayError::NotFound("User not found".to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let public = self.registry.public_representation(&model);
        Ok(Principal {
            collaborator,
            model,
            public,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::models::{Attributes, ModelDescriptor};
    use rusqlite::Connection;
    use serde_json::json;

    fn setup() -> (IdentityResolver, Arc<CollabRepo>) {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        let repo = Arc::new(CollabRepo::new(conn));
        let registry = ModelRegistry::new().with(
            ModelDescriptor::new("App\\Models\\User")
                .hidden(["password"])
                .source(|id: i64| -> Result<Option<Attributes>, ModelError> {
                    Ok((id == 1).then(|| params(json!({"id": 1, "name": "Ada", "password": "pw"}))))
                }),
        );
        let resolver = IdentityResolver::new(repo.clone(), Arc::new(registry), "access_token");
        (resolver, repo)
    }

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_resolves_token_owner() {
        let (resolver, repo) = setup();
        let collaborator = repo.create_collaborator("App\\Models\\User", 1).unwrap();

        let principal = resolver
            .resolve_user(&params(json!({"access_token": collaborator.token})))
            .unwrap();
        assert_eq!(principal.collaborator_id(), collaborator.id);
        assert_eq!(principal.public, json!({"id": 1, "name": "Ada"}));
    }

    #[test]
    fn test_missing_or_empty_token_is_authentication_error() {
        let (resolver, _repo) = setup();
        for parameters in [
            json!({}),
            json!({"access_token": ""}),
            json!({"access_token": null}),
            json!({"access_token": ["t"]}),
        ] {
            assert!(matches!(
                resolver.resolve_user(&params(parameters)),
                Err(GatewayError::Authentication(_))
            ));
        }
    }

    #[test]
    fn test_unknown_token_is_not_found() {
        let (resolver, _repo) = setup();
        for parameters in [json!({"access_token": "nope"}), json!({"access_token": 42})] {
            assert!(matches!(
                resolver.resolve_user(&params(parameters)),
                Err(GatewayError::NotFound(_))
            ));
        }
    }

    #[test]
    fn test_missing_identity_entity_is_not_found() {
        let (resolver, repo) = setup();
        let gone = repo.create_collaborator("App\\Models\\User", 2).unwrap();
        let unregistered = repo.create_collaborator("App\\Models\\Team", 1).unwrap();

        for token in [gone.token, unregistered.token] {
            assert!(matches!(
                resolver.resolve_user(&params(json!({"access_token": token}))),
                Err(GatewayError::NotFound(_))
            ));
        }
    }
}
