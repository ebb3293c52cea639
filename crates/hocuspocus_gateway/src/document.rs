//! Document name parsing and resolution.
//!
//! The collaboration server addresses documents as
//! `"<type-identifier>:<numeric-id>"`, usually percent-encoded when it shows
//! up in a URL.

use std::sync::Arc;

use crate::error::GatewayError;
use crate::models::{DocumentRef, Model, ModelRegistry};

/// A parsed, not yet resolved, document name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentName {
    pub model_type: String,
    pub model_id: i64,
}

impl DocumentName {
    pub fn parse(name: &str) -> Result<Self, GatewayError> {
        let plus_decoded = name.replace('+', " ");
        let decoded = urlencoding::decode(&plus_decoded)
            .map_err(|_| GatewayError::Validation("Invalid document name".to_string()))?;

        let parts: Vec<&str> = decoded.split(':').collect();
        let [model_type, model_id] = parts.as_slice() else {
            return Err(GatewayError::Validation("Invalid document name".to_string()));
        };

        let model_id = model_id.parse::<i64>().map_err(|_| {
            GatewayError::Validation(format!("Invalid document id \"{}\"", model_id))
        })?;

        Ok(Self {
            model_type: model_type.to_string(),
            model_id,
        })
    }

    pub fn reference(&self) -> DocumentRef {
        DocumentRef::new(self.model_type.clone(), self.model_id)
    }
}

/// Resolves document names to collaborative models.
#[derive(Clone)]
pub struct DocumentResolver {
    registry: Arc<ModelRegistry>,
}

impl DocumentResolver {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve `name` to the model it designates.
    ///
    /// The type must be registered as collaborative and persisted, and the
    /// instance must exist.
    pub fn resolve(&self, name: &str) -> Result<Model, GatewayError> {
        let parsed = DocumentName::parse(name)?;
        self.registry
            .find_collaborative(&parsed.model_type, parsed.model_id)?
            .ok_or_else(|| GatewayError::NotFound(format!("Document \"{}\" not found", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attributes, ModelDescriptor, ModelError};
    use serde_json::json;

    fn resolver() -> DocumentResolver {
        let registry = ModelRegistry::new()
            .with(
                ModelDescriptor::new("App\\Models\\TextDocument")
                    .collaborative(["title"])
                    .source(|id: i64| -> Result<Option<Attributes>, ModelError> {
                        let mut attributes = Attributes::new();
                        attributes.insert("id".to_string(), json!(id));
                        Ok((id == 1).then_some(attributes))
                    }),
            )
            .with(
                ModelDescriptor::new("App\\Models\\User").source(
                    |_id: i64| -> Result<Option<Attributes>, ModelError> {
                        Ok(Some(Attributes::new()))
                    },
                ),
            )
            .with(ModelDescriptor::new("App\\Models\\Draft").collaborative(["title"]));
        DocumentResolver::new(Arc::new(registry))
    }

    #[test]
    fn test_parse_decodes_percent_and_plus() {
        let parsed = DocumentName::parse("App%5CModels%5CText+Document%3A12").unwrap();
        assert_eq!(parsed.model_type, "App\\Models\\Text Document");
        assert_eq!(parsed.model_id, 12);
    }

    #[test]
    fn test_resolve_collaborative_document() {
        let model = resolver().resolve("App%5CModels%5CTextDocument%3A1").unwrap();
        assert_eq!(model.reference(), DocumentRef::new("App\\Models\\TextDocument", 1));
    }

    #[test]
    fn test_malformed_names_are_validation_errors() {
        let resolver = resolver();
        for name in [
            "",
            "App\\Models\\TextDocument",
            "App\\Models\\TextDocument:1:2",
            "App\\Models\\TextDocument:abc",
            "App\\Models\\TextDocument:",
        ] {
            assert!(
                matches!(resolver.resolve(name), Err(GatewayError::Validation(_))),
                "name {:?}",
                name
            );
        }
    }

    #[test]
    fn test_non_collaborative_or_unpersisted_types_are_rejected() {
        let resolver = resolver();
        for name in ["App\\Models\\User:1", "App\\Models\\Draft:1", "Nope:1"] {
            assert!(
                matches!(resolver.resolve(name), Err(GatewayError::Validation(_))),
                "name {:?}",
                name
            );
        }
    }

    #[test]
    fn test_missing_instance_is_not_found() {
        assert!(matches!(
            resolver().resolve("App\\Models\\TextDocument:2"),
            Err(GatewayError::NotFound(_))
        ));
    }
}
