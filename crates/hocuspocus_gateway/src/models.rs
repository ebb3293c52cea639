//! Registry of the model types that document names and collaborator
//! identities can point at.
//!
//! A document name such as `App\Models\TextDocument:7` carries a type
//! identifier. Instead of resolving it reflectively, every addressable type is
//! registered up front with a [`ModelDescriptor`] that declares whether the
//! type supports collaboration, which of its attributes are collaborative, and
//! how to load an instance by id.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::db::CollabRepo;

/// Attribute map of a loaded model.
pub type Attributes = Map<String, Value>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("\"{0}\" is not a registered model type")]
    UnknownType(String),
    #[error("\"{0}\" doesn't support collaborative editing")]
    NotCollaborative(String),
    #[error("\"{0}\" is not a persisted model")]
    NotPersisted(String),
    #[error("invalid table name \"{0}\"")]
    InvalidTable(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Polymorphic reference to a persisted model: `(type, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub model_type: String,
    pub model_id: i64,
}

impl DocumentRef {
    pub fn new(model_type: impl Into<String>, model_id: i64) -> Self {
        Self {
            model_type: model_type.into(),
            model_id,
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model_type, self.model_id)
    }
}

/// A model instance loaded through the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub type_name: String,
    pub id: i64,
    pub attributes: Attributes,
}

impl Model {
    pub fn reference(&self) -> DocumentRef {
        DocumentRef::new(self.type_name.clone(), self.id)
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }
}

/// Loads model attributes by id.
pub trait ModelSource: Send + Sync {
    fn find(&self, id: i64) -> Result<Option<Attributes>, ModelError>;
}

impl<F> ModelSource for F
where
    F: Fn(i64) -> Result<Option<Attributes>, ModelError> + Send + Sync,
{
    fn find(&self, id: i64) -> Result<Option<Attributes>, ModelError> {
        self(id)
    }
}

/// Loads rows from a table in the gateway database.
pub struct TableSource {
    repo: Arc<CollabRepo>,
    table: String,
}

impl TableSource {
    pub fn new(repo: Arc<CollabRepo>, table: &str) -> Result<Self, ModelError> {
        if !is_identifier(table) {
            return Err(ModelError::InvalidTable(table.to_string()));
        }
        Ok(Self {
            repo,
            table: table.to_string(),
        })
    }
}

impl ModelSource for TableSource {
    fn find(&self, id: i64) -> Result<Option<Attributes>, ModelError> {
        Ok(self.repo.load_row(&self.table, id)?)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Registration entry for one model type.
#[derive(Clone)]
pub struct ModelDescriptor {
    pub type_name: String,
    /// `Some` when the type supports collaborative editing; lists the
    /// attributes returned by the `create` event.
    pub collaborative_attributes: Option<Vec<String>>,
    /// Attributes stripped from the public representation.
    pub hidden: Vec<String>,
    /// `None` for types that cannot be looked up by id.
    pub source: Option<Arc<dyn ModelSource>>,
}

impl ModelDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            collaborative_attributes: None,
            hidden: Vec::new(),
            source: None,
        }
    }

    pub fn collaborative<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collaborative_attributes = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    pub fn hidden<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn source(mut self, source: impl ModelSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn is_collaborative(&self) -> bool {
        self.collaborative_attributes.is_some()
    }
}

impl fmt::Debug for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("type_name", &self.type_name)
            .field("collaborative_attributes", &self.collaborative_attributes)
            .field("hidden", &self.hidden)
            .field("persisted", &self.source.is_some())
            .finish()
    }
}

/// Model type declaration as read from `HOCUSPOCUS_MODELS`.
///
/// ```json
/// [
///   {"type": "App\\Models\\User", "table": "users", "hidden": ["password"]},
///   {"type": "App\\Models\\TextDocument", "table": "text_documents", "collaborative": ["title"]}
/// ]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub collaborative: Option<Vec<String>>,
    #[serde(default)]
    pub hidden: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    descriptors: HashMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry whose persisted types load from tables in `repo`.
    pub fn from_specs(specs: &[ModelSpec], repo: Arc<CollabRepo>) -> Result<Self, ModelError> {
        let mut registry = Self::new();
        for spec in specs {
            let mut descriptor = ModelDescriptor::new(&spec.type_name).hidden(spec.hidden.clone());
            descriptor.collaborative_attributes = spec.collaborative.clone();
            if let Some(table) = &spec.table {
                descriptor = descriptor.source(TableSource::new(repo.clone(), table)?);
            }
            registry.register(descriptor);
        }
        Ok(registry)
    }

    pub fn register(&mut self, descriptor: ModelDescriptor) -> &mut Self {
        self.descriptors
            .insert(descriptor.type_name.clone(), descriptor);
        self
    }

    pub fn with(mut self, descriptor: ModelDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn get(&self, type_name: &str) -> Option<&ModelDescriptor> {
        self.descriptors.get(type_name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Load any registered, persisted model.
    pub fn find(&self, type_name: &str, id: i64) -> Result<Option<Model>, ModelError> {
        let descriptor = self
            .get(type_name)
            .ok_or_else(|| ModelError::UnknownType(type_name.to_string()))?;
        load(descriptor, id)
    }

    /// Load a model that must support collaborative editing.
    pub fn find_collaborative(&self, type_name: &str, id: i64) -> Result<Option<Model>, ModelError> {
        let descriptor = self
            .get(type_name)
            .filter(|d| d.is_collaborative())
            .ok_or_else(|| ModelError::NotCollaborative(type_name.to_string()))?;
        load(descriptor, id)
    }

    /// The declared collaborative attributes of `model` mapped to their values.
    ///
    /// Attributes missing from the model are reported as `null`.
    pub fn collaborative_snapshot(&self, model: &Model) -> Attributes {
        self.get(&model.type_name)
            .and_then(|d| d.collaborative_attributes.as_ref())
            .map(|attributes| {
                attributes
                    .iter()
                    .map(|name| (name.clone(), model.get(name).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The model's attributes without the descriptor's hidden ones.
    pub fn public_representation(&self, model: &Model) -> Value {
        let hidden = self
            .get(&model.type_name)
            .map(|d| d.hidden.as_slice())
            .unwrap_or_default();
        Value::Object(
            model
                .attributes
                .iter()
                .filter(|(key, _)| !hidden.iter().any(|h| h == *key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

fn load(descriptor: &ModelDescriptor, id: i64) -> Result<Option<Model>, ModelError> {
    let source = descriptor
        .source
        .as_ref()
        .ok_or_else(|| ModelError::NotPersisted(descriptor.type_name.clone()))?;
    Ok(source.find(id)?.map(|attributes| Model {
        type_name: descriptor.type_name.clone(),
        id,
        attributes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::new()
            .with(
                ModelDescriptor::new("App\\Models\\TextDocument")
                    .collaborative(["title", "body"])
                    .source(|id: i64| -> Result<Option<Attributes>, ModelError> {
                        Ok((id == 7).then(|| attrs(json!({"id": 7, "title": "Notes"}))))
                    }),
            )
            .with(
                ModelDescriptor::new("App\\Models\\User")
                    .hidden(["password"])
                    .source(|id: i64| -> Result<Option<Attributes>, ModelError> {
                        Ok(Some(attrs(json!({"id": id, "name": "Ada", "password": "x"}))))
                    }),
            )
            .with(ModelDescriptor::new("App\\Values\\Draft").collaborative(["title"]))
    }

    #[test]
    fn test_find_collaborative() {
        let registry = registry();
        let model = registry
            .find_collaborative("App\\Models\\TextDocument", 7)
            .unwrap()
            .unwrap();
        assert_eq!(model.reference(), DocumentRef::new("App\\Models\\TextDocument", 7));
        assert!(registry
            .find_collaborative("App\\Models\\TextDocument", 8)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_non_collaborative_and_unpersisted_types() {
        let registry = registry();
        assert!(matches!(
            registry.find_collaborative("App\\Models\\User", 1),
            Err(ModelError::NotCollaborative(_))
        ));
        assert!(matches!(
            registry.find_collaborative("App\\Values\\Draft", 1),
            Err(ModelError::NotPersisted(_))
        ));
        assert!(matches!(
            registry.find("Nope", 1),
            Err(ModelError::UnknownType(_))
        ));
    }

    #[test]
    fn test_collaborative_snapshot_fills_missing_with_null() {
        let registry = registry();
        let model = registry
            .find("App\\Models\\TextDocument", 7)
            .unwrap()
            .unwrap();
        assert_eq!(
            Value::Object(registry.collaborative_snapshot(&model)),
            json!({"title": "Notes", "body": null})
        );
    }

    #[test]
    fn test_public_representation_strips_hidden() {
        let registry = registry();
        let user = registry.find("App\\Models\\User", 3).unwrap().unwrap();
        assert_eq!(
            registry.public_representation(&user),
            json!({"id": 3, "name": "Ada"})
        );
    }

    #[test]
    fn test_table_names_are_validated() {
        assert!(is_identifier("text_documents"));
        assert!(!is_identifier("users; DROP TABLE users"));
        assert!(!is_identifier("1users"));
        assert!(!is_identifier(""));
    }
}
