use crate::domain::CanonicalMetadata;
use crate::error::{Error, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps between a backend's record shape and the canonical metadata schema.
///
/// Selection happens per step at execution time; different steps of one
/// operation may target different backend schemas.
pub trait MetadataTransformer: Send + Sync {
    fn name(&self) -> &str;
    fn to_canonical(&self, payload: &JsonValue) -> Result<CanonicalMetadata>;
    fn from_canonical(&self, metadata: &CanonicalMetadata) -> Result<JsonValue>;
}

impl std::fmt::Debug for dyn MetadataTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataTransformer")
            .field("name", &self.name())
            .finish()
    }
}

/// Transformers indexed by name; populated once at startup.
#[derive(Clone, Default)]
pub struct TransformerRegistry {
    by_name: HashMap<String, Arc<dyn MetadataTransformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in transformer set.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SchemaRecordTransformer));
        registry.register(Arc::new(IdentityTransformer));
        registry
    }

    pub fn register(&mut self, transformer: Arc<dyn MetadataTransformer>) {
        self.by_name
            .insert(transformer.name().to_string(), transformer);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn MetadataTransformer>> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TransformerNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }
}

/// Schema-registry records of the shape `{"schemaId", "type", "pid"?, ...}`.
pub struct SchemaRecordTransformer;

impl MetadataTransformer for SchemaRecordTransformer {
    fn name(&self) -> &str {
        "schema-record"
    }

    fn to_canonical(&self, payload: &JsonValue) -> Result<CanonicalMetadata> {
        let schema_id = payload
            .get("schemaId")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| crate::err!("schema record carries no schemaId"))?;

        let identifier_type = payload
            .get("pid")
            .and_then(|pid| pid.get("identifierType"))
            .and_then(JsonValue::as_str)
            .map(|value| value.to_string());

        let created = payload
            .get("createdAt")
            .and_then(JsonValue::as_str)
            .map(|value| value.to_string())
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

        let mut metadata = CanonicalMetadata::default()
            .with_identifier(schema_id, identifier_type)
            .with_title(schema_id, Some("Other".to_string()))
            .with_date(created, Some("Created".to_string()));

        if let Some(record_type) = payload.get("type").and_then(JsonValue::as_str) {
            metadata = metadata.with_format(record_type);
        }

        Ok(metadata)
    }

    fn from_canonical(&self, metadata: &CanonicalMetadata) -> Result<JsonValue> {
        let title = metadata
            .titles
            .first()
            .map(|entry| entry.title.as_str())
            .ok_or_else(|| {
                Error::BadRequest(
                    "metadata carries no title to derive the schema id from".to_string(),
                )
            })?;

        let mut record = JsonMap::new();
        record.insert("schemaId".to_string(), JsonValue::String(title.to_string()));
        if let Some(format) = metadata.formats.first() {
            record.insert("type".to_string(), JsonValue::String(format.clone()));
        }
        Ok(JsonValue::Object(record))
    }
}

/// Pass-through for backends that speak the canonical schema natively.
pub struct IdentityTransformer;

impl MetadataTransformer for IdentityTransformer {
    fn name(&self) -> &str {
        "identity"
    }

    fn to_canonical(&self, payload: &JsonValue) -> Result<CanonicalMetadata> {
        serde_json::from_value(payload.clone())
            .map_err(|err| crate::err!("payload is not canonical metadata: {err}"))
    }

    fn from_canonical(&self, metadata: &CanonicalMetadata) -> Result<JsonValue> {
        Ok(serde_json::to_value(metadata)?)
    }
}
