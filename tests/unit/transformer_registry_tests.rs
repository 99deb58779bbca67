use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use turnstone::domain::CanonicalMetadata;
use turnstone::error::{Error, Result};
use turnstone::mapping::transformer::{MetadataTransformer, TransformerRegistry};

#[test]
fn builtin_registry_knows_the_stock_transformers() {
    let registry = TransformerRegistry::builtin();
    assert!(registry.contains("schema-record"));
    assert!(registry.contains("identity"));
    assert!(!registry.contains("custom"));
}

#[test]
fn unknown_name_is_a_typed_error() {
    let registry = TransformerRegistry::builtin();
    let err = registry.resolve("absent").unwrap_err();
    match err {
        Error::TransformerNotFound(name) => assert_eq!(name, "absent"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn schema_record_maps_to_canonical_metadata() {
    let registry = TransformerRegistry::builtin();
    let transformer = registry.resolve("schema-record").expect("resolve");

    let record = json!({
        "schemaId": "schema/42",
        "type": "JSON",
        "createdAt": "2024-03-01T08:00:00Z",
        "pid": { "identifier": "schema/42", "identifierType": "Handle" }
    });
    let metadata = transformer.to_canonical(&record).expect("to canonical");

    assert_eq!(metadata.primary_identifier(), Some("schema/42"));
    assert_eq!(
        metadata.identifiers[0].identifier_type.as_deref(),
        Some("Handle")
    );
    assert_eq!(metadata.titles[0].title, "schema/42");
    assert_eq!(metadata.titles[0].title_type.as_deref(), Some("Other"));
    assert_eq!(metadata.dates[0].date, "2024-03-01T08:00:00Z");
    assert_eq!(metadata.dates[0].date_type.as_deref(), Some("Created"));
    assert_eq!(metadata.formats, vec!["JSON"]);
}

#[test]
fn schema_record_without_created_at_fills_a_timestamp() {
    let registry = TransformerRegistry::builtin();
    let transformer = registry.resolve("schema-record").expect("resolve");

    let metadata = transformer
        .to_canonical(&json!({ "schemaId": "schema/1" }))
        .expect("to canonical");
    assert_eq!(metadata.dates.len(), 1);
    assert!(!metadata.dates[0].date.is_empty());
    assert!(metadata.formats.is_empty());
}

#[test]
fn schema_record_without_schema_id_is_rejected() {
    let registry = TransformerRegistry::builtin();
    let transformer = registry.resolve("schema-record").expect("resolve");

    let err = transformer.to_canonical(&json!({ "type": "XSD" })).unwrap_err();
    assert!(err.to_string().contains("schemaId"));
}

#[test]
fn schema_record_from_canonical_uses_the_first_title() {
    let registry = TransformerRegistry::builtin();
    let transformer = registry.resolve("schema-record").expect("resolve");

    let metadata = CanonicalMetadata::default()
        .with_title("schema/7", Some("Other".to_string()))
        .with_format("JSON");
    let record = transformer.from_canonical(&metadata).expect("from canonical");

    assert_eq!(record, json!({ "schemaId": "schema/7", "type": "JSON" }));
}

#[test]
fn schema_record_from_canonical_without_title_is_a_bad_request() {
    let registry = TransformerRegistry::builtin();
    let transformer = registry.resolve("schema-record").expect("resolve");

    let err = transformer
        .from_canonical(&CanonicalMetadata::default())
        .unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));
}

#[test]
fn identity_round_trips_canonical_metadata() {
    let registry = TransformerRegistry::builtin();
    let transformer = registry.resolve("identity").expect("resolve");

    let metadata = CanonicalMetadata::default()
        .with_identifier("object/1", Some("Handle".to_string()))
        .with_title("an object", None);

    let encoded = transformer.from_canonical(&metadata).expect("encode");
    let decoded = transformer.to_canonical(&encoded).expect("decode");
    assert_eq!(decoded, metadata);
}

#[test]
fn identity_rejects_payloads_that_are_not_metadata() {
    let registry = TransformerRegistry::builtin();
    let transformer = registry.resolve("identity").expect("resolve");

    let err = transformer
        .to_canonical(&json!({ "identifiers": "not a list" }))
        .unwrap_err();
    assert!(err.to_string().contains("not canonical metadata"));
}

#[test]
fn custom_transformers_can_be_registered() {
    struct UpperCaseTransformer;

    impl MetadataTransformer for UpperCaseTransformer {
        fn name(&self) -> &str {
            "custom"
        }

        fn to_canonical(&self, payload: &JsonValue) -> Result<CanonicalMetadata> {
            let title = payload
                .get("name")
                .and_then(JsonValue::as_str)
                .unwrap_or_default();
            Ok(CanonicalMetadata::default().with_title(title.to_uppercase(), None))
        }

        fn from_canonical(&self, metadata: &CanonicalMetadata) -> Result<JsonValue> {
            Ok(json!({ "name": metadata.titles.first().map(|t| t.title.clone()) }))
        }
    }

    let mut registry = TransformerRegistry::builtin();
    registry.register(Arc::new(UpperCaseTransformer));

    let transformer = registry.resolve("custom").expect("resolve");
    let metadata = transformer
        .to_canonical(&json!({ "name": "alpha" }))
        .expect("to canonical");
    assert_eq!(metadata.titles[0].title, "ALPHA");
}
