use crate::status::ProtocolStatus;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Protocol version reported by the hello operation.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Operation identifiers understood by the dispatcher.
pub const OP_HELLO: &str = "0.DOIP/Op.Hello";
pub const OP_LIST_OPERATIONS: &str = "0.DOIP/Op.ListOperations";
pub const OP_CREATE: &str = "0.DOIP/Op.Create";
pub const OP_SEARCH: &str = "0.DOIP/Op.Search";
pub const OP_VALIDATE: &str = "0.DOIP/Op.Validate";
pub const OP_RETRIEVE: &str = "0.DOIP/Op.Retrieve";
pub const OP_UPDATE: &str = "0.DOIP/Op.Update";
pub const OP_DELETE: &str = "0.DOIP/Op.Delete";

/// Reserved attribute keys on request and response envelopes.
pub const ATTR_MESSAGE: &str = "message";
pub const ATTR_ELEMENT: &str = "element";
pub const ATTR_INCLUDE_ELEMENT_DATA: &str = "includeElementData";
pub const ATTR_QUERY: &str = "query";

/// Reserved attribute keys on digital objects.
pub const ATTR_DATACITE: &str = "datacite";
pub const ATTR_HEADER: &str = "header";

/// Object type tags.
pub const TYPE_DIGITAL_OBJECT: &str = "0.TYPE/DO";
pub const TYPE_SERVICE_INFO: &str = "0.TYPE/DOIPServiceInfo";

/// Element label selected when a retrieve names no element.
pub const ELEMENT_METADATA: &str = "metadata";

/// One framed unit of a protocol message: JSON text or raw bytes.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    Json(JsonValue),
    Bytes(Bytes),
}

impl Segment {
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Segment::Json(value) => Some(value),
            Segment::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Segment::Json(_) => None,
            Segment::Bytes(bytes) => Some(bytes),
        }
    }
}

/// First JSON segment of every request message.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<JsonValue>,
}

/// Decoded request: the envelope plus every segment that followed it.
#[derive(Clone, Debug, Default)]
pub struct ProtocolRequest {
    pub request_id: Option<String>,
    pub operation_id: Option<String>,
    pub target_id: String,
    pub authentication: Option<JsonValue>,
    pub attributes: Option<JsonValue>,
    pub input: Vec<Segment>,
}

impl ProtocolRequest {
    pub fn from_envelope(envelope: RequestEnvelope, input: Vec<Segment>) -> Self {
        Self {
            request_id: envelope.request_id,
            operation_id: envelope.operation_id,
            target_id: envelope.target_id.unwrap_or_default(),
            authentication: envelope.authentication,
            attributes: envelope.attributes,
            input,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&JsonValue> {
        self.attributes.as_ref()?.get(key)
    }

    /// Attribute rendered as a string; non-string values use their JSON text.
    pub fn attribute_string(&self, key: &str) -> Option<String> {
        match self.attribute(key)? {
            JsonValue::String(value) => Some(value.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProtocolResponse {
    pub request_id: Option<String>,
    pub status: ProtocolStatus,
    pub attributes: JsonMap<String, JsonValue>,
    pub output: Vec<Segment>,
}

impl ProtocolResponse {
    pub fn success() -> Self {
        Self {
            request_id: None,
            status: ProtocolStatus::Ok,
            attributes: JsonMap::new(),
            output: Vec::new(),
        }
    }

    pub fn failure(status: ProtocolStatus, message: impl Into<String>) -> Self {
        let mut response = Self {
            request_id: None,
            status,
            attributes: JsonMap::new(),
            output: Vec::new(),
        };
        response
            .attributes
            .insert(ATTR_MESSAGE.to_string(), JsonValue::String(message.into()));
        response
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.attributes
            .insert(ATTR_MESSAGE.to_string(), JsonValue::String(message.into()));
        self
    }

    pub fn message(&self) -> Option<&str> {
        self.attributes.get(ATTR_MESSAGE)?.as_str()
    }

    pub fn push_output(&mut self, segment: Segment) {
        self.output.push(segment);
    }

    /// Envelope written as the first segment of the response message.
    pub fn envelope_json(&self) -> JsonValue {
        let mut envelope = JsonMap::new();
        if let Some(request_id) = &self.request_id {
            envelope.insert(
                "requestId".to_string(),
                JsonValue::String(request_id.clone()),
            );
        }
        envelope.insert(
            "status".to_string(),
            JsonValue::String(self.status.code().to_string()),
        );
        if !self.attributes.is_empty() {
            envelope.insert(
                "attributes".to_string(),
                JsonValue::Object(self.attributes.clone()),
            );
        }
        JsonValue::Object(envelope)
    }
}
