#![forbid(unsafe_code)]

use crate::error::{Error, Result};
use crate::protocol::{ATTR_DATACITE, ATTR_HEADER};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;

/// Composite digital object accumulated across one operation's backend calls.
///
/// Canonical metadata lives in `attributes` under the reserved `datacite` key;
/// captured backend headers under the reserved `header` key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CanonicalObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_id: Option<String>,
    #[serde(skip_serializing_if = "JsonMap::is_empty")]
    pub attributes: JsonMap<String, JsonValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<Element>,
}

impl CanonicalObject {
    /// Assign the id unless one is already set; immutable thereafter.
    pub fn set_id_once(&mut self, id: impl Into<String>) {
        if self.id.is_none() {
            self.id = Some(id.into());
        }
    }

    /// Canonical metadata parsed from the `datacite` attribute.
    /// Accepts both an embedded JSON object and a JSON-encoded string.
    pub fn metadata(&self) -> Result<Option<CanonicalMetadata>> {
        let Some(value) = self.attributes.get(ATTR_DATACITE) else {
            return Ok(None);
        };
        let parsed = match value {
            JsonValue::String(text) => serde_json::from_str(text),
            other => serde_json::from_value(other.clone()),
        };
        parsed
            .map(Some)
            .map_err(|err| Error::MalformedMessage(format!("invalid datacite attribute: {err}")))
    }

    pub fn set_metadata(&mut self, metadata: &CanonicalMetadata) -> Result<()> {
        let value = serde_json::to_value(metadata)?;
        self.attributes.insert(ATTR_DATACITE.to_string(), value);
        Ok(())
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.attributes.get(ATTR_HEADER)?.get(name)?.as_str()
    }

    /// Merge captured headers into the `header` sub-map; last value wins.
    pub fn merge_headers(&mut self, headers: &BTreeMap<String, String>) {
        if headers.is_empty() {
            return;
        }
        let entry = self
            .attributes
            .entry(ATTR_HEADER.to_string())
            .or_insert_with(|| JsonValue::Object(JsonMap::new()));
        if let JsonValue::Object(map) = entry {
            for (name, value) in headers {
                map.insert(name.clone(), JsonValue::String(value.clone()));
            }
        }
    }

    /// Values of the named headers currently present in the `header` sub-map.
    pub fn header_projection(&self, names: &[String]) -> BTreeMap<String, String> {
        let mut projection = BTreeMap::new();
        let Some(JsonValue::Object(headers)) = self.attributes.get(ATTR_HEADER) else {
            return projection;
        };
        for name in names {
            if let Some(value) = headers.get(name).and_then(JsonValue::as_str) {
                projection.insert(name.clone(), value.to_string());
            }
        }
        projection
    }

    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|element| element.id == id)
    }

    pub fn push_element(&mut self, element: Element) {
        self.elements.push(element);
    }
}

/// Named payload attached to a digital object.
/// Content travels as binary segments; only the id rides in JSON.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Element {
    pub id: String,
    pub content: Bytes,
}

impl Element {
    pub fn new(id: impl Into<String>, content: Bytes) -> Self {
        Self {
            id: id.into(),
            content,
        }
    }
}

#[derive(Deserialize, Serialize)]
struct ElementRepr {
    id: String,
}

impl Serialize for Element {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        ElementRepr {
            id: self.id.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Element {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let repr = ElementRepr::deserialize(deserializer)?;
        Ok(Element {
            id: repr.id,
            content: Bytes::new(),
        })
    }
}

/// Backend-agnostic descriptive record exchanged with transformers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CanonicalMetadata {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<Identifier>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub titles: Vec<Title>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dates: Vec<DateEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alternate_identifiers: Vec<AlternateIdentifier>,
    #[serde(flatten)]
    pub extra: JsonMap<String, JsonValue>,
}

impl CanonicalMetadata {
    pub fn primary_identifier(&self) -> Option<&str> {
        self.identifiers
            .first()
            .map(|entry| entry.identifier.as_str())
    }

    pub fn with_identifier(
        mut self,
        identifier: impl Into<String>,
        identifier_type: Option<String>,
    ) -> Self {
        self.identifiers.push(Identifier {
            identifier: identifier.into(),
            identifier_type,
        });
        self
    }

    pub fn with_title(mut self, title: impl Into<String>, title_type: Option<String>) -> Self {
        self.titles.push(Title {
            title: title.into(),
            title_type,
        });
        self
    }

    pub fn with_date(mut self, date: impl Into<String>, date_type: Option<String>) -> Self {
        self.dates.push(DateEntry {
            date: date.into(),
            date_type,
        });
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.formats.push(format.into());
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Identifier {
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Title {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DateEntry {
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AlternateIdentifier {
    pub alternate_identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternate_identifier_type: Option<String>,
}
