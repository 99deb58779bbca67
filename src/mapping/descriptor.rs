use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum MappingDescriptorError {
    #[error("invalid mapping descriptor: {}", issues.join("; "))]
    Invalid { issues: Vec<String> },
    #[error("mapping descriptor is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawMappingDescriptor {
    target_id: Option<String>,
    base_url: Option<String>,
    is_default: bool,
    create: Vec<RawHttpCallSpec>,
    retrieve: Vec<RawHttpCallSpec>,
    update: Vec<RawHttpCallSpec>,
    delete: Vec<RawHttpCallSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawHttpCallSpec {
    label: Option<String>,
    verb: Option<String>,
    request_url: Option<String>,
    accept_mimetype: Option<String>,
    header_names: Vec<String>,
    body_field_map: BTreeMap<String, String>,
    metadata_body_field: Option<String>,
    response_schema_name: Option<String>,
    transformer_name: Option<String>,
}

/// Validated form of one mapping file; immutable after load.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingDescriptor {
    pub target_id: String,
    pub base_url: String,
    pub is_default: bool,
    pub create: Vec<HttpCallSpec>,
    pub retrieve: Vec<HttpCallSpec>,
    pub update: Vec<HttpCallSpec>,
    pub delete: Vec<HttpCallSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpCallSpec {
    pub label: String,
    pub verb: Verb,
    pub request_url: String,
    pub accept_mimetype: Option<String>,
    pub header_names: Vec<String>,
    pub body_field_map: BTreeMap<String, String>,
    pub metadata_body_field: String,
    pub response_schema_name: Option<String>,
    pub transformer_name: Option<String>,
}

impl HttpCallSpec {
    /// Registry key for the step's transformer; either declared name selects
    /// one, `transformerName` taking precedence.
    pub fn transformer_key(&self) -> Option<&str> {
        self.transformer_name
            .as_deref()
            .or(self.response_schema_name.as_deref())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
}

impl Verb {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Some(Verb::Get),
            "POST" => Some(Verb::Post),
            "PUT" => Some(Verb::Put),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MappingDescriptor {
    /// Parse and validate one descriptor document. Validation runs to the
    /// end; every problem found is reported in one pass.
    pub fn parse(text: &str) -> Result<Self, MappingDescriptorError> {
        let raw: RawMappingDescriptor = serde_json::from_str(text)?;
        let mut issues = Vec::new();

        let target_id = raw.target_id.unwrap_or_default();
        if target_id.is_empty() {
            issues.push("targetId is missing or empty".to_string());
        }

        let base_url = raw.base_url.unwrap_or_default();
        if base_url.is_empty() {
            issues.push("baseUrl is missing or empty".to_string());
        } else if let Err(err) = Url::parse(&base_url) {
            issues.push(format!("baseUrl `{base_url}` is not a valid URL: {err}"));
        }

        let create = validate_steps("create", raw.create, &mut issues);
        let retrieve = validate_steps("retrieve", raw.retrieve, &mut issues);
        let update = validate_steps("update", raw.update, &mut issues);
        let delete = validate_steps("delete", raw.delete, &mut issues);

        if !issues.is_empty() {
            return Err(MappingDescriptorError::Invalid { issues });
        }

        Ok(Self {
            target_id,
            base_url,
            is_default: raw.is_default,
            create,
            retrieve,
            update,
            delete,
        })
    }
}

fn validate_steps(
    operation: &str,
    raw: Vec<RawHttpCallSpec>,
    issues: &mut Vec<String>,
) -> Vec<HttpCallSpec> {
    let mut steps = Vec::with_capacity(raw.len());
    for (index, spec) in raw.into_iter().enumerate() {
        let label = spec.label.unwrap_or_default();
        if label.is_empty() {
            issues.push(format!("{operation}[{index}]: label is missing or empty"));
        }

        let verb = match spec.verb.as_deref() {
            None | Some("") => {
                issues.push(format!("{operation}[{index}]: verb is missing"));
                None
            }
            Some(value) => {
                let parsed = Verb::parse(value);
                if parsed.is_none() {
                    issues.push(format!(
                        "{operation}[{index}]: verb `{value}` is not one of GET, POST, PUT"
                    ));
                }
                parsed
            }
        };

        let request_url = spec.request_url.unwrap_or_default();
        if request_url.is_empty() {
            issues.push(format!("{operation}[{index}]: requestUrl is missing or empty"));
        }

        let Some(verb) = verb else { continue };
        if label.is_empty() || request_url.is_empty() {
            continue;
        }

        steps.push(HttpCallSpec {
            label,
            verb,
            request_url,
            accept_mimetype: spec.accept_mimetype,
            header_names: spec.header_names,
            body_field_map: spec.body_field_map,
            metadata_body_field: spec
                .metadata_body_field
                .unwrap_or_else(|| "metadata".to_string()),
            response_schema_name: spec.response_schema_name,
            transformer_name: spec.transformer_name,
        });
    }
    steps
}
