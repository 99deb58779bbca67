#![forbid(unsafe_code)]

use crate::error::{Context, Result};
use crate::mapping::descriptor::Verb;
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Url};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use url::form_urlencoded;
use uuid::Uuid;

/// Substitute the percent-encoded target id into a step's URL template and
/// resolve the result against the mapping's base URL.
pub fn resolve_step_url(base: &str, template: &str, target_id: &str) -> Result<Url> {
    let encoded: String = form_urlencoded::byte_serialize(target_id.as_bytes()).collect();
    let path = template.replace("{targetId}", &encoded);

    if path.starts_with("http://") || path.starts_with("https://") {
        return Url::parse(&path).map_err(|err| crate::err!("invalid request url `{path}`: {err}"));
    }

    let base_url = Url::parse(base).with_context(|| format!("invalid mapping base url `{base}`"))?;

    if path.is_empty() {
        Ok(base_url)
    } else {
        base_url
            .join(&path)
            .map_err(|err| crate::err!("failed to resolve path `{path}` against `{base}`: {err}"))
    }
}

pub struct BackendRequest<'a> {
    pub verb: Verb,
    pub url: Url,
    pub accept: Option<&'a str>,
    pub headers: &'a BTreeMap<String, String>,
    pub bearer_token: Option<&'a str>,
    pub form: Option<Form>,
}

pub fn build_backend_request(
    client: &reqwest::Client,
    request: BackendRequest<'_>,
) -> Result<RequestBuilder> {
    let method = match request.verb {
        Verb::Get => Method::GET,
        Verb::Post => Method::POST,
        Verb::Put => Method::PUT,
    };
    let mut builder = client.request(method, request.url);

    if let Some(accept) = request.accept {
        let value = HeaderValue::from_str(accept)
            .map_err(|err| crate::err!("invalid accept mimetype `{accept}`: {err}"))?;
        builder = builder.header(ACCEPT, value);
    }

    for (name, value) in request.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| crate::err!("invalid header name `{name}`: {err}"))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|err| crate::err!("invalid header value for `{name}`: {err}"))?;
        builder = builder.header(header_name, header_value);
    }

    if let Some(token) = request.bearer_token {
        builder = builder.bearer_auth(token);
    }

    if let Some(form) = request.form {
        builder = builder.multipart(form);
    }

    Ok(builder)
}

/// One part per stream, named through the step's field map, plus one JSON
/// metadata part under the step's metadata field.
pub fn build_multipart(
    metadata_field: &str,
    metadata: &JsonValue,
    streams: &BTreeMap<String, Bytes>,
    field_map: &BTreeMap<String, String>,
) -> Result<Form> {
    let mut form = Form::new();

    for (label, content) in streams {
        let field = field_map
            .get(label)
            .cloned()
            .unwrap_or_else(|| label.clone());
        let part = Part::bytes(content.to_vec())
            .file_name(format!("stream#{}", Uuid::new_v4()))
            .mime_str("application/octet-stream")?;
        form = form.part(field, part);
    }

    let payload = serde_json::to_vec(metadata)?;
    let part = Part::bytes(payload)
        .file_name(format!("metadata#{}.json", Uuid::new_v4()))
        .mime_str("application/json")?;
    form = form.part(metadata_field.to_string(), part);

    Ok(form)
}

/// Collect the named headers from a backend response; last value wins per
/// name. Values that are not valid UTF-8 ride base64 encoded.
pub fn capture_headers(names: &[String], headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut captured = BTreeMap::new();
    for name in names {
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        let mut last = None;
        for value in headers.get_all(&header_name) {
            last = Some(
                value
                    .to_str()
                    .map(|text| text.to_string())
                    .unwrap_or_else(|_| BASE64_ENGINE.encode(value.as_bytes())),
            );
        }
        if let Some(value) = last {
            captured.insert(name.clone(), value);
        }
    }
    captured
}

pub fn reason_phrase(status: u16) -> String {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .map(|reason| reason.to_string())
        .unwrap_or_else(|| format!("HTTP status {status}"))
}
