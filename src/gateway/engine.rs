use crate::codec::http::{
    build_backend_request, build_multipart, capture_headers, reason_phrase, resolve_step_url,
    BackendRequest,
};
use crate::codec::payload::PayloadExtractor;
use crate::domain::{CanonicalObject, Element};
use crate::error::{Error, Result};
use crate::handle::HandleManager;
use crate::mapping::descriptor::{HttpCallSpec, MappingDescriptor, Verb};
use crate::mapping::transformer::TransformerRegistry;
use crate::protocol::{
    ProtocolRequest, ProtocolResponse, Segment, ATTR_ELEMENT, ATTR_INCLUDE_ELEMENT_DATA,
    ELEMENT_METADATA, OP_CREATE, OP_RETRIEVE, OP_UPDATE, TYPE_DIGITAL_OBJECT,
};
use crate::status::ProtocolStatus;
use crate::telemetry::runtime_counters;
use bytes::Bytes;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};

const LOG_TARGET: &str = "turnstone::gateway::engine";

/// Executes the HTTP call sequence a mapping descriptor declares for one
/// operation and folds the backend responses into a composite digital object.
pub struct MappingEngine {
    client: reqwest::Client,
    transformers: TransformerRegistry,
    handles: Arc<dyn HandleManager>,
    extractor: PayloadExtractor,
    backend_timeout: Duration,
}

impl MappingEngine {
    pub fn new(
        client: reqwest::Client,
        transformers: TransformerRegistry,
        handles: Arc<dyn HandleManager>,
        extractor: PayloadExtractor,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            client,
            transformers,
            handles,
            extractor,
            backend_timeout,
        }
    }

    /// Create a digital object through the target's create sequence and bind
    /// a fresh handle to it. The handle points at the captured `Location`
    /// header when the backend reports one.
    pub async fn create(
        &self,
        descriptor: &MappingDescriptor,
        request: &ProtocolRequest,
        token: Option<&str>,
    ) -> Result<ProtocolResponse> {
        if descriptor.create.is_empty() {
            return Err(self.unsupported(OP_CREATE, request));
        }

        let composite = self
            .run_sequence(descriptor, &descriptor.create, OP_CREATE, request, None, token)
            .await?;

        let location = composite.header_value("Location").map(str::to_string);
        let handle = self.handles.create(location.as_deref()).await?;
        tracing::info!(
            target: LOG_TARGET,
            event = "pid_bound",
            handle = %handle,
            object = %composite.id.as_deref().unwrap_or_default(),
        );

        let mut response = ProtocolResponse::success().with_message("Successfully created!");
        response.push_output(Segment::Json(serde_json::to_value(&composite)?));
        Ok(response)
    }

    /// Retrieve a digital object, one named element, or all elements with
    /// their data, depending on the request's attributes.
    pub async fn retrieve(
        &self,
        descriptor: &MappingDescriptor,
        request: &ProtocolRequest,
        token: Option<&str>,
    ) -> Result<ProtocolResponse> {
        if !request.input.is_empty() {
            return Err(Error::BadRequest(
                "Input is not allowed for retrieving a digital object!".to_string(),
            ));
        }
        if descriptor.retrieve.is_empty() {
            return Err(self.unsupported(OP_RETRIEVE, request));
        }

        let element = request.attribute_string(ATTR_ELEMENT);
        let include_data = request
            .attribute_string(ATTR_INCLUDE_ELEMENT_DATA)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let selected: Vec<HttpCallSpec> = match element.as_deref() {
            Some(label) => vec![find_step(&descriptor.retrieve, label)?],
            None if include_data => {
                // Every element once, in declaration order.
                let mut seen: Vec<&str> = Vec::new();
                let mut steps = Vec::new();
                for step in &descriptor.retrieve {
                    if !seen.contains(&step.label.as_str()) {
                        seen.push(step.label.as_str());
                        steps.push(step.clone());
                    }
                }
                steps
            }
            None => vec![find_step(&descriptor.retrieve, ELEMENT_METADATA)?],
        };

        let composite = self
            .run_sequence(
                descriptor,
                &selected,
                OP_RETRIEVE,
                request,
                Some(&request.target_id),
                token,
            )
            .await?;

        if let Some(label) = element {
            let found = composite
                .element(&label)
                .ok_or_else(|| crate::err!("element `{label}` produced no content"))?;
            let mut response = ProtocolResponse::success().with_message("Successfully submitted!");
            response.push_output(Segment::Bytes(found.content.clone()));
            return Ok(response);
        }

        let mut response = ProtocolResponse::success().with_message("Successfully submitted!");
        response.push_output(Segment::Json(serde_json::to_value(&composite)?));
        if include_data {
            for element in &composite.elements {
                response.push_output(Segment::Json(serde_json::json!({ "id": element.id })));
                response.push_output(Segment::Bytes(element.content.clone()));
            }
        }
        Ok(response)
    }

    /// Update a digital object through the target's update sequence.
    pub async fn update(
        &self,
        descriptor: &MappingDescriptor,
        request: &ProtocolRequest,
        token: Option<&str>,
    ) -> Result<ProtocolResponse> {
        if descriptor.update.is_empty() {
            return Err(self.unsupported(OP_UPDATE, request));
        }

        let composite = self
            .run_sequence(
                descriptor,
                &descriptor.update,
                OP_UPDATE,
                request,
                Some(&request.target_id),
                token,
            )
            .await?;

        let mut response = ProtocolResponse::success();
        response.push_output(Segment::Json(serde_json::to_value(&composite)?));
        Ok(response)
    }

    fn unsupported(&self, operation: &str, request: &ProtocolRequest) -> Error {
        Error::UnsupportedOperation {
            operation: operation.to_string(),
            target: request.target_id.clone(),
        }
    }

    /// Run the given steps in order against the mapping's backend. A failed
    /// step aborts the sequence; earlier calls are not rolled back.
    async fn run_sequence(
        &self,
        descriptor: &MappingDescriptor,
        steps: &[HttpCallSpec],
        operation: &str,
        request: &ProtocolRequest,
        known_id: Option<&str>,
        token: Option<&str>,
    ) -> Result<CanonicalObject> {
        let source_object = self.extractor.extract_object(&request.input)?;
        let mut metadata = match &source_object {
            Some(object) => object.metadata()?,
            None => None,
        };
        let streams = self.extractor.extract_streams(&request.input)?;

        let mut composite = CanonicalObject::default();
        if let Some(id) = known_id {
            composite.set_id_once(id);
        }

        for step in steps {
            let url = resolve_step_url(&descriptor.base_url, &step.request_url, &request.target_id)?;

            // Request headers always project from the incoming object;
            // headers captured from responses only surface on the composite.
            let mut headers = source_object
                .as_ref()
                .map(|object| object.header_projection(&step.header_names))
                .unwrap_or_default();
            if step.verb == Verb::Put {
                if let Some(etag) = headers.remove("ETag") {
                    headers.insert("If-Match".to_string(), etag);
                }
            }

            let transformer = match step.transformer_key() {
                None => None,
                Some(name) => match self.transformers.resolve(name) {
                    Ok(transformer) => Some(transformer),
                    Err(err) => {
                        runtime_counters().inc_transformer_fallback();
                        tracing::warn!(
                            target: LOG_TARGET,
                            event = "transformer_missing",
                            operation = operation,
                            step = %step.label,
                            error = %err,
                        );
                        None
                    }
                },
            };

            let form = match step.verb {
                Verb::Get => None,
                Verb::Post | Verb::Put => {
                    let Some(current) = &metadata else {
                        return Err(Error::BadRequest(
                            "request carries no metadata for a write operation".to_string(),
                        ));
                    };
                    let payload = match &transformer {
                        Some(transformer) => transformer.from_canonical(current)?,
                        None => serde_json::to_value(current)?,
                    };
                    Some(build_multipart(
                        &step.metadata_body_field,
                        &payload,
                        &streams,
                        &step.body_field_map,
                    )?)
                }
            };

            let builder = build_backend_request(
                &self.client,
                BackendRequest {
                    verb: step.verb,
                    url,
                    accept: step.accept_mimetype.as_deref(),
                    headers: &headers,
                    bearer_token: token,
                    form,
                },
            )?;

            let started = Instant::now();
            let response = match builder.timeout(self.backend_timeout).send().await {
                Ok(response) => response,
                Err(err) => {
                    runtime_counters().record_backend_call(&step.label, 0, started.elapsed());
                    return Err(crate::err!("backend call `{}` failed: {err}", step.label));
                }
            };

            let status = response.status().as_u16();
            if !response.status().is_success() {
                runtime_counters().record_backend_call(&step.label, status, started.elapsed());
                tracing::warn!(
                    target: LOG_TARGET,
                    event = "step_failed",
                    operation = operation,
                    step = %step.label,
                    status = status,
                );
                return Err(Error::BackendFailure {
                    status: ProtocolStatus::from_http(status),
                    reason: reason_phrase(status),
                });
            }

            let captured = capture_headers(&step.header_names, response.headers());
            let body = match response.bytes().await {
                Ok(body) => body,
                Err(err) => {
                    runtime_counters().record_backend_call(&step.label, status, started.elapsed());
                    return Err(crate::err!(
                        "backend call `{}` returned an unreadable body: {err}",
                        step.label
                    ));
                }
            };
            let elapsed = started.elapsed();
            runtime_counters().record_backend_call(&step.label, status, elapsed);
            tracing::debug!(
                target: LOG_TARGET,
                event = "step_completed",
                operation = operation,
                step = %step.label,
                status = status,
                duration_ms = elapsed.as_millis(),
            );

            match step.verb {
                Verb::Get => {
                    let content = match &transformer {
                        Some(transformer) => {
                            let parsed = parse_step_body(&step.label, &body)?;
                            let mapped = transformer.to_canonical(&parsed)?;
                            let encoded = Bytes::from(serde_json::to_vec(&mapped)?);
                            metadata = Some(mapped);
                            encoded
                        }
                        None => body,
                    };
                    composite.push_element(Element::new(step.label.clone(), content));
                }
                Verb::Post | Verb::Put => {
                    if let Some(transformer) = &transformer {
                        let parsed = parse_step_body(&step.label, &body)?;
                        metadata = Some(transformer.to_canonical(&parsed)?);
                    }
                }
            }

            if let Some(current) = &metadata {
                if let Some(id) = current.primary_identifier() {
                    composite.set_id_once(id);
                }
                composite.set_metadata(current)?;
            }
            composite.merge_headers(&captured);
        }

        composite.type_id = Some(TYPE_DIGITAL_OBJECT.to_string());
        Ok(composite)
    }
}

fn find_step(steps: &[HttpCallSpec], label: &str) -> Result<HttpCallSpec> {
    steps
        .iter()
        .find(|step| step.label == label)
        .cloned()
        .ok_or_else(|| Error::BadRequest(format!("unknown element `{label}`")))
}

fn parse_step_body(label: &str, body: &[u8]) -> Result<JsonValue> {
    serde_json::from_slice(body)
        .map_err(|err| crate::err!("response from step `{label}` is not valid JSON: {err}"))
}
