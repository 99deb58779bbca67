use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::gateway::engine::MappingEngine;
use crate::mapping::repository::MappingRepository;
use crate::protocol::{
    ProtocolRequest, ProtocolResponse, Segment, ATTR_QUERY, OP_CREATE, OP_DELETE, OP_HELLO,
    OP_LIST_OPERATIONS, OP_RETRIEVE, OP_SEARCH, OP_UPDATE, OP_VALIDATE, PROTOCOL_VERSION,
    TYPE_SERVICE_INFO,
};
use crate::telemetry::runtime_counters;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::sync::Arc;

const LOG_TARGET: &str = "turnstone::gateway::dispatcher";

const AUTH_PARSE_MESSAGE: &str = "Unable to parse authentication. Currently, only JWT-based \
     authentication via 'token' attribute is supported.";

/// Routes decoded requests to service or object operations.
///
/// Targets equal to the configured service id address the service itself;
/// every other target addresses a digital object through its mapping.
pub struct RequestDispatcher {
    config: Arc<ServiceConfig>,
    repository: MappingRepository,
    engine: MappingEngine,
}

impl RequestDispatcher {
    pub fn new(
        config: Arc<ServiceConfig>,
        repository: MappingRepository,
        engine: MappingEngine,
    ) -> Self {
        Self {
            config,
            repository,
            engine,
        }
    }

    /// Handle one request. Never fails; errors become failure responses with
    /// the matching protocol status.
    pub async fn dispatch(&self, request: ProtocolRequest) -> ProtocolResponse {
        let operation = request.operation_id.clone().unwrap_or_default();
        crate::gateway_event!(
            debug,
            LOG_TARGET,
            "request_received",
            operation = operation.as_str(),
            target_id = request.target_id,
        );

        let request_id = request.request_id.clone();
        let mut response = match self.dispatch_inner(&request).await {
            Ok(response) => response,
            Err(err) => {
                crate::gateway_event!(
                    warn,
                    LOG_TARGET,
                    "request_failed",
                    operation = operation.as_str(),
                    target_id = request.target_id,
                    status = err.protocol_status().code(),
                    error = err,
                );
                ProtocolResponse::failure(err.protocol_status(), err.to_string())
            }
        };
        response.request_id = request_id;
        runtime_counters().record_request(&operation, response.status.code());
        response
    }

    async fn dispatch_inner(&self, request: &ProtocolRequest) -> Result<ProtocolResponse> {
        let operation = request
            .operation_id
            .as_deref()
            .filter(|operation| !operation.is_empty())
            .ok_or_else(|| Error::BadRequest("Missing operationId.".to_string()))?;
        if request.target_id.is_empty() {
            return Err(Error::BadRequest("Missing targetId.".to_string()));
        }

        let token = self.authenticate(request)?;

        if request.target_id == self.config.service_id {
            self.dispatch_service(operation, request, token.as_deref())
                .await
        } else {
            self.dispatch_object(operation, request, token.as_deref())
                .await
        }
    }

    async fn dispatch_service(
        &self,
        operation: &str,
        request: &ProtocolRequest,
        token: Option<&str>,
    ) -> Result<ProtocolResponse> {
        match operation {
            OP_HELLO => self.hello(request),
            OP_LIST_OPERATIONS => self.list_service_operations(request),
            OP_CREATE => {
                let descriptor = self
                    .repository
                    .resolve(&request.target_id)
                    .ok_or_else(|| self.unsupported(operation, request))?;
                self.engine.create(&descriptor, request, token).await
            }
            OP_SEARCH => self.search(request),
            OP_VALIDATE => self.validate(request),
            _ => Err(Error::Declined("Operation not supported".to_string())),
        }
    }

    async fn dispatch_object(
        &self,
        operation: &str,
        request: &ProtocolRequest,
        token: Option<&str>,
    ) -> Result<ProtocolResponse> {
        match operation {
            OP_RETRIEVE => {
                let descriptor = self
                    .repository
                    .resolve_or_default(&request.target_id)
                    .ok_or_else(|| self.unsupported(operation, request))?;
                self.engine.retrieve(&descriptor, request, token).await
            }
            OP_UPDATE => {
                let descriptor = self
                    .repository
                    .resolve(&request.target_id)
                    .ok_or_else(|| self.unsupported(operation, request))?;
                self.engine.update(&descriptor, request, token).await
            }
            OP_DELETE => self.delete(request),
            OP_LIST_OPERATIONS => self.list_object_operations(request),
            _ => Err(self.unsupported(operation, request)),
        }
    }

    /// Credential check applied before any operation runs.
    ///
    /// When disabled no token is issued. Enabled: anonymous callers are
    /// granted the configured default token; a `{"token": ...}` credential
    /// supplies its own; any other credential shape is rejected.
    fn authenticate(&self, request: &ProtocolRequest) -> Result<Option<String>> {
        if !self.config.authentication_enabled {
            return Ok(None);
        }

        let credential = request
            .authentication
            .as_ref()
            .filter(|value| !value.is_null())
            .filter(|value| value.as_object().map(|map| !map.is_empty()).unwrap_or(true));

        let Some(credential) = credential else {
            return Ok(self.config.default_token.clone());
        };

        match credential.get("token").and_then(JsonValue::as_str) {
            Some(token) => Ok(Some(token.to_string())),
            None => Err(Error::Unauthenticated(AUTH_PARSE_MESSAGE.to_string())),
        }
    }

    fn hello(&self, request: &ProtocolRequest) -> Result<ProtocolResponse> {
        self.ensure_empty_input(request)?;

        let mut attributes = JsonMap::new();
        if let Some(name) = &self.config.service_name {
            attributes.insert("serviceName".to_string(), JsonValue::String(name.clone()));
        }
        if let Some(description) = &self.config.service_description {
            attributes.insert(
                "serviceDescription".to_string(),
                JsonValue::String(description.clone()),
            );
        }
        attributes.insert(
            "ipAddress".to_string(),
            JsonValue::String(self.config.listen_address.clone()),
        );
        attributes.insert("port".to_string(), JsonValue::from(self.config.port));
        attributes.insert("protocol".to_string(), JsonValue::String("TCP".to_string()));
        attributes.insert(
            "protocolVersion".to_string(),
            JsonValue::String(PROTOCOL_VERSION.to_string()),
        );
        if let Some(key) = &self.config.public_key {
            attributes.insert("publicKey".to_string(), JsonValue::String(key.clone()));
        }

        let mut response = ProtocolResponse::success();
        response.push_output(Segment::Json(json!({
            "id": self.config.service_id,
            "type": TYPE_SERVICE_INFO,
            "attributes": attributes,
        })));
        Ok(response)
    }

    fn list_service_operations(&self, request: &ProtocolRequest) -> Result<ProtocolResponse> {
        self.ensure_empty_input(request)?;
        let mut response = ProtocolResponse::success();
        response.push_output(Segment::Json(json!([
            OP_HELLO,
            OP_LIST_OPERATIONS,
            OP_CREATE,
            OP_SEARCH,
            OP_VALIDATE,
        ])));
        Ok(response)
    }

    fn list_object_operations(&self, request: &ProtocolRequest) -> Result<ProtocolResponse> {
        self.ensure_empty_input(request)?;
        let mut response = ProtocolResponse::success();
        response.push_output(Segment::Json(json!([
            OP_LIST_OPERATIONS,
            OP_RETRIEVE,
            OP_UPDATE,
            OP_DELETE,
        ])));
        Ok(response)
    }

    fn search(&self, request: &ProtocolRequest) -> Result<ProtocolResponse> {
        self.ensure_empty_input(request)?;
        let query = request
            .attribute_string(ATTR_QUERY)
            .ok_or_else(|| Error::BadRequest("Missing query".to_string()))?;
        tracing::debug!(
            target: LOG_TARGET,
            event = "search_requested",
            query = %query,
        );
        Ok(ProtocolResponse::success().with_message("Search is not implemented yet."))
    }

    fn validate(&self, request: &ProtocolRequest) -> Result<ProtocolResponse> {
        self.ensure_empty_input(request)?;
        Ok(ProtocolResponse::success().with_message("Validation is not implemented yet."))
    }

    fn delete(&self, request: &ProtocolRequest) -> Result<ProtocolResponse> {
        self.ensure_empty_input(request)?;
        tracing::info!(
            target: LOG_TARGET,
            event = "delete_requested",
            target_id = %request.target_id,
        );
        Ok(ProtocolResponse::success().with_message("Delete is not implemented yet."))
    }

    fn ensure_empty_input(&self, request: &ProtocolRequest) -> Result<()> {
        if request.input.is_empty() {
            Ok(())
        } else {
            Err(Error::BadRequest(
                "Input is not allowed for this operation.".to_string(),
            ))
        }
    }

    fn unsupported(&self, operation: &str, request: &ProtocolRequest) -> Error {
        Error::UnsupportedOperation {
            operation: operation.to_string(),
            target: request.target_id.clone(),
        }
    }
}
