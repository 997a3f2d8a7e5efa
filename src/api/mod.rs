use crate::actions::ActionProcessor;
use crate::auth::BasicAuth;
use crate::config::ProtocolConfig;
use crate::model::{
    is_valid_index, ActionsResponse, ExchangeKv, InjectPayload, InjectResponse,
    ServerInfoResponse, StatusRequest,
};
use crate::normalizer::{self, NormalizeError};
use crate::store::ExchangeStore;
use crate::wire::{Request, Response};
use axum::http::StatusCode;
use std::fmt;
use std::sync::Arc;

const DONE_PREFIX: &str = "/api/done/";

#[derive(Debug)]
pub enum GatewayError {
    MalformedJson(String),
    InvalidIndex(i32),
    EmptyAction,
    MissingGuid,
    UnknownAction(String),
    AuthRejected,
    NotFound,
    MethodNotAllowed,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedJson(err) => write!(f, "malformed json: {err}"),
            Self::InvalidIndex(index) => write!(f, "index {index} outside 0..=999"),
            Self::EmptyAction => write!(f, "action carries no parameters"),
            Self::MissingGuid => write!(f, "guid is required"),
            Self::UnknownAction(guid) => write!(f, "unknown action {guid}"),
            Self::AuthRejected => write!(f, "authentication rejected"),
            Self::NotFound => write!(f, "not found"),
            Self::MethodNotAllowed => write!(f, "method not allowed"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<NormalizeError> for GatewayError {
    fn from(err: NormalizeError) -> Self {
        Self::MalformedJson(err.to_string())
    }
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedJson(_) | Self::InvalidIndex(_) | Self::EmptyAction | Self::MissingGuid => {
                StatusCode::BAD_REQUEST
            }
            Self::UnknownAction(_) | Self::NotFound => StatusCode::NOT_FOUND,
            Self::AuthRejected => StatusCode::UNAUTHORIZED,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    fn into_response(self) -> Response {
        match self {
            // The controller only looks at the status code here.
            Self::AuthRejected => Response::empty(StatusCode::UNAUTHORIZED),
            Self::MalformedJson(_) => Response::error(StatusCode::BAD_REQUEST, "invalid json"),
            other => Response::error(other.status(), &other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Gateway {
    store: Arc<ExchangeStore>,
    processor: ActionProcessor,
    auth: BasicAuth,
    protocol: ProtocolConfig,
}

impl Gateway {
    pub fn new(store: Arc<ExchangeStore>, auth: BasicAuth, protocol: ProtocolConfig) -> Self {
        Self {
            processor: ActionProcessor::new(store.clone()),
            store,
            auth,
            protocol,
        }
    }

    pub fn store(&self) -> &Arc<ExchangeStore> {
        &self.store
    }

    pub fn requested_indices(&self) -> &[i32] {
        &self.protocol.requested_indices
    }

    pub fn dispatch(&self, req: &Request) -> Response {
        let (client, response) = self.dispatch_for(req);
        tracing::info!(
            method = %req.method,
            path = %req.path,
            client = client.as_deref().unwrap_or("-"),
            status = response.status.as_u16(),
            "request"
        );
        response
    }

    // The resolved client id rides along for the request log.
    fn dispatch_for(&self, req: &Request) -> (Option<String>, Response) {
        let path = req.path.as_str();
        let (client, result) = if path == "/health" {
            (None, health(req))
        } else if path.starts_with("/api/") {
            match self.auth.resolve(req.header("authorization")) {
                Ok(client) => {
                    let result = self.route_api(&client, req);
                    (Some(client), result)
                }
                Err(err) => {
                    tracing::debug!(error = %err, path = %path, "auth rejected");
                    (None, Err(GatewayError::AuthRejected))
                }
            }
        } else {
            (None, Err(GatewayError::NotFound))
        };
        (client, result.unwrap_or_else(GatewayError::into_response))
    }

    // Device endpoints are matched on path alone; the firmware's verbs are not
    // trusted to be consistent.
    fn route_api(&self, client: &str, req: &Request) -> Result<Response, GatewayError> {
        match req.path.as_str() {
            "/api/serverinfos" => Ok(self.server_infos(client)),
            "/api/mystatus" => self.my_status(client, &req.body),
            "/api/myactions" => Ok(self.my_actions(client)),
            "/api/admin/inject" if req.method == "POST" => self.admin_inject(client, &req.body),
            "/api/admin/inject" => Err(GatewayError::MethodNotAllowed),
            path => match path.strip_prefix(DONE_PREFIX) {
                Some(guid) => self.done(client, guid),
                None => Err(GatewayError::NotFound),
            },
        }
    }

    pub fn server_infos(&self, client: &str) -> Response {
        self.store.set_connected(client, true);
        Response::json(
            StatusCode::OK,
            &ServerInfoResponse {
                isconnected: self.store.is_connected(client),
                infos: self.protocol.requested_indices.clone(),
                newversion: self.protocol.new_version.clone(),
            },
        )
    }

    pub fn my_status(&self, client: &str, body: &[u8]) -> Result<Response, GatewayError> {
        let status = decode_status(body)?;
        tracing::info!(
            client = %client,
            version = %status.version,
            items = status.ek.len(),
            "status update"
        );
        for kv in status.ek {
            if !is_valid_index(kv.k) {
                tracing::warn!(client = %client, index = kv.k, "skipping out-of-range index");
                continue;
            }
            self.store.set_value(client, kv.k, &kv.v);
        }
        self.store.set_connected(client, true);
        Ok(Response::empty(StatusCode::CREATED))
    }

    pub fn my_actions(&self, client: &str) -> Response {
        let response = ActionsResponse::pending(self.store.list_pending_actions(client));
        tracing::debug!(client = %client, pending = response.actions.len(), "sending actions");
        Response::json(StatusCode::OK, &response)
    }

    pub fn done(&self, client: &str, guid: &str) -> Result<Response, GatewayError> {
        let guid = guid.trim_matches('/');
        if guid.is_empty() {
            return Err(GatewayError::MissingGuid);
        }
        if !self.store.acknowledge_action(client, guid) {
            return Err(GatewayError::UnknownAction(guid.to_string()));
        }
        tracing::info!(client = %client, guid = %guid, "action acknowledged");
        Ok(Response::empty(StatusCode::CREATED))
    }

    pub fn admin_inject(&self, client: &str, body: &[u8]) -> Result<Response, GatewayError> {
        let params = decode_inject(body)?;
        let guid = self.inject(client, params)?;
        Ok(Response::json(
            StatusCode::OK,
            &InjectResponse {
                status: "ok",
                guid,
            },
        ))
    }

    pub fn inject(&self, client: &str, params: Vec<ExchangeKv>) -> Result<String, GatewayError> {
        if params.is_empty() {
            return Err(GatewayError::EmptyAction);
        }
        if self.protocol.reject_out_of_range {
            if let Some(bad) = params.iter().find(|p| !is_valid_index(p.k)) {
                return Err(GatewayError::InvalidIndex(bad.k));
            }
        }
        let guid = self.processor.add_action(client, params);
        tracing::info!(client = %client, guid = %guid, "action injected");
        Ok(guid)
    }
}

fn health(req: &Request) -> Result<Response, GatewayError> {
    if req.method != "GET" {
        return Err(GatewayError::MethodNotAllowed);
    }
    Ok(Response::json(
        StatusCode::OK,
        &serde_json::json!({ "status": "ok" }),
    ))
}

fn decode_status(body: &[u8]) -> Result<StatusRequest, GatewayError> {
    let normalized = normalizer::normalize(body)?;
    if normalized.as_slice() != body {
        tracing::debug!(
            raw = %String::from_utf8_lossy(body),
            normalized = %String::from_utf8_lossy(&normalized),
            "json normalized"
        );
    }
    serde_json::from_slice(&normalized).map_err(|err| GatewayError::MalformedJson(err.to_string()))
}

pub(crate) fn decode_inject(body: &[u8]) -> Result<Vec<ExchangeKv>, GatewayError> {
    let normalized = normalizer::normalize(body)?;
    serde_json::from_slice::<InjectPayload>(&normalized)
        .map(InjectPayload::into_params)
        .map_err(|err| GatewayError::MalformedJson(err.to_string()))
}
