//! Request handler that routes wire requests to the session service.

use std::sync::Arc;

use callstate_sessions::{
    ActivateSessionsArgs, PeerHandler, PeerRequest, ReplicateSessionsArgs, SessionFilter,
    SessionService,
};
use callstate_types::CgrEvent;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::error::{ServerError, ServerResult};
use crate::wire::{Request, Response, methods};

/// Acknowledgement returned by calls with no payload.
const OK: &str = "OK";

/// Handles requests by routing them to the appropriate service operation.
///
/// Every call blocks for as long as the operation does, synchronous
/// replication included.
#[derive(Clone)]
pub struct RequestHandler {
    service: Arc<SessionService>,
}

impl RequestHandler {
    pub fn new(service: Arc<SessionService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<SessionService> {
        &self.service
    }

    /// Handles a request and returns a response.
    #[instrument(skip_all, fields(request_id = request.id, method = %request.method))]
    pub fn handle(&self, request: Request) -> Response {
        let id = request.id;
        match self.dispatch(request) {
            Ok(result) => Response::ok(id, result),
            Err(e) => {
                debug!(error = %e, "request failed");
                Response::error(id, e.code(), e.to_string())
            }
        }
    }

    fn dispatch(&self, request: Request) -> ServerResult<Value> {
        let Request { method, params, .. } = request;
        let svc = &self.service;

        match method.as_str() {
            methods::INITIATE_SESSION => {
                let event: CgrEvent = params_for(&method, params)?;
                reply(svc.initiate_session(&event)?)
            }
            methods::UPDATE_SESSION => {
                let event: CgrEvent = params_for(&method, params)?;
                reply(svc.update_session(&event)?)
            }
            methods::TERMINATE_SESSION => {
                let event: CgrEvent = params_for(&method, params)?;
                reply(svc.terminate_session(&event)?)
            }
            methods::GET_ACTIVE_SESSIONS => {
                let filter: SessionFilter = params_or_default(&method, params)?;
                reply(svc.get_active_sessions(&filter)?)
            }
            methods::GET_PASSIVE_SESSIONS => {
                let filter: SessionFilter = params_or_default(&method, params)?;
                reply(svc.get_passive_sessions(&filter)?)
            }
            methods::REPLICATE_SESSIONS => {
                let args: ReplicateSessionsArgs = params_for(&method, params)?;
                reply(svc.replicate_sessions(&args)?)
            }
            methods::ACTIVATE_SESSIONS => {
                let args: ActivateSessionsArgs = params_or_default(&method, params)?;
                reply(svc.activate_sessions(&args)?)
            }
            methods::SET_PASSIVE_SESSION
            | methods::REMOVE_PASSIVE_SESSION
            | methods::SET_PASSIVE_SESSIONS => {
                let peer: PeerRequest =
                    params_for(&method, json!({ "method": method, "params": params }))?;
                svc.handle_peer(peer)?;
                Ok(Value::String(OK.to_string()))
            }
            _ => Err(ServerError::UnknownMethod(method)),
        }
    }
}

fn params_for<T: DeserializeOwned>(method: &str, params: Value) -> ServerResult<T> {
    serde_json::from_value(params).map_err(|source| ServerError::InvalidParams {
        method: method.to_string(),
        source,
    })
}

fn params_or_default<T: DeserializeOwned + Default>(method: &str, params: Value) -> ServerResult<T> {
    if params.is_null() {
        return Ok(T::default());
    }
    params_for(method, params)
}

fn reply<T: Serialize>(value: T) -> ServerResult<Value> {
    Ok(serde_json::to_value(value)?)
}
