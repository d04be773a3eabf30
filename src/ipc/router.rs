use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let span = tracing::info_span!("request", id = %req.id, method = %req.method);
    let _entered = span.enter();
    tracing::debug!(
        principal = req.principal.as_ref().map(|p| p.role()).unwrap_or("none"),
        "dispatch"
    );

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::setup::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::vehicles::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::drivers::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::routes::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::tracking::try_handle(state, &req) {
        return resp;
    }

    tracing::warn!("unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
