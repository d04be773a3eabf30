use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::tracking::Principal;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Caller identity as resolved by the host's authentication layer.
    #[serde(default)]
    pub principal: Option<Principal>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
