//! Request and response bodies of the session store HTTP API, shared by the
//! server and the client so the two cannot drift apart.

use serde::{Deserialize, Serialize};

use crate::model::Session;

/// Remote records live under `session:<id>`.
pub const SESSION_KEY_PREFIX: &str = "session:";

/// 90 days.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 7_776_000;

pub fn session_key(id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSessionResponse {
    pub success: bool,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSessionResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsByEmailResponse {
    pub sessions: Vec<Session>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailQuery {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendLinksRequest {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendLinksResponse {
    pub success: bool,
    pub session_count: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
