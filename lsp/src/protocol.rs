//! JSON-RPC envelopes and LSP message bodies exchanged with the server.

use std::path::{Path, PathBuf};

use lsp_types::{DocumentSymbolResponse, GotoDefinitionResponse, Location};
use serde::Serialize;
use serde_json::Value;

use crate::error::ResponseError;

/// JSON-RPC error code for a method the client does not implement.
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

const INTERNAL_ERROR: i64 = -32603;

/// Initial version for every opened document.
pub(crate) const INITIAL_DOCUMENT_VERSION: i32 = 1;

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Reply to a request the server sent us.
pub(crate) fn method_not_found(id: &Value, method: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

/// A frame read from the server, classified by shape.
#[derive(Debug)]
pub(crate) enum Incoming {
    Response {
        id: u64,
        outcome: Result<Value, ResponseError>,
    },
    ServerRequest {
        id: Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

pub(crate) fn parse_incoming(frame: &Value) -> Option<Incoming> {
    let id = frame.get("id");
    let method = frame.get("method").and_then(Value::as_str).map(String::from);

    match (id, method) {
        (Some(id), Some(method)) => Some(Incoming::ServerRequest {
            id: id.clone(),
            method,
        }),
        (None, Some(method)) => Some(Incoming::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        (Some(id), None) => {
            let id = id.as_u64()?;
            let outcome = match frame.get("error") {
                Some(error) => Err(serde_json::from_value(error.clone()).unwrap_or_else(|_| {
                    ResponseError {
                        code: INTERNAL_ERROR,
                        message: format!("malformed error object: {error}"),
                        data: None,
                    }
                })),
                None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
            };
            Some(Incoming::Response { id, outcome })
        }
        (None, None) => None,
    }
}

pub(crate) fn initialize_params(root_uri: &str, folder_name: &str) -> Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": {},
        "workspaceFolders": [{
            "uri": root_uri,
            "name": folder_name
        }]
    })
}

pub(crate) fn did_open_params(uri: &str, language_id: &str, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": INITIAL_DOCUMENT_VERSION,
            "text": text
        }
    })
}

pub(crate) fn text_document_params(uri: &str) -> Value {
    serde_json::json!({
        "textDocument": { "uri": uri }
    })
}

/// `line` is zero-based; `character` counts UTF-16 code units.
pub(crate) fn text_document_position_params(uri: &str, line: u32, character: u32) -> Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": { "line": line, "character": character }
    })
}

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

/// `null` means the server found no symbols.
pub(crate) fn symbols_or_empty(
    response: Option<DocumentSymbolResponse>,
) -> DocumentSymbolResponse {
    response.unwrap_or(DocumentSymbolResponse::Flat(Vec::new()))
}

/// Flatten every definition shape into plain locations.
///
/// Links resolve to their target selection range.
pub(crate) fn into_locations(response: Option<GotoDefinitionResponse>) -> Vec<Location> {
    match response {
        None => Vec::new(),
        Some(GotoDefinitionResponse::Scalar(location)) => vec![location],
        Some(GotoDefinitionResponse::Array(locations)) => locations,
        Some(GotoDefinitionResponse::Link(links)) => links
            .into_iter()
            .map(|link| Location {
                uri: link.target_uri,
                range: link.target_selection_range,
            })
            .collect(),
    }
}
