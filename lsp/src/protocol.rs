//! JSON-RPC envelopes and LSP params used by the session.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{
    ClientIdentity, Diagnostic, DiagnosticSeverity, FileEvent, ServerInfo, TextDocumentItem,
};

/// JSON-RPC "method not found".
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
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
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Answer to a server-initiated request.
pub(crate) fn response(id: &serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub(crate) fn error_response(id: &serde_json::Value, code: i64, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

pub(crate) fn initialize_params(
    identity: &ClientIdentity,
    root_uri: Option<&Url>,
) -> serde_json::Value {
    let folders = root_uri.map(|uri| {
        serde_json::json!([{
            "uri": uri.as_str(),
            "name": uri
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|name| !name.is_empty())
                .unwrap_or("workspace")
        }])
    });

    serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": identity.name(),
            "version": env!("CARGO_PKG_VERSION")
        },
        "rootUri": root_uri.map(Url::as_str),
        "workspaceFolders": folders,
        "capabilities": {
            "workspace": {
                "didChangeWatchedFiles": { "dynamicRegistration": false },
                "configuration": true
            },
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "publishDiagnostics": {
                    "relatedInformation": false
                }
            },
            "window": {
                "workDoneProgress": true
            }
        }
    })
}

/// Pull `serverInfo` out of an `initialize` response body.
pub(crate) fn server_info(response: &serde_json::Value) -> ServerInfo {
    let info = &response["result"]["serverInfo"];
    ServerInfo {
        name: info["name"].as_str().map(String::from),
        version: info["version"].as_str().map(String::from),
    }
}

pub(crate) fn did_open_params(document: &TextDocumentItem) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": document.uri.as_str(),
            "languageId": document.language_id,
            "version": document.version,
            "text": document.text
        }
    })
}

/// Full-text sync: the whole document travels on every change.
pub(crate) fn did_change_params(uri: &Url, version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri.as_str(),
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn did_close_params(uri: &Url) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri.as_str() }
    })
}

pub(crate) fn did_change_watched_files_params(events: &[&FileEvent]) -> serde_json::Value {
    let changes: Vec<serde_json::Value> = events
        .iter()
        .map(|event| {
            serde_json::json!({
                "uri": event.uri.as_str(),
                "type": event.kind as u8
            })
        })
        .collect();
    serde_json::json!({ "changes": changes })
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<LspDiagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspDiagnostic {
    pub range: LspRange,
    pub severity: Option<u64>,
    pub source: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspRange {
    pub start: LspPosition,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspPosition {
    pub line: u32,
    pub character: u32,
}

impl LspDiagnostic {
    /// Missing severity is reported as a warning.
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(
            self.severity
                .and_then(DiagnosticSeverity::from_lsp)
                .unwrap_or(DiagnosticSeverity::Warning),
            self.message.clone(),
            self.range.start.line,
            self.range.start.character,
            self.source.clone().unwrap_or_else(|| String::from("tempo")),
        )
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageParams {
    #[serde(rename = "type")]
    pub kind: u64,
    pub message: String,
}

pub(crate) fn path_to_file_uri(path: &Path) -> Option<Url> {
    Url::from_file_path(path).ok()
}
