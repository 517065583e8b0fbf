//! Wire protocol between the extension front end and the execution host.
//!
//! Each message is a 4-byte little-endian u32 length followed by that many
//! bytes of UTF-8 JSON. The host reads one request, writes one response, and
//! exits.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::coordinator::{Coordinator, ExecutionOutcome};
use crate::error::{PagetweakError, Result};
use crate::executor::InProcessTab;
use crate::page::{ContentSecurityPolicy, Document};
use crate::storage::SnippetStore;

/// Largest message either side may send.
pub const MAX_MESSAGE_SIZE: usize = 1_048_576;

const BLANK_PAGE: &str = "<html><head></head><body></body></html>";
const DEFAULT_HOST: &str = "localhost";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ExtensionRequest {
    /// `requestExecution`: run generated code against a page.
    ExecuteSnippet {
        snippet: String,
        /// Page HTML; a blank document when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page: Option<String>,
        /// Content-Security-Policy header value of the page
        #[serde(default, skip_serializing_if = "Option::is_none")]
        csp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
    },
    ListSnippets {
        host: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetEntry {
    pub id: String,
    pub source_text: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Page HTML after execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippets: Option<Vec<SnippetEntry>>,
}

impl ExtensionResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::from(ExecutionOutcome::failure(message))
    }
}

impl From<ExecutionOutcome> for ExtensionResponse {
    fn from(outcome: ExecutionOutcome) -> Self {
        Self {
            success: outcome.succeeded,
            error: outcome.error_message,
            html: None,
            snippets: None,
        }
    }
}

/// What a request may act on.
pub struct HostContext {
    pub coordinator: Arc<Coordinator>,
    pub storage_path: PathBuf,
}

/// Read one framed message.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<serde_json::Value> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;

    serde_json::from_slice(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Write one framed message.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> io::Result<()> {
    let payload = serde_json::to_vec(msg)?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", payload.len()),
        ));
    }
    let len = payload.len() as u32;

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()
}

/// Answer one request. Never fails: every problem becomes a failure response.
pub async fn dispatch(request: ExtensionRequest, ctx: &HostContext) -> ExtensionResponse {
    match request {
        ExtensionRequest::ExecuteSnippet {
            snippet,
            page,
            csp,
            host,
        } => {
            let document = match Document::parse(page.as_deref().unwrap_or(BLANK_PAGE)) {
                Ok(document) => document,
                Err(e) => return ExtensionResponse::failure(e.to_string()),
            };
            let document = match csp.as_deref() {
                Some(header) => document.with_csp(ContentSecurityPolicy::parse(header)),
                None => document,
            };
            let tab = Arc::new(InProcessTab::new(
                1,
                host.as_deref().unwrap_or(DEFAULT_HOST),
                document,
            ));

            let report = ctx.coordinator.execute(&snippet, tab.clone()).await;
            ctx.coordinator.settle().await;

            let mut response = ExtensionResponse::from(report.outcome);
            response.html = tab.html().ok();
            response
        }
        ExtensionRequest::ListSnippets { host } => match SnippetStore::load(&ctx.storage_path) {
            Ok(store) => {
                let snippets = store
                    .snippets(&host)
                    .into_iter()
                    .map(|s| SnippetEntry {
                        enabled: store.is_enabled(&host, &s.id),
                        id: s.id,
                        source_text: s.source_text,
                    })
                    .collect();
                ExtensionResponse {
                    snippets: Some(snippets),
                    ..ExtensionResponse::from(ExecutionOutcome::success())
                }
            }
            Err(e) => ExtensionResponse::failure(e.to_string()),
        },
    }
}

/// Serve exactly one request from `reader`, answering on `writer`.
pub async fn serve_one<R: Read, W: Write>(reader: &mut R, writer: &mut W, ctx: &HostContext) -> Result<()> {
    let msg = read_message(reader).map_err(read_failed)?;
    let response = respond(msg, ctx).await;
    write_message(writer, &response).map_err(write_failed)
}

/// Like [`serve_one`], but the blocking reads and writes run on tokio's
/// blocking pool so a silent front end never stalls a runtime worker.
pub async fn serve_one_blocking<R, W>(mut reader: R, mut writer: W, ctx: &HostContext) -> Result<()>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let msg = tokio::task::spawn_blocking(move || read_message(&mut reader))
        .await
        .map_err(|e| PagetweakError::ProtocolError(format!("Reader task failed: {}", e)))?
        .map_err(read_failed)?;

    let response = respond(msg, ctx).await;

    tokio::task::spawn_blocking(move || write_message(&mut writer, &response))
        .await
        .map_err(|e| PagetweakError::ProtocolError(format!("Writer task failed: {}", e)))?
        .map_err(write_failed)
}

/// Run as a host over stdin/stdout.
pub async fn run(ctx: &HostContext) -> Result<()> {
    serve_one_blocking(io::stdin(), io::stdout(), ctx).await
}

async fn respond(msg: serde_json::Value, ctx: &HostContext) -> ExtensionResponse {
    match serde_json::from_value::<ExtensionRequest>(msg) {
        Ok(request) => {
            tracing::debug!(?request, "Host request");
            dispatch(request, ctx).await
        }
        Err(e) => {
            tracing::warn!("Unknown request: {}", e);
            ExtensionResponse::failure(format!("Unknown request: {}", e))
        }
    }
}

fn read_failed(e: io::Error) -> PagetweakError {
    PagetweakError::ProtocolError(format!("Failed to read message: {}", e))
}

fn write_failed(e: io::Error) -> PagetweakError {
    PagetweakError::ProtocolError(format!("Failed to write message: {}", e))
}
