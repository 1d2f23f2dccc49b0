//! Line-delimited JSON command/event channel over stdin/stdout.
//!
//! Grounded in the MCP stdio bridge: a dedicated reader task owns stdin
//! exclusively and a dedicated writer task owns stdout exclusively, fed by an
//! `mpsc::Sender<Value>` that every other component posts responses through.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// One inbound command line.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub command: String,
    pub id: Option<i64>,
    #[serde(flatten)]
    pub payload: Value,
}

/// One outbound response or unsolicited event line.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(kind: impl Into<String>, id: Option<i64>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            success: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(kind: impl Into<String>, id: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            success: false,
            id,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn event(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            success: true,
            id: None,
            data: Some(data),
            error: None,
        }
    }
}

/// Spawns the output writer task. Every other task posts through the
/// returned sender; `write_line` is the only code path touching stdout.
pub fn spawn_writer<W>(mut stdout: W) -> mpsc::Sender<Response>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Response>(256);
    tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let line = match serde_json::to_string(&response) {
                Ok(s) => s,
                Err(e) => {
                    error!("failed to serialize response: {e}");
                    continue;
                }
            };
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                error!("stdout writer failed, output channel closing");
                break;
            }
        }
    });
    tx
}

/// Reads commands from `stdin` and invokes `handle` for each one. Malformed
/// JSON is logged and dropped without a reply. This function owns stdin for
/// its lifetime and returns when the stream closes.
pub async fn run_reader<R, F, Fut>(stdin: R, mut handle: F)
where
    R: tokio::io::AsyncRead + Unpin,
    F: FnMut(Request) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut lines = BufReader::new(stdin).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Request>(&line) {
                    Ok(request) => handle(request).await,
                    Err(e) => {
                        warn!("dropping malformed command line: {e}");
                    }
                }
            }
            Ok(None) => {
                debug!("stdin closed, command reader stopping");
                break;
            }
            Err(e) => {
                error!("error reading stdin: {e}");
                break;
            }
        }
    }
}

pub fn pong() -> Value {
    json!({ "serverTime": chrono::Utc::now().to_rfc3339() })
}
