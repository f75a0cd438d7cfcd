//! A concrete [`LlmAdapter`] (§6.1) for the one expensive SDK instance
//! Beacon owns. Grounded on `mcp-client::transport::StdioTransport`: spawn
//! a configured child process, speak newline-delimited JSON over its
//! stdin/stdout. Unlike the MCP transport this crate drops (see
//! `DESIGN.md`), the framing technique is the only thing carried
//! forward — the message shapes are this workspace's own [`SdkMessage`]
//! rather than JSON-RPC.
//!
//! The child's protocol is two line kinds on stdout: a `SdkMessage` (any
//! of §6.1's tagged shapes), or a `can_use_tool_request` line the parent
//! answers with a `can_use_tool_response` line back on stdin — the only
//! way a permission round-trip can cross a process boundary that the SDK
//! trait itself does not define.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::Mutex as AsyncMutex;

use pylon_domain::error::{Error, Result};
use pylon_session::{CanUseToolRequest, CanUseToolResult, LlmAdapter, QueryOptions, SdkMessage};

/// Non-JSON or unparseable lines tolerated before the child is declared
/// broken, mirroring the teacher's `MAX_SKIP_LINES` guard.
const MAX_SKIP_LINES: usize = 1000;

pub struct ProcessLlmAdapter {
    command: String,
    args: Vec<String>,
}

impl ProcessLlmAdapter {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChildRequest<'a> {
    prompt: &'a str,
    cwd: &'a str,
    conversation_id: Option<u32>,
    include_partial_messages: bool,
    setting_sources: &'a [String],
    resume: &'a Option<String>,
    mcp_servers: &'a Option<std::collections::HashMap<String, Value>>,
    env: &'a Option<std::collections::HashMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChildLine {
    CanUseToolRequest {
        tool_use_id: String,
        tool_name: String,
        input: Value,
    },
    #[serde(other)]
    SdkMessage,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CanUseToolResponseLine {
    CanUseToolResponse {
        tool_use_id: String,
        behavior: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        updated_input: Option<Value>,
    },
}

#[async_trait]
impl LlmAdapter for ProcessLlmAdapter {
    async fn query(&self, options: QueryOptions) -> Result<BoxStream<'static, SdkMessage>> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(Error::Io)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::AdapterError { underlying: "failed to capture child stdin".into() })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::AdapterError { underlying: "failed to capture child stdout".into() })?;

        let request = ChildRequest {
            prompt: &options.prompt,
            cwd: &options.cwd,
            conversation_id: options.conversation_id,
            include_partial_messages: options.include_partial_messages,
            setting_sources: &options.setting_sources,
            resume: &options.resume,
            mcp_servers: &options.mcp_servers,
            env: &options.env,
        };
        let request_line = serde_json::to_string(&request).map_err(|_| Error::InvalidJson)?;

        let stdin = Arc::new(AsyncMutex::new(stdin));
        {
            let mut guard = stdin.lock().await;
            write_line(&mut guard, &request_line).await?;
        }

        let can_use_tool = options.can_use_tool.clone();
        let abort = options.abort.clone();
        let mut reader = BufReader::new(stdout);

        let stream = async_stream::stream! {
            let mut skipped = 0usize;
            loop {
                let mut line = String::new();
                let read_result = tokio::select! {
                    _ = abort.cancelled() => {
                        let _ = child.kill().await;
                        break;
                    }
                    r = reader.read_line(&mut line) => r,
                };

                let bytes_read = match read_result {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(error = %e, "process adapter stdout read failed");
                        break;
                    }
                };
                if bytes_read == 0 {
                    break; // child exited
                }

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                match serde_json::from_str::<ChildLine>(trimmed) {
                    Ok(ChildLine::CanUseToolRequest { tool_use_id, tool_name, input }) => {
                        if let Some(cb) = &can_use_tool {
                            let result = cb
                                .can_use_tool(CanUseToolRequest { tool_name, input, tool_use_id: tool_use_id.clone() })
                                .await;
                            let response = match result {
                                CanUseToolResult::Allow { updated_input } => CanUseToolResponseLine::CanUseToolResponse {
                                    tool_use_id,
                                    behavior: "allow",
                                    message: None,
                                    updated_input,
                                },
                                CanUseToolResult::Deny { message } => CanUseToolResponseLine::CanUseToolResponse {
                                    tool_use_id,
                                    behavior: "deny",
                                    message: Some(message),
                                    updated_input: None,
                                },
                            };
                            if let Ok(json) = serde_json::to_string(&response) {
                                let mut guard = stdin.lock().await;
                                if write_line(&mut guard, &json).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(ChildLine::SdkMessage) | Err(_) => {
                        match serde_json::from_str::<SdkMessage>(trimmed) {
                            Ok(message) => yield message,
                            Err(_) => {
                                skipped += 1;
                                if skipped >= MAX_SKIP_LINES {
                                    tracing::warn!("process adapter exceeded MAX_SKIP_LINES, giving up");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> Result<()> {
    stdin.write_all(line.as_bytes()).await.map_err(Error::Io)?;
    stdin.write_all(b"\n").await.map_err(Error::Io)?;
    stdin.flush().await.map_err(Error::Io)?;
    Ok(())
}

#[allow(dead_code)]
fn _assert_stdout_type(_: &ChildStdout) {}
