//! Provider subprocess protocol.
//!
//! This module handles communication with external provider binaries
//! (e.g., `calbridge-provider-google`) using JSON over stdin/stdout.
//!
//! The protocol is language-agnostic: any executable that speaks the JSON
//! protocol can be a provider. Providers manage their own credentials and
//! tokens; calbridge only passes the domain's parameters from the config.

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::debug;

use crate::error::BackendError;
use crate::remote::protocol::{Command, ProviderCommand, Request, Response};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider(String);

impl Provider {
    pub fn from_name(name: &str) -> Self {
        Provider(name.to_string())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn binary_name(&self) -> String {
        format!("calbridge-provider-{}", self.0)
    }

    fn binary_path(&self) -> Result<std::path::PathBuf, BackendError> {
        let binary_name = self.binary_name();
        which::which(&binary_name).map_err(|_| {
            BackendError::fatal(format!(
                "Provider '{}' not found. Install it with:\n  cargo install {}",
                self.0, binary_name
            ))
        })
    }

    /// Call a typed provider command and return the result.
    ///
    /// The response type is inferred from the command's associated type.
    /// A provider that does not answer within the command's timeout is
    /// treated as a transient failure.
    pub async fn call<C: ProviderCommand>(&self, cmd: C) -> Result<C::Response, BackendError> {
        let limit = cmd.timeout();
        timeout(limit, self.call_raw(C::command(), cmd))
            .await
            .map_err(|_| {
                BackendError::transient(format!(
                    "Provider request timed out after {}s",
                    limit.as_secs()
                ))
            })?
    }

    /// Low-level call that sends a command with params and deserializes the response.
    async fn call_raw<P: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        command: Command,
        params: P,
    ) -> Result<R, BackendError> {
        let params = serde_json::to_value(params)
            .map_err(|e| BackendError::fatal(format!("Serialization error: {e}")))?;
        let request = Request { command, params };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| BackendError::fatal(format!("Serialization error: {e}")))?;

        let binary_path = self.binary_path()?;
        debug!(provider = %self.0, ?command, "calling provider");

        let mut child = TokioCommand::new(&binary_path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BackendError::fatal(format!("Failed to spawn {}: {}", binary_path.display(), e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::fatal("Provider stdin unavailable"))?;
        stdin
            .write_all(format!("{request_json}\n").as_bytes())
            .await
            .map_err(|e| BackendError::fatal(format!("Failed to write to provider: {e}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BackendError::fatal(format!("Failed to read from provider: {e}")))?;

        if !output.status.success() {
            return Err(BackendError::fatal(format!(
                "Provider exited with status: {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        let response_str = String::from_utf8_lossy(&output.stdout);
        parse_response(&response_str)
    }
}

/// Parse the first non-empty line a provider wrote to stdout.
pub(crate) fn parse_response<R: serde::de::DeserializeOwned>(
    output: &str,
) -> Result<R, BackendError> {
    let line = output
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| BackendError::fatal("Provider returned no response"))?;

    let response: Response<R> = serde_json::from_str(line)
        .map_err(|e| BackendError::fatal(format!("Failed to parse response: {}", e)))?;

    response.into_result()
}
