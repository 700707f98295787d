//! Ollama model backend.
//!
//! Artifacts are built, removed and listed through the `ollama` executable;
//! queries go through the local HTTP API.

use async_trait::async_trait;
use refinery_abstraction::{ArtifactSpec, BackendError, BackendResult, ModelBackend};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::config::OllamaSection;

/// `ModelBackend` backed by a local Ollama installation.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    /// Executable name or path.
    binary: String,
    /// The base URL for the Ollama API (default: "http://localhost:11434").
    base_url: String,
    build_timeout: Duration,
    request_timeout: Duration,
    /// Timeout for `rm` and `list`.
    command_timeout: Duration,
    client: Client,
}

impl OllamaBackend {
    /// Creates a backend using the default binary and server URL.
    pub fn new() -> BackendResult<Self> {
        Self::from_config(&OllamaSection::default())
    }

    /// Creates a backend from the `[ollama]` configuration section.
    ///
    /// # Errors
    /// Returns `BackendError::Request` if the HTTP client cannot be created.
    pub fn from_config(config: &OllamaSection) -> BackendResult<Self> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::Request(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            binary: config.binary.clone(),
            base_url: config.host.trim_end_matches('/').to_string(),
            build_timeout: Duration::from_secs(config.build_timeout_secs),
            request_timeout,
            command_timeout: Duration::from_secs(30),
            client,
        })
    }

    /// Set command timeout for `rm` and `list`.
    #[must_use]
    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    /// Executes the binary with a timeout. Non-zero exits are returned, not raised.
    async fn execute(&self, args: &[&str], limit: Duration) -> BackendResult<Output> {
        let command_line = format!("{} {}", self.binary, args.join(" "));
        debug!(command = %command_line, "Running backend command");

        let mut cmd = TokioCommand::new(&self.binary);
        cmd.args(args).kill_on_drop(true);

        timeout(limit, cmd.output())
            .await
            .map_err(|_| BackendError::Timeout {
                operation: command_line.clone(),
                seconds: limit.as_secs(),
            })?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    BackendError::Other(format!("Backend executable '{}' not found", self.binary))
                } else {
                    BackendError::Io(e.to_string())
                }
            })
    }

    fn failure(&self, args: &[&str], output: &Output) -> BackendError {
        BackendError::CommandFailed {
            command: format!("{} {}", self.binary, args.join(" ")),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    /// Lists the names of all artifacts the backend currently serves.
    pub async fn list(&self) -> BackendResult<Vec<String>> {
        let args = ["list"];
        let output = self.execute(&args, self.command_timeout).await?;
        if !output.status.success() {
            return Err(self.failure(&args, &output));
        }
        Ok(parse_list_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Extracts the NAME column of `ollama list` output.
fn parse_list_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| line.split_whitespace().next())
        .filter(|name| !name.eq_ignore_ascii_case("NAME"))
        .map(str::to_string)
        .collect()
}

/// Untagged names refer to the `latest` tag.
fn same_artifact(listed: &str, wanted: &str) -> bool {
    let normalize = |name: &str| {
        if name.contains(':') { name.to_string() } else { format!("{name}:latest") }
    };
    normalize(listed) == normalize(wanted)
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct ApiError {
    error: String,
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn id(&self) -> &'static str {
        "ollama"
    }

    async fn build(&self, spec: &ArtifactSpec) -> BackendResult<String> {
        let spec_path = spec.spec_path();
        if !spec_path.exists() {
            tokio::fs::create_dir_all(&spec.directory).await?;
            tokio::fs::write(&spec_path, spec.render()).await?;
        }

        let spec_arg = spec_path.to_string_lossy();
        let args = ["create", spec.name.as_str(), "-f", spec_arg.as_ref()];
        info!(name = %spec.name, base = %spec.base, "Building artifact");
        let output = self.execute(&args, self.build_timeout).await?;
        if !output.status.success() {
            let err = self.failure(&args, &output);
            error!(name = %spec.name, error = %err, "Artifact build failed");
            return Err(err);
        }
        Ok(spec.name.clone())
    }

    async fn remove(&self, name: &str) -> BackendResult<bool> {
        let args = ["rm", name];
        let output = self.execute(&args, self.command_timeout).await?;
        if output.status.success() {
            info!(name, "Removed artifact");
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_ascii_lowercase();
        if stderr.contains("not found") {
            return Ok(false);
        }
        Err(self.failure(&args, &output))
    }

    async fn query(&self, name: &str, prompt: &str) -> BackendResult<String> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest { model: name, prompt, stream: false })
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    BackendError::Request(format!(
                        "Ollama server not reachable at {}. Start it with 'ollama serve'.",
                        self.base_url
                    ))
                } else if e.is_timeout() {
                    BackendError::Timeout {
                        operation: format!("query {name}"),
                        seconds: self.request_timeout.as_secs(),
                    }
                } else {
                    BackendError::Request(format!("Network error: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ApiError>(&body).map_or(body, |e| e.error);
            return Err(BackendError::Request(format!("API error ({}): {}", status, message)));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Serialization(format!("Failed to parse response: {}", e)))?;
        Ok(parsed.response)
    }

    async fn exists(&self, name: &str) -> BackendResult<bool> {
        Ok(self.list().await?.iter().any(|listed| same_artifact(listed, name)))
    }
}
