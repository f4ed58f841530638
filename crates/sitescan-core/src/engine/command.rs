//! Audit engine backed by an external command.
//!
//! Every audit spawns a fresh process (for example the `lighthouse` CLI) and
//! reads its JSON report from stdout. The child is spawned with
//! `kill_on_drop`, so a timed-out or cancelled audit takes its process down
//! with it.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::{AuditEngine, AuditOptions, AuditSession};
use crate::config::Device;
use crate::error::AuditError;
use crate::report::AuditReport;
use crate::route::Route;

/// How to invoke the audit command.
///
/// Arguments may contain the placeholders `{url}`, `{device}`, `{throttle}`
/// (`true`/`false`), `{throttling-method}` (`simulate` when throttling,
/// `provided` when not) and `{categories}` (comma separated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEngineConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandEngineConfig {
    /// Lighthouse CLI with headless Chrome, report on stdout.
    pub fn lighthouse() -> Self {
        Self {
            program: "lighthouse".to_string(),
            args: [
                "{url}",
                "--output=json",
                "--output-path=stdout",
                "--quiet",
                "--chrome-flags=--headless",
                "--form-factor={device}",
                "--throttling-method={throttling-method}",
                "--only-categories={categories}",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }

    fn render_args(&self, options: &AuditOptions) -> Vec<String> {
        let device = match options.device {
            Device::Mobile => "mobile",
            Device::Desktop => "desktop",
        };
        let categories = options.categories.join(",");
        let throttle = options.throttle.to_string();
        let throttling_method = if options.throttle { "simulate" } else { "provided" };
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{url}", &options.url)
                    .replace("{device}", device)
                    .replace("{throttle}", &throttle)
                    .replace("{throttling-method}", throttling_method)
                    .replace("{categories}", &categories)
            })
            .collect()
    }
}

/// Engine that runs one child process per audit.
#[derive(Debug, Clone)]
pub struct CommandAuditEngine {
    config: Arc<CommandEngineConfig>,
}

impl CommandAuditEngine {
    pub fn new(config: CommandEngineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl AuditEngine for CommandAuditEngine {
    async fn launch(&self) -> Result<Box<dyn AuditSession>, AuditError> {
        if self.config.program.trim().is_empty() {
            return Err(AuditError::internal("audit command is empty"));
        }
        Ok(Box::new(CommandSession {
            config: Arc::clone(&self.config),
        }))
    }
}

struct CommandSession {
    config: Arc<CommandEngineConfig>,
}

#[async_trait]
impl AuditSession for CommandSession {
    async fn audit(&mut self, route: &Route, options: &AuditOptions) -> Result<AuditReport, AuditError> {
        let args = self.config.render_args(options);
        tracing::debug!(path = %route.path, program = %self.config.program, ?args, "spawning audit");

        let child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AuditError::internal(format!("failed to spawn {}: {e}", self.config.program)))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AuditError::internal(format!("failed to collect audit output: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or("no diagnostics").to_string();
            return Err(match output.status.code() {
                Some(code) => AuditError::render(format!("exit code {code}: {detail}")),
                None => AuditError::internal(format!("terminated by signal: {detail}")),
            });
        }

        let document: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| AuditError::internal(format!("audit output is not JSON: {e}")))?;
        Ok(AuditReport::from_engine_output(document))
    }
}
