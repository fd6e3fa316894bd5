//! Executor that runs an external command per claimed group.
//!
//! Configured from a TOML file:
//!
//! ```toml
//! [executor]
//! command = "hooks/apply.sh"
//! ```
//!
//! The command receives the group through environment variables and
//! succeeds when it exits 0.

use crate::error::{Error, Result};
use crate::model::{Kind, Request};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ExecOutcome, WorkExecutor};

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct ExecutorFile {
    executor: HookConfig,
}

/// Hook command and extra environment.
#[derive(Debug, Clone, Deserialize)]
pub struct HookConfig {
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl HookConfig {
    /// Load `[executor]` from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read executor config {}: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("bad executor config {}: {e}", path.display())))
    }

    fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str::<ExecutorFile>(content).map(|f| f.executor)
    }
}

/// Runs [`HookConfig::command`] once per claimed group.
#[derive(Debug, Clone)]
pub struct HookExecutor {
    config: HookConfig,
}

impl HookExecutor {
    pub fn new(config: HookConfig) -> Self {
        Self { config }
    }

    /// Resolve relative commands against the process CWD.
    fn command_path(&self) -> Result<PathBuf> {
        if self.config.command.is_relative() {
            Ok(std::env::current_dir()?.join(&self.config.command))
        } else {
            Ok(self.config.command.clone())
        }
    }

    async fn run(&self, target_id: &str, kind: Kind, requests: &[Request]) -> Result<()> {
        let command = self.command_path()?;
        let ids = requests
            .iter()
            .map(|r| r.id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let payloads = serde_json::Value::Array(requests.iter().map(|r| r.payload.clone()).collect());

        debug!(command = %command.display(), target_id, %kind, ids = %ids, "running hook");

        let status = Command::new(&command)
            .args(&self.config.args)
            .envs(&self.config.env)
            .env("CLAIMSWEEP_TARGET_ID", target_id)
            .env("CLAIMSWEEP_KIND", kind.as_str())
            .env("CLAIMSWEEP_REQUEST_IDS", &ids)
            .env("CLAIMSWEEP_PAYLOADS", payloads.to_string())
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "hook exited with status {}",
                status.code().unwrap_or(-1)
            )))
        }
    }
}

#[async_trait]
impl WorkExecutor for HookExecutor {
    async fn execute(&self, target_id: &str, kind: Kind, requests: &[Request]) -> ExecOutcome {
        let start = Instant::now();
        match self.run(target_id, kind, requests).await {
            Ok(()) => ExecOutcome::Succeeded,
            Err(e) => {
                warn!(
                    target_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    error = %e,
                    "hook failed"
                );
                ExecOutcome::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let config = HookConfig::parse("[executor]\ncommand = \"hooks/apply.sh\"\n").unwrap();
        assert_eq!(config.command, PathBuf::from("hooks/apply.sh"));
        assert!(config.args.is_empty());
        assert!(config.env.is_empty());
    }

    #[test]
    fn parses_args_and_env() {
        let config = HookConfig::parse(
            r#"
            [executor]
            command = "/usr/bin/env"
            args = ["--", "sync"]
            env = { SHEET_API = "http://localhost:9000" }
            "#,
        )
        .unwrap();
        assert_eq!(config.args, vec!["--", "sync"]);
        assert_eq!(config.env["SHEET_API"], "http://localhost:9000");
    }

    #[test]
    fn missing_command_is_rejected() {
        assert!(HookConfig::parse("[executor]\nargs = []\n").is_err());
    }

    #[test]
    fn absolute_command_is_kept() {
        let exec = HookExecutor::new(HookConfig {
            command: PathBuf::from("/bin/true"),
            args: vec![],
            env: HashMap::new(),
        });
        assert_eq!(exec.command_path().unwrap(), PathBuf::from("/bin/true"));
    }

    #[tokio::test]
    async fn exit_status_decides_outcome() {
        let ok = HookExecutor::new(HookConfig {
            command: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "test -n \"$CLAIMSWEEP_TARGET_ID\"".into()],
            env: HashMap::new(),
        });
        assert_eq!(
            ok.execute("sheet-1", Kind::Primary, &[]).await,
            ExecOutcome::Succeeded
        );

        let bad = HookExecutor::new(HookConfig {
            command: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "exit 3".into()],
            env: HashMap::new(),
        });
        match bad.execute("sheet-1", Kind::Primary, &[]).await {
            ExecOutcome::Failed { error } => assert!(error.contains("status 3"), "{error}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
