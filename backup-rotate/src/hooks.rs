//! User hooks run around a backup.
//!
//! Lifecycle:
//!
//! 1. `before` hooks; a failure skips the backup and counts as its failure
//! 2. the backup itself
//! 3. `after` on success, `failed` on failure
//! 4. `finally`, always
//!
//! Only `before` failures change the outcome. Failures of the later stages
//! are logged as warnings.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::HooksConfig;
use crate::utils::errors::{Result, RotateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Before,
    After,
    Failed,
    Finally,
}

impl HookStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookStage::Before => "before",
            HookStage::After => "after",
            HookStage::Failed => "failed",
            HookStage::Finally => "finally",
        }
    }
}

/// Values exported to hook commands as `BACKUP_ROTATE_*` variables.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub name: String,
    pub source: String,
    pub destination: String,
    pub periods: Vec<String>,
    pub error: Option<String>,
}

impl HookContext {
    fn env(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            ("BACKUP_ROTATE_NAME", self.name.clone()),
            ("BACKUP_ROTATE_SOURCE", self.source.clone()),
            ("BACKUP_ROTATE_DESTINATION", self.destination.clone()),
            ("BACKUP_ROTATE_PERIODS", self.periods.join(",")),
        ];
        if let Some(error) = &self.error {
            vars.push(("BACKUP_ROTATE_ERROR", error.clone()));
        }
        vars
    }
}

pub struct HookRunner<'a> {
    hooks: &'a HooksConfig,
}

impl<'a> HookRunner<'a> {
    pub fn new(hooks: &'a HooksConfig) -> Self {
        Self { hooks }
    }

    /// Commands configured for `stage`, in run order.
    pub fn commands(&self, stage: HookStage) -> &'a [String] {
        match stage {
            HookStage::Before => &self.hooks.before,
            HookStage::After => &self.hooks.after,
            HookStage::Failed => &self.hooks.failed,
            HookStage::Finally => &self.hooks.finally,
        }
    }

    /// Run every command of `stage`, stopping at the first failure.
    pub async fn run(&self, stage: HookStage, ctx: &HookContext) -> Result<()> {
        for command in self.commands(stage) {
            execute_hook_command(stage, command, ctx).await?;
        }
        Ok(())
    }

    /// Run `stage`, logging a failure instead of returning it.
    pub async fn run_logged(&self, stage: HookStage, ctx: &HookContext) {
        if let Err(e) = self.run(stage, ctx).await {
            warn!("Hook warning: {e}");
        }
    }
}

async fn execute_hook_command(stage: HookStage, command: &str, ctx: &HookContext) -> Result<()> {
    info!("Running {} hook: {command}", stage.as_str());

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .envs(ctx.env())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| RotateError::Hook(format!("failed to execute '{command}': {e}")))?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        info!("hook: {line}");
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        warn!("hook: {line}");
    }

    if !output.status.success() {
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(RotateError::Hook(format!(
            "{} hook '{command}' exited with {code}",
            stage.as_str()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx() -> HookContext {
        HookContext {
            name: "home".to_string(),
            source: "/home".to_string(),
            destination: "/backup/home".to_string(),
            periods: vec!["daily".to_string(), "weekly".to_string()],
            error: None,
        }
    }

    #[tokio::test]
    async fn test_hooks_see_context() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("env.txt");
        let hooks = HooksConfig {
            before: vec![format!(
                "echo \"$BACKUP_ROTATE_NAME $BACKUP_ROTATE_PERIODS $BACKUP_ROTATE_DESTINATION\" > {}",
                out.display()
            )],
            ..HooksConfig::default()
        };

        HookRunner::new(&hooks).run(HookStage::Before, &ctx()).await.unwrap();
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), "home daily,weekly /backup/home");
    }

    #[tokio::test]
    async fn test_error_exported_to_failed_hooks() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("error.txt");
        let hooks = HooksConfig {
            failed: vec![format!("printf '%s' \"$BACKUP_ROTATE_ERROR\" > {}", out.display())],
            ..HooksConfig::default()
        };

        let mut ctx = ctx();
        ctx.error = Some("disk full".to_string());
        HookRunner::new(&hooks).run(HookStage::Failed, &ctx).await.unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "disk full");
    }

    #[tokio::test]
    async fn test_failure_stops_stage() {
        let temp_dir = TempDir::new().unwrap();
        let marker = temp_dir.path().join("second-ran");
        let hooks = HooksConfig {
            before: vec![
                "exit 3".to_string(),
                format!("touch {}", marker.display()),
            ],
            ..HooksConfig::default()
        };

        let err = HookRunner::new(&hooks)
            .run(HookStage::Before, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, RotateError::Hook(_)));
        assert!(err.to_string().contains("exited with 3"));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_empty_stage_is_ok() {
        let hooks = HooksConfig::default();
        let runner = HookRunner::new(&hooks);
        for stage in [HookStage::Before, HookStage::After, HookStage::Failed, HookStage::Finally] {
            runner.run(stage, &ctx()).await.unwrap();
        }
    }
}
