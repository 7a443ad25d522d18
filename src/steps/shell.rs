//! Shell Step
//!
//! Runs a bash command. The command is written to a temporary script
//! with `set -e`, so the first failing line fails the step.
//!
//! ```yaml
//! - id: build
//!   step_type: SHELL
//!   step_parameters:
//!     command: make -C ${setup.repo}
//!     working_dir: /srv/build
//!     env:
//!       PROFILE: release
//!     outputs: [dist/app.tar]
//! ```
//!
//! Also registered as the `SHELL` task handler, for plans that run
//! commands through the task executor instead of on a worker directly.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::{debug, error, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::model::{FailureType, StepResponse};
use crate::orchestration::processor::{parse_parameters, Executable, StartResponse, StepContext};
use crate::task::TaskHandler;

#[derive(Debug, Clone, Deserialize)]
pub struct ShellParameters {
    pub command: String,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Files whose parent directories are created before the run
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// What a finished command reports.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn to_value(&self) -> Value {
        json!({
            "exit_code": self.exit_code,
            "stdout": self.stdout.trim_end(),
        })
    }

    fn failure_message(&self) -> String {
        let last_line = self
            .stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("no stderr output");
        match self.exit_code {
            Some(code) => format!("exited with code {}: {}", code, last_line),
            None => format!("terminated by signal: {}", last_line),
        }
    }
}

/// Runs `params.command` under bash. `run_id` names the script file.
pub fn run_shell(run_id: &str, params: &ShellParameters) -> std::result::Result<ShellOutput, String> {
    ensure_output_directories(&params.outputs, params.working_dir.as_deref())
        .map_err(|e| format!("Failed to create output directories: {}", e))?;
    let script_path = create_execution_script(run_id, &params.command)
        .map_err(|e| format!("Failed to write script: {}", e))?;

    let result = execute_with_bash(&script_path, params);

    if let Err(e) = fs::remove_file(&script_path) {
        warn!("Failed to clean up script {}: {}", script_path.display(), e);
    }

    let output = result.map_err(|e| format!("Failed to launch bash: {}", e))?;
    Ok(ShellOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn ensure_output_directories(outputs: &[String], working_dir: Option<&Path>) -> std::io::Result<()> {
    for output in outputs.iter().map(|o| o.trim()).filter(|o| !o.is_empty()) {
        let output_path = match working_dir {
            Some(dir) => dir.join(output),
            None => PathBuf::from(output),
        };
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                debug!("Created directory: {}", parent.display());
            }
        }
    }
    Ok(())
}

fn create_execution_script(run_id: &str, command: &str) -> std::io::Result<PathBuf> {
    let script_dir = std::env::temp_dir().join("planrunner_scripts");
    fs::create_dir_all(&script_dir)?;

    let script_path = script_dir.join(format!("step_{}.sh", run_id));
    let mut file = File::create(&script_path)?;
    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", command)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(script_path)
}

fn execute_with_bash(script_path: &Path, params: &ShellParameters) -> std::io::Result<Output> {
    let mut cmd = Command::new("bash");
    cmd.arg(script_path);
    cmd.envs(&params.env);

    if let Some(dir) = &params.working_dir {
        cmd.current_dir(dir);
        debug!("Executing in directory: {}", dir.display());
    }

    cmd.output()
}

pub struct ShellStep;

impl Executable for ShellStep {
    fn start(&self, ctx: &StepContext) -> Result<StartResponse> {
        let params: ShellParameters = ctx.parameters_as()?;
        debug!("Step '{}' running: {}", ctx.identifier(), params.command);

        let output = match run_shell(&ctx.node_execution_id, &params) {
            Ok(output) => output,
            Err(message) => {
                return Ok(StartResponse::Completed(StepResponse::failed(
                    message,
                    FailureType::Application,
                )))
            }
        };

        if output.success() {
            debug!("Step '{}' completed successfully", ctx.identifier());
            if !output.stdout.trim().is_empty() {
                debug!("Step '{}' output:\n{}", ctx.identifier(), output.stdout);
            }
            return Ok(StartResponse::Completed(
                StepResponse::succeeded()
                    .with_outcome("exit_code", json!(0))
                    .with_outcome("stdout", Value::String(output.stdout.trim_end().to_string())),
            ));
        }

        error!(
            "Step '{}' failed with exit code: {:?}",
            ctx.identifier(),
            output.exit_code
        );
        if !output.stderr.trim().is_empty() {
            error!("stderr:\n{}", output.stderr);
        }
        Ok(StartResponse::Completed(
            StepResponse::failed(output.failure_message(), FailureType::Application)
                .with_outcome("exit_code", json!(output.exit_code)),
        ))
    }
}

/// `SHELL` task handler.
pub struct ShellTask;

impl TaskHandler for ShellTask {
    fn run(&self, parameters: &Value) -> std::result::Result<Value, String> {
        let params: ShellParameters =
            parse_parameters("SHELL task", parameters).map_err(|e| e.to_string())?;
        let run_id = crate::model::new_id();
        let output = run_shell(&run_id, &params)?;
        if output.success() {
            Ok(output.to_value())
        } else {
            Err(output.failure_message())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn params(command: &str) -> ShellParameters {
        ShellParameters {
            command: command.to_string(),
            working_dir: None,
            env: BTreeMap::new(),
            outputs: Vec::new(),
        }
    }

    #[test]
    fn test_parameters_from_json() {
        let value = json!({"command": "echo hi", "env": {"A": "1"}, "outputs": ["out/x.txt"]});
        let params: ShellParameters = parse_parameters("sh", &value).unwrap();
        assert_eq!(params.command, "echo hi");
        assert_eq!(params.env.get("A").map(String::as_str), Some("1"));
        assert!(params.working_dir.is_none());
    }

    #[test]
    fn test_missing_command_is_invalid() {
        assert!(parse_parameters::<ShellParameters>("sh", &json!({})).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_shell_success() {
        let mut p = params("echo \"hello $GREETING\"");
        p.env.insert("GREETING".to_string(), "world".to_string());
        let output = run_shell("test-success", &p).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello world");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_shell_failure_message() {
        let output = run_shell("test-failure", &params("echo broken >&2\nexit 3")).unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.failure_message(), "exited with code 3: broken");
    }

    #[cfg(unix)]
    #[test]
    fn test_output_directories_created() {
        let dir = tempdir().unwrap();
        let mut p = params("touch results/summary.txt");
        p.working_dir = Some(dir.path().to_path_buf());
        p.outputs = vec!["results/summary.txt".to_string()];

        let output = run_shell("test-outputs", &p).unwrap();
        assert!(output.success());
        assert!(dir.path().join("results/summary.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_task_handler() {
        let value = ShellTask.run(&json!({"command": "printf 42"})).unwrap();
        assert_eq!(value["exit_code"], 0);
        assert_eq!(value["stdout"], "42");
        assert!(ShellTask.run(&json!({"command": "false"})).is_err());
    }
}
