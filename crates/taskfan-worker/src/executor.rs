//! Task execution via an external command.
//!
//! The worker never looks inside a task: it runs the configured command with
//! the task id appended as the last argument and judges the task by the exit
//! status alone.

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use taskfan_core::{ListId, Task};

/// Environment variable carrying the task id.
pub const TASK_ID_ENV: &str = "TASKFAN_TASK_ID";

/// Environment variable carrying the task list id.
pub const JOB_ID_ENV: &str = "TASKFAN_JOB_ID";

/// Errors that can occur while launching a task.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Executor command is empty")]
    EmptyCommand,

    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// How a launched task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    /// Non-zero exit. `exit_code` is `None` when the process was killed by a signal.
    Failed { exit_code: Option<i32> },
}

/// Runs one task to completion.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run `task`. `Err` means the task could not be started at all.
    async fn run(&self, list_id: &ListId, task: &Task) -> Result<RunOutcome, ExecutorError>;
}

/// Runs tasks as child processes sharing the worker's stdio.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
    stdout_to_stderr: bool,
}

impl ProcessRunner {
    /// Build a runner from `program arg...`.
    pub fn from_command(command: &[String]) -> Result<Self, ExecutorError> {
        let (program, args) = command.split_first().ok_or(ExecutorError::EmptyCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            stdout_to_stderr: false,
        })
    }

    /// Send task stdout to the worker's stderr, keeping stdout for JSON events.
    pub fn with_stdout_to_stderr(mut self) -> Self {
        self.stdout_to_stderr = true;
        self
    }

    fn command_for(&self, list_id: &ListId, task: &Task) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(task.id.as_str())
            .env(TASK_ID_ENV, task.id.as_str())
            .env(JOB_ID_ENV, list_id.as_str())
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit());

        if self.stdout_to_stderr {
            cmd.stdout(std::io::stderr());
        } else {
            cmd.stdout(Stdio::inherit());
        }
        cmd
    }
}

#[async_trait]
impl TaskRunner for ProcessRunner {
    async fn run(&self, list_id: &ListId, task: &Task) -> Result<RunOutcome, ExecutorError> {
        let mut cmd = self.command_for(list_id, task);
        debug!(program = %self.program, task_id = %task.id, "Launching task");

        let status = cmd.status().await.map_err(|source| ExecutorError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        info!(
            task_id = %task.id,
            exit_code = ?status.code(),
            success = status.success(),
            "Task process exited"
        );

        if status.success() {
            Ok(RunOutcome::Succeeded)
        } else {
            Ok(RunOutcome::Failed {
                exit_code: status.code(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let err = ProcessRunner::from_command(&[]).unwrap_err();
        assert!(matches!(err, ExecutorError::EmptyCommand));
    }

    #[test]
    fn test_runner_builder() {
        let runner = ProcessRunner::from_command(&command(&["npm", "run", "shard"])).unwrap();
        assert_eq!(runner.program, "npm");
        assert_eq!(runner.args, vec!["run", "shard"]);
        assert!(!runner.stdout_to_stderr);
        assert!(runner.with_stdout_to_stderr().stdout_to_stderr);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_task_id_is_passed_as_argument_and_env() {
        // `sh -c script task-id` binds the appended task id to $0.
        let runner = ProcessRunner::from_command(&command(&[
            "sh",
            "-c",
            r#"test "$0" = "$TASKFAN_TASK_ID" && test "$TASKFAN_JOB_ID" = "run-9""#,
        ]))
        .unwrap();

        let outcome = runner
            .run(&ListId::new("run-9"), &Task::new("t-1", "T"))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Succeeded);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_a_failure() {
        let runner = ProcessRunner::from_command(&command(&["sh", "-c", "exit 2"])).unwrap();
        let outcome = runner
            .run(&ListId::new("run-9"), &Task::new("t-1", "T"))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Failed { exit_code: Some(2) });
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_task_stdout_can_follow_stderr() {
        let runner = ProcessRunner::from_command(&command(&[
            "sh",
            "-c",
            "[ /proc/$$/fd/1 -ef /proc/$$/fd/2 ] && echo task output",
        ]))
        .unwrap()
        .with_stdout_to_stderr();

        let outcome = runner
            .run(&ListId::new("run-9"), &Task::new("t-1", "T"))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_missing_program_is_a_launch_error() {
        let runner =
            ProcessRunner::from_command(&command(&["/nonexistent/taskfan-test-binary"])).unwrap();
        let err = runner
            .run(&ListId::new("run-9"), &Task::new("t-1", "T"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn { .. }));
    }
}
