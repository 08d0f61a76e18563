use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

/// One external program invocation of a build stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    pub dir: &'a Path,
    pub environment: &'a BTreeMap<String, String>,
}

pub trait CommandRunner {
    /// Runs the invocation to completion and returns its exit code.
    fn run(&self, invocation: &Invocation<'_>) -> Result<i32, String>;
}

/// Runs commands as child processes with inherited stdio.
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation<'_>) -> Result<i32, String> {
        tracing::info!(
            command = %format!("{} {}", invocation.program, invocation.args.join(" ")),
            dir = %invocation.dir.display(),
            "running build command"
        );
        let status = Command::new(invocation.program)
            .args(invocation.args)
            .current_dir(invocation.dir)
            .envs(invocation.environment)
            .status()
            .map_err(|error| format!("failed to execute {}: {error}", invocation.program))?;

        // Terminated by a signal: no code, report a generic failure.
        Ok(status.code().unwrap_or(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_exit_code_of_failing_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = vec!["-c".to_string(), "exit 3".to_string()];
        let environment = BTreeMap::new();
        let code = ProcessRunner
            .run(&Invocation {
                program: "sh",
                args: &args,
                dir: dir.path(),
                environment: &environment,
            })
            .expect("sh should start");
        assert_eq!(code, 3);
    }

    #[test]
    fn passes_environment_to_child() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = vec![
            "-c".to_string(),
            "test \"$PULUMI_STACK\" = dev && touch seen".to_string(),
        ];
        let environment = BTreeMap::from([("PULUMI_STACK".to_string(), "dev".to_string())]);
        let code = ProcessRunner
            .run(&Invocation {
                program: "sh",
                args: &args,
                dir: dir.path(),
                environment: &environment,
            })
            .expect("sh should start");
        assert_eq!(code, 0);
        assert!(dir.path().join("seen").exists());
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let environment = BTreeMap::new();
        let error = ProcessRunner
            .run(&Invocation {
                program: "definitely-not-a-real-program-7f3a",
                args: &[],
                dir: dir.path(),
                environment: &environment,
            })
            .expect_err("spawn should fail");
        assert!(error.contains("definitely-not-a-real-program-7f3a"));
    }
}
