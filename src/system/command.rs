//! Allow-listed external command runner.
//!
//! Commands are argv lists from configuration, never passed through a shell.
//! Stdout and stderr are captured and joined for diagnostics.

use std::process::Stdio;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command is empty")]
    Empty,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {output}")]
    NonZeroExit {
        program: String,
        status: String,
        output: String,
    },
}

/// Result of a command that exited with status 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub program: String,
    /// Stdout followed by stderr, trimmed.
    pub output: String,
}

/// Run `argv[0]` with the remaining elements as arguments and wait for it.
pub async fn run_fixed(argv: &[String]) -> Result<CommandOutput, CommandError> {
    let (program, args) = argv.split_first().ok_or(CommandError::Empty)?;

    debug!(%program, ?args, "running command");
    let output = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?;

    let combined = combine(&output.stdout, &output.stderr);
    if output.status.success() {
        Ok(CommandOutput {
            program: program.clone(),
            output: combined,
        })
    } else {
        Err(CommandError::NonZeroExit {
            program: program.clone(),
            status: output.status.to_string(),
            output: combined,
        })
    }
}

fn combine(stdout: &[u8], stderr: &[u8]) -> String {
    let out = String::from_utf8_lossy(stdout);
    let err = String::from_utf8_lossy(stderr);
    match (out.trim(), err.trim()) {
        ("", e) => e.to_string(),
        (o, "") => o.to_string(),
        (o, e) => format!("{o}\n{e}"),
    }
}
