use std::process::Output;

use anyhow::Context;
use bstr::ByteSlice;
use serde::de::DeserializeOwned;
use tokio::process::Command;

pub fn create_command(arguments: Vec<String>) -> Command {
    let mut command = Command::new(&arguments[0]);
    command.args(&arguments[1..]);
    command
}

pub fn check_command_output(output: Output) -> anyhow::Result<Output> {
    let status = output.status;
    if !status.success() {
        return Err(anyhow::anyhow!(
            "Exit code: {}\nStderr: {}\nStdout: {}",
            status.code().unwrap_or(-1),
            output.stderr.to_str_lossy().trim(),
            output.stdout.to_str_lossy().trim()
        ));
    }
    Ok(output)
}

/// Parses a JSON array of records from command output.
///
/// HTCondor query tools print nothing at all when no record matches, so empty
/// output decodes to an empty list.
pub fn parse_json_records<T: DeserializeOwned>(stdout: &[u8]) -> anyhow::Result<Vec<T>> {
    if stdout.trim_ascii().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_slice(stdout).context("Cannot parse scheduler JSON output")
}
