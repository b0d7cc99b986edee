//! Helpers for running external batch system commands (`condor_q`, `qstat`, `squeue`, ...).
use anyhow::Context;
use bstr::ByteSlice;
use std::process::Output;
use tokio::process::Command;

pub fn create_command<S: AsRef<str>>(arguments: &[S]) -> anyhow::Result<Command> {
    let (program, args) = arguments
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("Cannot run an empty command"))?;
    let mut command = Command::new(program.as_ref());
    command.args(args.iter().map(|arg| arg.as_ref()));
    // Dropping the future (e.g. on a query timeout) must not leave the process behind
    command.kill_on_drop(true);
    Ok(command)
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

/// Runs the command and returns its stdout, failing on a non-zero exit code.
pub async fn run_command<S: AsRef<str>>(arguments: &[S]) -> anyhow::Result<Vec<u8>> {
    let program = arguments
        .first()
        .map(|p| p.as_ref().to_string())
        .unwrap_or_default();
    log::debug!(
        "Running command `{}`",
        arguments
            .iter()
            .map(|arg| arg.as_ref())
            .collect::<Vec<_>>()
            .join(" ")
    );
    let output = create_command(arguments)?
        .output()
        .await
        .with_context(|| format!("{program} start failed"))?;
    let output =
        check_command_output(output).with_context(|| format!("{program} execution failed"))?;
    log::trace!(
        "{program} output\nStdout\n{}Stderr\n{}",
        output.stdout.to_str_lossy(),
        output.stderr.to_str_lossy()
    );
    Ok(output.stdout)
}
