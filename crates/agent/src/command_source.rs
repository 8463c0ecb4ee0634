//! Line-oriented command source.
//!
//! Reads one command per line (`start 60s 30m`, `stop`, `status`, `photo`,
//! `help`), forwards it to the controller and writes the reply back. The
//! agent binary serves stdin/stdout; any async reader and writer work.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use timelapse_core::command::parse_command;

use crate::controller::ControllerHandle;

const UNKNOWN_COMMAND: &str = "Unknown command. Type `help` for the list of commands.";

/// Serve commands until the input ends or `cancel` fires.
pub async fn serve<R, W>(
    reader: R,
    mut writer: W,
    controller: ControllerHandle,
    cancel: CancellationToken,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = cancel.cancelled() => break,
        };
        let Some(line) = line else {
            tracing::debug!("Command input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match parse_command(&line) {
            Some(command) => match controller.execute(command).await {
                Ok(reply) => reply.to_string(),
                Err(e) => format!("Error: {e}"),
            },
            None => {
                tracing::debug!(input = %line.trim(), "Unrecognised command");
                UNKNOWN_COMMAND.to_string()
            }
        };

        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Serve commands from the process's stdin, replying on stdout.
pub async fn serve_stdio(controller: ControllerHandle, cancel: CancellationToken) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    if let Err(e) = serve(stdin, stdout, controller, cancel).await {
        tracing::error!(error = %e, "Command input failed");
    }
}
