//! Subprocess orchestration
//!
//! Provides the build engine abstraction and its Docker CLI backend.

mod docker;
mod engine;

pub use docker::DockerCli;
pub use engine::{BuildEngine, CommandOutput};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Max number of output lines shown for a failure on the terminal.
const BUILD_ERROR_TAIL_LINES: usize = 50;

/// Last `BUILD_ERROR_TAIL_LINES` lines of a failure message.
///
/// Result files keep the whole text; this is for display only.
pub(crate) fn build_error_output(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(BUILD_ERROR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Returns all collected output lines. This is a standalone async function
/// (not behind `async_trait`) to avoid lifetime issues with the `dyn Fn`
/// callback.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> Vec<String> {
    let mut stderr_reader = child.stderr.take().map(LossyLines::new);
    let mut stdout_reader = child.stdout.take().map(LossyLines::new);

    let mut all_output = Vec::new();
    let mut stderr_done = stderr_reader.is_none();
    let mut stdout_done = stdout_reader.is_none();

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = next_line(&mut stderr_reader), if !stderr_done => {
                match line {
                    Some(line) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    None => stderr_done = true,
                }
            }
            line = next_line(&mut stdout_reader), if !stdout_done => {
                match line {
                    Some(line) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    None => stdout_done = true,
                }
            }
        }
    }

    all_output
}

/// Line reader that decodes lossily, so a non-UTF-8 line never ends the stream.
///
/// Partial lines stay in `buf` across calls, which keeps `next_line` safe to
/// race in `select!`.
struct LossyLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LossyLines<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> Option<String> {
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) if self.buf.is_empty() => None,
            Ok(_) => {
                let mut bytes = std::mem::take(&mut self.buf);
                if bytes.last() == Some(&b'\n') {
                    bytes.pop();
                    if bytes.last() == Some(&b'\r') {
                        bytes.pop();
                    }
                }
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            Err(e) => {
                tracing::debug!("Output pipe closed with error: {}", e);
                None
            }
        }
    }
}

async fn next_line<R>(reader: &mut Option<LossyLines<R>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(lines) => lines.next_line().await,
        None => None,
    }
}
