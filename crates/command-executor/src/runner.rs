//! Run a process to completion while streaming its output

use async_io::Timer;
use async_process::{Child, ChildStderr, ChildStdout, Stdio};
use futures_lite::io::{AsyncBufReadExt, BufReader, Lines};
use futures_lite::{Stream, StreamExt, future};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::event::{LogSource, OutputLine};
use crate::process::{ExitStatus, ProcessResult};

/// Options controlling a single [`run`]
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Terminate the process once it has run this long
    pub timeout: Option<Duration>,
    /// Turn a non-zero or missing exit code into [`Error::ProcessFailed`]
    pub throw_on_non_zero_exit: bool,
    /// Accumulate stdout/stderr into the returned [`ProcessResult`]
    pub capture_output: bool,
    /// How often the wait loop checks for exit, cancellation and timeout
    pub poll_interval: Duration,
    /// How long an interrupted process gets before it is killed
    pub grace_period: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            throw_on_non_zero_exit: false,
            capture_output: true,
            poll_interval: Duration::from_millis(100),
            grace_period: Duration::from_secs(5),
        }
    }
}

impl RunOptions {
    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fail the run on a non-zero exit code
    pub fn throw_on_non_zero_exit(mut self) -> Self {
        self.throw_on_non_zero_exit = true;
        self
    }

    /// Enable or disable output capture
    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Set the poll interval of the wait loop
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the grace period between interrupt and kill
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

/// Run a command until it exits, is cancelled, or times out.
///
/// `on_start` is called exactly once with the child's pid before any output is
/// delivered. Every line of stdout and stderr is passed to `on_output` as it
/// is read. On cancellation or timeout the child is terminated with
/// [`terminate_gracefully`].
pub async fn run<O, S>(
    command: &Command,
    options: &RunOptions,
    mut on_output: O,
    on_start: S,
    cancellation: &CancellationToken,
) -> Result<ProcessResult>
where
    O: FnMut(OutputLine),
    S: FnOnce(u32),
{
    let program = command.get_program().to_string_lossy().into_owned();

    let mut cmd = command.prepare();
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::launch_failed(&program, e.to_string()))?;

    let pid = child.id();
    debug!(pid, command = %command.display(), "Process started");
    on_start(pid);

    let mut output = OutputStream::new(child.stdout.take(), child.stderr.take());
    let mut captured = Captured::new(options.capture_output);
    let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
    let mut cancelled = false;
    let mut timed_out = false;

    let status = loop {
        if let Some(status) = child.try_status()? {
            break status;
        }
        if cancellation.is_cancelled() {
            debug!(pid, "Run cancelled, terminating process");
            cancelled = true;
            break terminate_gracefully(&mut child, options).await?;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!(pid, command = %command.display(), "Process timed out, terminating");
            timed_out = true;
            break terminate_gracefully(&mut child, options).await?;
        }

        if output.is_open() {
            let next = future::or(async { Some(output.next().await) }, async {
                Timer::after(options.poll_interval).await;
                None
            })
            .await;
            if let Some(Some(line)) = next {
                captured.push(&line);
                on_output(line);
            }
        } else {
            Timer::after(options.poll_interval).await;
        }
    };

    // Grandchildren may keep the pipes open after the child exits, so the
    // remaining output is only drained for a bounded window.
    future::or(
        async {
            while let Some(line) = output.next().await {
                captured.push(&line);
                on_output(line);
            }
        },
        async {
            Timer::after(options.grace_period).await;
        },
    )
    .await;

    let status = ExitStatus::from(status);
    debug!(pid, code = ?status.code, cancelled, timed_out, "Process finished");

    if options.throw_on_non_zero_exit && !cancelled && !status.success() {
        return Err(Error::process_failed(program, status.code, captured.stderr));
    }

    Ok(ProcessResult {
        stdout: captured.stdout,
        stderr: captured.stderr,
        status,
        cancelled,
        timed_out,
    })
}

/// Run a command to completion with no callbacks and no external cancellation
pub async fn execute(command: &Command, options: &RunOptions) -> Result<ProcessResult> {
    run(command, options, |_| {}, |_| {}, &CancellationToken::new()).await
}

/// Interrupt a child, give it the grace period to exit, then kill it.
///
/// Returns once the child has been reaped and its pid no longer exists.
pub async fn terminate_gracefully(
    child: &mut Child,
    options: &RunOptions,
) -> Result<std::process::ExitStatus> {
    let pid = child.id();

    #[cfg(unix)]
    crate::signal::interrupt(pid)?;
    #[cfg(not(unix))]
    child.kill()?;

    let deadline = Instant::now() + options.grace_period;
    loop {
        if let Some(status) = child.try_status()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            break;
        }
        Timer::after(options.poll_interval).await;
    }

    warn!(pid, grace_period = ?options.grace_period, "Process ignored interrupt, killing");

    #[cfg(unix)]
    crate::signal::kill(pid)?;
    #[cfg(not(unix))]
    child.kill()?;

    let status = child.status().await?;

    #[cfg(unix)]
    {
        let deadline = Instant::now() + options.grace_period;
        while crate::signal::is_process_alive(pid) && Instant::now() < deadline {
            Timer::after(options.poll_interval).await;
        }
    }

    Ok(status)
}

/// Captured output of a run
struct Captured {
    enabled: bool,
    stdout: String,
    stderr: String,
}

impl Captured {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    fn push(&mut self, line: &OutputLine) {
        if !self.enabled {
            return;
        }
        let buf = match line.source {
            LogSource::Stdout => &mut self.stdout,
            LogSource::Stderr => &mut self.stderr,
        };
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(&line.line);
    }
}

/// Merged line stream over a child's stdout and stderr
struct OutputStream {
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    stderr: Option<Lines<BufReader<ChildStderr>>>,
}

impl OutputStream {
    fn new(stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) -> Self {
        Self {
            stdout: stdout.map(|s| BufReader::new(s).lines()),
            stderr: stderr.map(|s| BufReader::new(s).lines()),
        }
    }

    fn is_open(&self) -> bool {
        self.stdout.is_some() || self.stderr.is_some()
    }
}

impl Stream for OutputStream {
    type Item = OutputLine;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(stdout) = &mut self.stdout {
            match Pin::new(stdout).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    return Poll::Ready(Some(OutputLine::new(LogSource::Stdout, line)));
                }
                // A read error or EOF both end the stream
                Poll::Ready(Some(Err(_))) | Poll::Ready(None) => self.stdout = None,
                Poll::Pending => {}
            }
        }

        if let Some(stderr) = &mut self.stderr {
            match Pin::new(stderr).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    return Poll::Ready(Some(OutputLine::new(LogSource::Stderr, line)));
                }
                Poll::Ready(Some(Err(_))) | Poll::Ready(None) => self.stderr = None,
                Poll::Pending => {}
            }
        }

        if !self.is_open() {
            return Poll::Ready(None);
        }

        Poll::Pending
    }
}
