use std::fmt;
use std::io::{BufReader, Read};
use std::panic::{self, AssertUnwindSafe};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use crate::error::{Error, Result};

/// Pipeline step transitions, reported to the progress sink in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    Preparing,
    CompilingResources,
    CompilingSources,
    ConvertingBytecode,
    Packaging,
    Signing,
    Done,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Preparing => "preparing",
            Self::CompilingResources => "compiling-resources",
            Self::CompilingSources => "compiling-sources",
            Self::ConvertingBytecode => "converting-bytecode",
            Self::Packaging => "packaging",
            Self::Signing => "signing",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub step: BuildStep,
    pub message: String,
}

/// One-way progress delivery. Implementations must not block; a slow or
/// panicking sink never affects the pipeline (the context isolates calls).
pub trait ProgressSink: Send + Sync {
    fn emit(&self, step: BuildStep, message: &str);
}

#[derive(Default)]
pub struct StdoutSink;

impl ProgressSink for StdoutSink {
    fn emit(&self, step: BuildStep, message: &str) {
        println!("[{step}] {message}");
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, step: BuildStep, message: &str) {
        let _ = self.tx.send(ProgressEvent {
            step,
            message: message.to_string(),
        });
    }
}

/// Discriminated result of one external tool invocation. A non-zero exit
/// is data the stage classifies, never an `Err`.
#[derive(Debug)]
pub struct ToolOutput {
    pub ok: bool,
    /// Combined stdout and stderr, sanitized line by line.
    pub output: String,
}

/// Build-scoped execution context: cancellation flag, progress sink, and
/// the current step used to tag streamed tool output.
#[derive(Clone)]
pub struct BuildCtx {
    cancel: Arc<AtomicBool>,
    sink: Arc<dyn ProgressSink>,
    step: Arc<Mutex<BuildStep>>,
}

impl BuildCtx {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            sink,
            step: Arc::new(Mutex::new(BuildStep::Preparing)),
        }
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn enter_step(&self, step: BuildStep, message: &str) {
        if let Ok(mut s) = self.step.lock() {
            *s = step;
        }
        self.notify(step, message);
    }

    pub fn log(&self, message: &str) {
        let step = self.step.lock().map(|s| *s).unwrap_or(BuildStep::Preparing);
        self.notify(step, message);
    }

    fn notify(&self, step: BuildStep, message: &str) {
        let sink = Arc::clone(&self.sink);
        // A misbehaving sink must not take the build down with it.
        let _ = panic::catch_unwind(AssertUnwindSafe(|| sink.emit(step, message)));
    }

    /// Runs an external tool to completion, streaming sanitized output
    /// lines to the sink and returning the combined output. `Err` only for
    /// spawn/wait faults; the caller classifies those too.
    pub fn run_tool(&self, mut cmd: Command) -> Result<ToolOutput> {
        if self.cancelled() {
            return Err(Error::msg("cancelled"));
        }

        // Own process group so cancellation can kill the whole subtree.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::msg(format!("failed to spawn {:?}: {e}", cmd.get_program())))?;
        let pgid = child.id();

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_lines(out, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_lines(err, tx));
        }
        drop(tx);

        let mut combined = String::new();
        for line in rx {
            let line = sanitize_line(&line);
            if line.is_empty() {
                continue;
            }
            self.log(&line);
            combined.push_str(&line);
            combined.push('\n');
            if self.cancelled() {
                kill_pgroup(pgid, false);
                kill_pgroup(pgid, true);
                break;
            }
        }

        let status = child
            .wait()
            .map_err(|e| Error::msg(format!("wait failed: {e}")))?;
        Ok(ToolOutput {
            ok: status.success(),
            output: combined,
        })
    }
}

fn kill_pgroup(pgid: u32, force: bool) {
    #[cfg(unix)]
    {
        let sig = if force { libc::SIGKILL } else { libc::SIGTERM };
        // Negative PID targets the whole process group.
        let _ = unsafe { libc::kill(-(pgid as i32), sig) };
    }
    #[cfg(not(unix))]
    {
        let _ = (pgid, force);
    }
}

fn read_lines<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    let mut r = BufReader::new(reader);
    let mut buf = [0u8; 8192];
    let mut pending = Vec::with_capacity(256);

    loop {
        let n = match r.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        for b in &buf[..n] {
            if *b == b'\n' || *b == b'\r' {
                if !pending.is_empty() {
                    let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
                    pending.clear();
                }
            } else {
                pending.push(*b);
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
}

const MAX_LINE_CHARS: usize = 4096;

/// Strips ANSI escape sequences and control characters; tool output goes
/// to terminals and log files unfiltered otherwise.
pub fn sanitize_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LINE_CHARS));
    let mut in_escape = false;
    let mut count = 0usize;

    for c in input.chars() {
        if in_escape {
            // CSI/OSC terminators; anything alphabetic ends a CSI sequence.
            if c.is_ascii_alphabetic() || c == '\x07' || c == '\\' {
                in_escape = false;
            }
            continue;
        }
        match c {
            '\x1b' => in_escape = true,
            '\t' => {
                out.push(' ');
                count += 1;
            }
            c if c.is_control() => {}
            c => {
                out.push(c);
                count += 1;
            }
        }
        if count >= MAX_LINE_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_escapes_and_controls() {
        let got = sanitize_line("ok \u{1b}[31mred\u{1b}[0m\tdone\u{0007}");
        assert_eq!(got, "ok red done");
    }

    #[test]
    fn run_tool_reports_nonzero_exit_as_data() {
        let ctx = BuildCtx::new(Arc::new(StdoutSink));
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo oops >&2; exit 3"]);
        let out = ctx.run_tool(cmd).expect("spawn");
        assert!(!out.ok);
        assert!(out.output.contains("oops"));
    }

    #[test]
    fn run_tool_captures_combined_output() {
        let ctx = BuildCtx::new(Arc::new(StdoutSink));
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo one; echo two >&2"]);
        let out = ctx.run_tool(cmd).expect("spawn");
        assert!(out.ok);
        assert!(out.output.contains("one"));
        assert!(out.output.contains("two"));
    }

    #[test]
    fn panicking_sink_does_not_break_logging() {
        struct Bomb;
        impl ProgressSink for Bomb {
            fn emit(&self, _step: BuildStep, _message: &str) {
                panic!("sink exploded");
            }
        }
        let ctx = BuildCtx::new(Arc::new(Bomb));
        ctx.log("still alive");
        ctx.enter_step(BuildStep::Packaging, "also alive");
    }

    #[test]
    fn channel_sink_delivers_events_in_order() {
        let (tx, rx) = mpsc::channel();
        let ctx = BuildCtx::new(Arc::new(ChannelSink::new(tx)));
        ctx.enter_step(BuildStep::Packaging, "start");
        ctx.log("entry added");

        let first = rx.recv().expect("first event");
        assert_eq!(first.step, BuildStep::Packaging);
        assert_eq!(first.message, "start");
        let second = rx.recv().expect("second event");
        assert_eq!(second.step, BuildStep::Packaging);
        assert_eq!(second.message, "entry added");
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let ctx = BuildCtx::new(Arc::new(StdoutSink));
        let err = ctx
            .run_tool(Command::new("/definitely/not/a/tool"))
            .unwrap_err();
        assert!(err.to_string().contains("spawn"), "unexpected err: {err}");
    }
}
