//! Process Runner: launches the imaging tool, reads its merged output line by
//! line and scrapes progress samples from it.

use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::runtime::types::FinalStatus;

/// qemu-img's `-p` progress marker, e.g. `(42.17/100%)`.
static PROGRESS_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\((\d+(?:\.\d+)?)/100%\)").ok());

/// Extract the percentage from a progress line.
pub fn parse_progress(line: &str) -> Option<f64> {
    let re = PROGRESS_RE.as_ref()?;
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// What a tool invocation produced, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Line(String),
    Progress(f64),
}

/// Something that can run the imaging tool and hand back its output lines.
///
/// Implementations block until the process exits.
pub trait ToolRunner: Send + Sync {
    /// The executable, for display.
    fn program(&self) -> &Path;

    /// Run once with `args`, calling `on_line` for every non-blank line of
    /// merged stdout/stderr.
    fn run(&self, args: &[OsString], on_line: &mut dyn FnMut(&str)) -> FinalStatus;
}

/// Run `args` through `runner`, forwarding every line and, for lines carrying
/// a progress marker, a progress sample right after it.
pub fn run_tool(
    runner: &dyn ToolRunner,
    args: &[OsString],
    sink: &mut dyn FnMut(ToolOutput),
) -> FinalStatus {
    runner.run(args, &mut |line| {
        sink(ToolOutput::Line(line.to_string()));
        if let Some(pct) = parse_progress(line) {
            sink(ToolOutput::Progress(pct));
        }
    })
}

/// Render a command line for the log, e.g. `$ qemu-img convert -p …`.
pub fn command_line(program: &Path, args: &[OsString]) -> String {
    let mut out = format!("$ {}", program.display());
    for arg in args {
        out.push(' ');
        let arg = arg.to_string_lossy();
        if arg.contains(' ') {
            out.push('"');
            out.push_str(&arg);
            out.push('"');
        } else {
            out.push_str(&arg);
        }
    }
    out
}

/// Runs a real executable.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ToolRunner for ProcessRunner {
    fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, args: &[OsString], on_line: &mut dyn FnMut(&str)) -> FinalStatus {
        // stdout and stderr share one pipe so their interleaving is kept.
        let (reader, writer) = match io::pipe() {
            Ok(pair) => pair,
            Err(e) => {
                return FinalStatus::LaunchFailed {
                    message: format!("cannot create pipe: {e}"),
                };
            }
        };
        let writer_err = match writer.try_clone() {
            Ok(w) => w,
            Err(e) => {
                return FinalStatus::LaunchFailed {
                    message: format!("cannot create pipe: {e}"),
                };
            }
        };

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(writer_err);

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(program = %self.program.display(), "tool executable not found");
                return FinalStatus::NotFound;
            }
            Err(e) => {
                return FinalStatus::LaunchFailed {
                    message: format!("cannot start {}: {e}", self.program.display()),
                };
            }
        };
        // The command still holds the write ends; drop it so EOF arrives
        // when the child exits.
        drop(cmd);

        if let Err(e) = split_lines(reader, on_line) {
            warn!(error = %e, "error reading tool output");
        }

        match child.wait() {
            Ok(status) => {
                debug!(code = ?status.code(), "tool exited");
                FinalStatus::from_exit_code(status.code())
            }
            Err(e) => FinalStatus::LaunchFailed {
                message: format!("cannot wait for {}: {e}", self.program.display()),
            },
        }
    }
}

/// Split a byte stream on `\n` and `\r`, passing each non-blank line on.
fn split_lines<R: Read>(mut reader: R, on_line: &mut dyn FnMut(&str)) -> io::Result<()> {
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                emit_line(&mut pending, on_line);
                return Err(e);
            }
        };
        for &b in &buf[..n] {
            if b == b'\n' || b == b'\r' {
                emit_line(&mut pending, on_line);
            } else {
                pending.push(b);
            }
        }
    }
    emit_line(&mut pending, on_line);
    Ok(())
}

fn emit_line(pending: &mut Vec<u8>, on_line: &mut dyn FnMut(&str)) {
    let text = String::from_utf8_lossy(pending);
    let line = text.trim_end();
    if !line.trim().is_empty() {
        on_line(line);
    }
    pending.clear();
}
