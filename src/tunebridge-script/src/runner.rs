//! Exec-based script runner.
//!
//! Each call starts one interpreter process, writes the script to its stdin
//! and closes it, then reads protocol lines from the interpreter's stderr.
//! Stdout is discarded.

use crate::scripts::{Dialect, Script};
use std::fmt;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tunebridge_core::{
    decode, BridgeError, BridgeResult, Close, Emitter, Handle, Record, ScriptTransportConfig,
    Sequence,
};

/// Errors starting or talking to the interpreter process.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to spawn interpreter {program}: {source}")]
    SpawnFailed {
        program: PathBuf,
        source: io::Error,
    },
    #[error("interpreter process has no {0}")]
    MissingPipe(&'static str),
    #[error("failed to write script to interpreter: {0}")]
    WriteError(io::Error),
    #[error("failed to read from interpreter: {0}")]
    ReadError(io::Error),
    #[error("failed to wait for interpreter: {0}")]
    WaitError(io::Error),
}

impl From<ScriptError> for BridgeError {
    fn from(err: ScriptError) -> Self {
        BridgeError::transport(err.to_string())
    }
}

/// Interpreter program and per-dialect arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterConfig {
    pub program: PathBuf,
    pub javascript_args: Vec<String>,
    pub applescript_args: Vec<String>,
}

impl InterpreterConfig {
    pub fn args_for(&self, dialect: Dialect) -> &[String] {
        match dialect {
            Dialect::JavaScript => &self.javascript_args,
            Dialect::AppleScript => &self.applescript_args,
        }
    }
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self::from(&ScriptTransportConfig::default())
    }
}

impl From<&ScriptTransportConfig> for InterpreterConfig {
    fn from(config: &ScriptTransportConfig) -> Self {
        Self {
            program: config.interpreter.clone(),
            javascript_args: config.javascript_args.clone(),
            applescript_args: config.applescript_args.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvocationState {
    Idle,
    ScriptSubmitted,
    Streaming,
    Done,
    Failed,
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvocationState::Idle => "idle",
            InvocationState::ScriptSubmitted => "script-submitted",
            InvocationState::Streaming => "streaming",
            InvocationState::Done => "done",
            InvocationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct Invocation {
    id: u64,
    state: InvocationState,
}

impl Invocation {
    fn new(id: u64) -> Self {
        Self {
            id,
            state: InvocationState::Idle,
        }
    }

    fn advance(&mut self, next: InvocationState) {
        tracing::trace!(invocation = self.id, from = %self.state, to = %next, "invocation state");
        self.state = next;
    }

    fn done(&mut self) {
        self.advance(InvocationState::Done);
    }

    fn fail(&mut self, err: &BridgeError) {
        tracing::debug!(invocation = self.id, from = %self.state, error = %err, "invocation failed");
        self.state = InvocationState::Failed;
    }
}

type SharedChild = Arc<Mutex<Child>>;

struct Running {
    invocation: Invocation,
    child: SharedChild,
    output: BufReader<ChildStderr>,
}

/// Runs scripts through an external interpreter, one process per call.
#[derive(Debug)]
pub struct ScriptRunner {
    config: InterpreterConfig,
    next_invocation: AtomicU64,
}

impl ScriptRunner {
    pub fn new(config: InterpreterConfig) -> Self {
        Self {
            config,
            next_invocation: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Run `script` and decode the first non-empty output line. End of output
    /// without a line yields the empty record.
    pub fn run_once(&self, script: &Script) -> BridgeResult<Record> {
        let Running {
            mut invocation,
            child,
            mut output,
        } = self.start(script)?;
        invocation.advance(InvocationState::Streaming);

        let line = match read_line(&mut output) {
            Ok(line) => line,
            Err(err) => {
                reap(&child, true);
                invocation.fail(&err);
                return Err(err);
            }
        };
        drop(output);

        let result = match line {
            Some(line) => decode(&line),
            None => match wait(&child) {
                Ok(status) if status.success() => Ok(Record::empty()),
                Ok(status) => Err(exit_error(status)),
                Err(err) => Err(err),
            },
        };
        reap(&child, false);

        match &result {
            Ok(_) => invocation.done(),
            Err(err) => invocation.fail(err),
        }
        result
    }

    /// Run `script` and stream every decoded line.
    pub fn run_streaming(&self, script: &Script, owner: &Handle) -> BridgeResult<Sequence<Record>> {
        self.stream(script, &[owner], "records", |record| Ok(Some(record)))
    }

    /// Run `script` on a worker that turns each decoded line into an item.
    /// `assemble` returning `None` skips the line. The worker holds a bracket
    /// on every handle in `owners` until the process has been reaped.
    pub fn stream<T, F>(
        &self,
        script: &Script,
        owners: &[&Handle],
        name: &str,
        mut assemble: F,
    ) -> BridgeResult<Sequence<T>>
    where
        T: Close + Send + 'static,
        F: FnMut(Record) -> BridgeResult<Option<T>> + Send + 'static,
    {
        // no process for an owner that is already closing
        let _ready = owners
            .iter()
            .map(|owner| owner.acquire())
            .collect::<BridgeResult<Vec<_>>>()?;
        let Running {
            mut invocation,
            child,
            mut output,
        } = self.start(script)?;
        let worker_child = child.clone();

        let sequence = Sequence::spawn_owned(name, owners, move |emitter| {
            invocation.advance(InvocationState::Streaming);
            let result = pump(&mut output, &worker_child, emitter, &mut assemble);
            reap(&worker_child, result.is_err() || emitter.is_cancelled());
            match &result {
                Ok(()) => invocation.done(),
                Err(err) => invocation.fail(err),
            }
            result
        });

        match sequence {
            Ok(sequence) => Ok(sequence.on_cancel(move || {
                let _ = child.lock().unwrap_or_else(PoisonError::into_inner).kill();
            })),
            Err(err) => {
                reap(&child, true);
                Err(err)
            }
        }
    }

    fn start(&self, script: &Script) -> BridgeResult<Running> {
        let mut invocation = Invocation::new(self.next_invocation.fetch_add(1, Ordering::SeqCst));
        let args = self.config.args_for(script.dialect);
        tracing::debug!(
            invocation = invocation.id,
            program = %self.config.program.display(),
            dialect = %script.dialect,
            "starting interpreter"
        );

        let mut child = Command::new(&self.config.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ScriptError::SpawnFailed {
                program: self.config.program.clone(),
                source,
            })
            .map_err(|err| fail_with(&mut invocation, err.into()))?;

        let stderr = child.stderr.take();
        let stdin = child.stdin.take();
        let child = Arc::new(Mutex::new(child));

        let (Some(stderr), Some(mut stdin)) = (stderr, stdin) else {
            reap(&child, true);
            return Err(fail_with(
                &mut invocation,
                ScriptError::MissingPipe("stdin or stderr").into(),
            ));
        };

        // An interpreter that exits before reading everything reports through
        // its output and exit status instead.
        let written = stdin
            .write_all(script.text.as_bytes())
            .and_then(|()| stdin.flush());
        drop(stdin);
        match written {
            Err(err) if err.kind() != io::ErrorKind::BrokenPipe => {
                reap(&child, true);
                return Err(fail_with(&mut invocation, ScriptError::WriteError(err).into()));
            }
            _ => {}
        }
        invocation.advance(InvocationState::ScriptSubmitted);

        Ok(Running {
            invocation,
            child,
            output: BufReader::new(stderr),
        })
    }
}

fn pump<T, F>(
    output: &mut impl BufRead,
    child: &SharedChild,
    emitter: &Emitter<T>,
    assemble: &mut F,
) -> BridgeResult<()>
where
    T: Close,
    F: FnMut(Record) -> BridgeResult<Option<T>>,
{
    while let Some(line) = read_line(output)? {
        let record = decode(&line)?;
        if let Some(item) = assemble(record)? {
            if !emitter.emit(item) {
                return Ok(());
            }
        }
    }
    if emitter.is_cancelled() {
        return Ok(());
    }
    let status = wait(child)?;
    if status.success() {
        Ok(())
    } else {
        Err(exit_error(status))
    }
}

fn fail_with(invocation: &mut Invocation, err: BridgeError) -> BridgeError {
    invocation.fail(&err);
    err
}

/// Next non-blank line without its terminator, `None` at end of output.
fn read_line(output: &mut impl BufRead) -> BridgeResult<Option<String>> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = output
            .read_until(b'\n', &mut buf)
            .map_err(ScriptError::ReadError)?;
        if read == 0 {
            return Ok(None);
        }
        let line = String::from_utf8(std::mem::take(&mut buf)).map_err(|err| {
            BridgeError::decode(format!("interpreter output is not UTF-8: {err}"))
        })?;
        let line = line.trim_end_matches(['\r', '\n']);
        if !line.is_empty() {
            return Ok(Some(line.to_string()));
        }
    }
}

fn wait(child: &SharedChild) -> BridgeResult<ExitStatus> {
    child
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .wait()
        .map_err(|err| ScriptError::WaitError(err).into())
}

fn reap(child: &SharedChild, kill: bool) {
    let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
    if kill {
        let _ = child.kill();
    }
    let _ = child.wait();
}

fn exit_error(status: ExitStatus) -> BridgeError {
    BridgeError::host(format!("interpreter exited with {status} without output"))
}
