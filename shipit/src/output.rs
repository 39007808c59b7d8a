use std::{
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
};

use crate::process;

/// Sink for log records and the output of the tools we run.
///
/// Verbose runs write straight to the terminal. Quiet runs collect everything in memory so that
/// a successful release prints nothing, while a failed one can still show the full story: the
/// caller drains the buffer with [`Output::flush_to`] before reporting the error.
#[derive(Clone)]
pub struct Output {
    verbose: bool,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Output {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            buffer: Arc::default(),
        }
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// The target for `env_logger`.
    pub fn log_target(&self) -> env_logger::Target {
        if self.verbose {
            env_logger::Target::Stderr
        } else {
            env_logger::Target::Pipe(Box::new(self.writer()))
        }
    }

    pub fn writer(&self) -> BufferWriter {
        BufferWriter(Arc::clone(&self.buffer))
    }

    pub fn append(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
    }

    /// Runs a tool whose output is only of interest to a human.
    pub fn run(&self, command: process::Command) -> process::Result<()> {
        if self.verbose {
            return command.status();
        }
        let output = command.try_output()?;
        self.append(&output.stdout);
        self.append(&output.stderr);
        output.require_success().map(drop)
    }

    /// Runs a tool whose stdout we need to parse. Its stderr is treated like [`Output::run`]
    /// treats all output.
    pub fn capture(&self, command: process::Command) -> process::Result<process::Output> {
        let output = command.try_output()?;
        self.forward_stderr(&output.stderr);
        output.require_success()
    }

    /// Like [`Output::capture`] but feeds `input` to the tool's stdin.
    pub fn capture_with_input(
        &self,
        command: process::Command,
        input: Vec<u8>,
    ) -> process::Result<process::Output> {
        let output = command.try_output_with_input(input)?;
        self.forward_stderr(&output.stderr);
        output.require_success()
    }

    fn forward_stderr(&self, stderr: &[u8]) {
        if self.verbose {
            let _ = io::stderr().write_all(stderr);
        } else {
            self.append(stderr);
        }
    }

    /// Moves everything collected so far into `writer`.
    pub fn flush_to(&self, writer: &mut impl Write) -> io::Result<()> {
        let contents =
            std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner));
        writer.write_all(&contents)?;
        writer.flush()
    }
}

pub struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
