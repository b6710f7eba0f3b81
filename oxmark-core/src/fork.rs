//! Fork-child entry point.
//!
//! A fork is a re-exec of the current binary with a hidden flag. The
//! supervisor dup2s a pipe pair onto fds 3 (commands in) and 4 (messages
//! out) before exec and names them in `OXMARK_IPC_FD`; the child wraps both
//! in the frame codec, says `Hello`, and serves commands until the command
//! pipe closes.
//!
//! SIGTERM flips the cancel flag checked between iterations, so a
//! supervisor-initiated abort lets the current iteration finish teardown
//! instead of killing mid-measurement.

use crate::registry::Catalog;
use crate::state::StateRegistry;
use crate::trial::{run_trial, TrialError, TrialOutcome};
use oxmark_ipc::{
    FailureKind, ForkCommand, ForkMessage, FrameError, FrameReader, FrameWriter, TrialSettings,
    IPC_FD_ENV, PROTOCOL_VERSION,
};
use std::fs::File;
use std::io::Write;
use std::os::fd::FromRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

static CANCEL: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigterm(_: libc::c_int) {
    CANCEL.store(true, Ordering::Release);
}

fn install_sigterm_handler() {
    // Safety: on_sigterm only touches an atomic, which is async-signal-safe.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_sigterm as usize;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
    }
}

#[derive(Debug, Error)]
enum ChildError {
    #[error("missing or malformed {IPC_FD_ENV}: {0}")]
    BadEnv(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Serve the supervisor over the inherited pipes; returns the process exit
/// code. Transport failures exit 3, everything else is reported in-band.
pub fn fork_child_main() -> i32 {
    install_sigterm_handler();
    match child_loop() {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "fork worker transport failed");
            3
        }
    }
}

fn child_loop() -> Result<(), ChildError> {
    let (command_fd, message_fd) = inherited_fds()?;
    // Safety: the supervisor placed fresh pipe ends on these fds before exec
    // and nothing else in this process owns them.
    let command_pipe = unsafe { File::from_raw_fd(command_fd) };
    let message_pipe = unsafe { File::from_raw_fd(message_fd) };
    let mut commands = FrameReader::new(command_pipe);
    let mut messages = FrameWriter::new(message_pipe);

    messages.write(&ForkMessage::Hello {
        protocol_version: PROTOCOL_VERSION,
        pid: std::process::id(),
    })?;

    loop {
        let command: ForkCommand = match commands.read() {
            Ok(command) => command,
            Err(FrameError::EndOfStream) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match command {
            ForkCommand::Ping => messages.write(&ForkMessage::Pong)?,
            ForkCommand::Shutdown => return Ok(()),
            ForkCommand::RunTrial { unit, settings } => {
                serve_trial(&unit, &settings, &mut messages)?;
            }
        }
    }
}

fn inherited_fds() -> Result<(i32, i32), ChildError> {
    let value =
        std::env::var(IPC_FD_ENV).map_err(|_| ChildError::BadEnv("variable not set".to_string()))?;
    parse_fd_pair(&value).ok_or_else(|| ChildError::BadEnv(value))
}

fn parse_fd_pair(value: &str) -> Option<(i32, i32)> {
    let (read, write) = value.split_once(',')?;
    let read: i32 = read.trim().parse().ok()?;
    let write: i32 = write.trim().parse().ok()?;
    (read >= 0 && write >= 0 && read != write).then_some((read, write))
}

fn serve_trial<W: Write>(
    unit_name: &str,
    settings: &TrialSettings,
    messages: &mut FrameWriter<W>,
) -> Result<(), ChildError> {
    let catalog = Catalog::from_inventory();
    let Some(unit) = catalog.resolve_unit(unit_name) else {
        messages.write(&ForkMessage::TrialFailed {
            kind: FailureKind::Config,
            message: format!("unknown execution unit `{unit_name}`"),
            backtrace: None,
        })?;
        return Ok(());
    };

    let mut states = match StateRegistry::from_inventory(settings.seed) {
        Ok(states) => states,
        Err(e) => {
            messages.write(&ForkMessage::TrialFailed {
                kind: FailureKind::Config,
                message: e.to_string(),
                backtrace: None,
            })?;
            return Ok(());
        }
    };

    tracing::debug!(unit = unit_name, "running trial");
    let result = run_trial(&unit, &mut states, settings, &CANCEL, &mut |frame| {
        messages
            .write(&ForkMessage::Iteration(frame.clone()))
            .map_err(|e| std::io::Error::other(e.to_string()))
    });

    match result {
        Ok(TrialOutcome {
            invalid_iterations, ..
        }) => {
            messages.write(&ForkMessage::TrialComplete { invalid_iterations })?;
        }
        // The message pipe itself failed; nothing left to report in-band.
        Err(TrialError::Io(e)) => return Err(FrameError::Io(e).into()),
        Err(e) => {
            let kind = failure_kind(&e);
            let backtrace = matches!(kind, FailureKind::Internal)
                .then(|| std::backtrace::Backtrace::force_capture().to_string());
            messages.write(&ForkMessage::TrialFailed {
                kind,
                message: e.to_string(),
                backtrace,
            })?;
        }
    }
    Ok(())
}

fn failure_kind(error: &TrialError) -> FailureKind {
    match error {
        TrialError::Config(_) => FailureKind::Config,
        TrialError::Fixture(_) => FailureKind::Fixture,
        TrialError::Timeout | TrialError::Interrupted => FailureKind::Timeout,
        TrialError::Driver(_) | TrialError::Io(_) => FailureKind::Internal,
    }
}
