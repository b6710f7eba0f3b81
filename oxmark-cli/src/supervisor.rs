//! Fork-child supervision.
//!
//! Each fork is the current executable re-exec'ed with a hidden flag and a
//! pair of pipes dup2'ed onto fds 3 (commands) and 4 (messages) before exec.
//! The parent ends stay close-on-exec so a child never inherits another
//! child's pipes.
//!
//! Receives are bounded: the frame reader's buffer is checked first (a whole
//! frame can sit there with the fd idle), then the raw fd is polled with a
//! deadline. A child that stalls past its deadline is terminated with
//! SIGTERM, given a short grace period, then SIGKILL.

use oxmark_ipc::{
    ForkCommand, ForkMessage, FrameError, FrameReader, FrameWriter, IPC_FD_ENV, PROTOCOL_VERSION,
};
use std::fs::File;
use std::os::fd::FromRawFd;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Hidden CLI flag that turns the binary into a fork worker.
pub const FORK_WORKER_FLAG: &str = "--fork-worker";

const CHILD_COMMAND_FD: i32 = 3;
const CHILD_MESSAGE_FD: i32 = 4;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const KILL_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn fork child: {0}")]
    Spawn(std::io::Error),

    #[error("failed to create ipc pipes: {0}")]
    Pipe(std::io::Error),

    #[error("fork child speaks protocol {got}, supervisor speaks {PROTOCOL_VERSION}")]
    ProtocolMismatch { got: u32 },

    #[error("fork child sent an unexpected message")]
    UnexpectedMessage,

    #[error("fork child stalled past its deadline")]
    ChildTimeout,

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A live fork child and its two pipe ends.
pub struct ForkHandle {
    child: Child,
    commands: FrameWriter<File>,
    messages: FrameReader<File>,
    message_fd: i32,
    pub pid: u32,
}

impl ForkHandle {
    /// Re-exec the current binary as a fork worker and complete the `Hello`
    /// handshake.
    pub fn spawn() -> Result<Self, SupervisorError> {
        let exe = std::env::current_exe().map_err(SupervisorError::Spawn)?;
        let (command_read, command_write) = pipe()?;
        let (message_read, message_write) = pipe()?;

        let mut command = Command::new(exe);
        command.arg(FORK_WORKER_FLAG);
        command.env(IPC_FD_ENV, format!("{CHILD_COMMAND_FD},{CHILD_MESSAGE_FD}"));
        // Safety: dup2, fcntl and close are async-signal-safe; the closure
        // touches nothing else. A pipe end can already sit on its target fd
        // (3 and 4 are the lowest free descriptors in a default process);
        // dup2 onto the same fd is a no-op that leaves close-on-exec set, so
        // the flag is cleared explicitly after each move.
        unsafe {
            command.pre_exec(move || {
                for (fd, target) in [
                    (command_read, CHILD_COMMAND_FD),
                    (message_write, CHILD_MESSAGE_FD),
                ] {
                    if fd != target {
                        if libc::dup2(fd, target) < 0 {
                            return Err(std::io::Error::last_os_error());
                        }
                        libc::close(fd);
                    }
                    let flags = libc::fcntl(target, libc::F_GETFD);
                    if flags < 0
                        || libc::fcntl(target, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0
                    {
                        return Err(std::io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }

        let spawned = command.spawn();
        // The child ends have been duplicated (or the spawn failed); either
        // way the parent is done with them.
        unsafe {
            libc::close(command_read);
            libc::close(message_write);
        }
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                unsafe {
                    libc::close(command_write);
                    libc::close(message_read);
                }
                return Err(SupervisorError::Spawn(e));
            }
        };

        let mut handle = Self {
            child,
            commands: FrameWriter::new(unsafe { File::from_raw_fd(command_write) }),
            messages: FrameReader::new(unsafe { File::from_raw_fd(message_read) }),
            message_fd: message_read,
            pid: 0,
        };

        match handle.recv(HANDSHAKE_TIMEOUT) {
            Ok(ForkMessage::Hello {
                protocol_version,
                pid,
            }) => {
                if protocol_version != PROTOCOL_VERSION {
                    handle.terminate();
                    return Err(SupervisorError::ProtocolMismatch {
                        got: protocol_version,
                    });
                }
                handle.pid = pid;
                Ok(handle)
            }
            Ok(_) => {
                handle.terminate();
                Err(SupervisorError::UnexpectedMessage)
            }
            Err(e) => {
                handle.terminate();
                Err(e)
            }
        }
    }

    pub fn send(&mut self, command: &ForkCommand) -> Result<(), SupervisorError> {
        self.commands.write(command)?;
        Ok(())
    }

    /// Receive the next message, waiting at most `timeout`.
    pub fn recv(&mut self, timeout: Duration) -> Result<ForkMessage, SupervisorError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.messages.has_buffered_data() {
                return Ok(self.messages.read()?);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SupervisorError::ChildTimeout);
            }
            let mut poll_fd = libc::pollfd {
                fd: self.message_fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let timeout_ms = remaining.as_millis().min(i32::MAX as u128) as i32;
            match unsafe { libc::poll(&mut poll_fd, 1, timeout_ms.max(1)) } {
                -1 => {
                    let e = std::io::Error::last_os_error();
                    if e.kind() == std::io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(SupervisorError::Frame(FrameError::Io(e)));
                }
                0 => return Err(SupervisorError::ChildTimeout),
                _ => return Ok(self.messages.read()?),
            }
        }
    }

    /// Ask the child to exit and give it a grace period before escalating.
    pub fn shutdown(mut self) {
        let _ = self.commands.write(&ForkCommand::Shutdown);
        if !self.wait_with_grace() {
            self.terminate();
        }
    }

    /// SIGTERM, grace period, SIGKILL.
    pub fn terminate(&mut self) {
        unsafe {
            libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM);
        }
        if !self.wait_with_grace() {
            tracing::warn!(pid = self.pid, "fork child ignored SIGTERM, killing");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }

    fn wait_with_grace(&mut self) -> bool {
        let deadline = Instant::now() + KILL_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                _ => return false,
            }
        }
    }
}

impl Drop for ForkHandle {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            self.terminate();
        }
    }
}

fn pipe() -> Result<(i32, i32), SupervisorError> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } < 0 {
        return Err(SupervisorError::Pipe(std::io::Error::last_os_error()));
    }
    Ok((fds[0], fds[1]))
}
