//! Wire protocol between the oxmark supervisor and its fork children.
//!
//! Each fork is a re-exec of the current binary that inherits a pair of pipe
//! file descriptors. Commands flow down on one pipe, measurement frames flow
//! back on the other. Every message is an rkyv-serialized, length-prefixed
//! frame so both sides can rely on message boundaries over the raw fds.

pub mod framing;
pub mod messages;

pub use framing::{read_frame, write_frame, FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE};
pub use messages::{
    FailureKind, ForkCommand, ForkMessage, IterationFrame, Mode, PhaseKind, TrialSettings,
};

/// Protocol version exchanged in the `Hello` handshake.
///
/// Bump on any incompatible change to the message layout.
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable naming the inherited command/message fds ("3,4").
pub const IPC_FD_ENV: &str = "OXMARK_IPC_FD";
