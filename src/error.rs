//! Error types shared by the poller, the reactor and the socket wrappers.

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

/// Errors surfaced by reactor setup and registry operations.
///
/// Per-connection I/O failures never show up here: the dispatcher turns them
/// into a close of the affected connection.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("handle {0} is already registered")]
    DuplicateHandle(RawFd),

    #[error("handle {0} is not registered")]
    UnknownHandle(RawFd),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ReactorError>;
