/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChildStdioError {
    #[error("stdin of the child process is not piped")]
    StdinNotPiped,
    #[error("stdout of the child process is not piped")]
    StdoutNotPiped,
    #[error("no tokio runtime to run the relay tasks")]
    NoRuntime,
}

#[derive(Error, Debug)]
pub enum ChildRelayError {
    #[error("read failed: {0:?}")]
    ReadFailed(io::Error),
    #[error("write failed: {0:?}")]
    WriteFailed(io::Error),
    #[error("relay task aborted")]
    Aborted,
}

pub(crate) fn closed_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "io on closed pipe")
}

pub(crate) fn closed_stream() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "read on closed stream")
}

pub(crate) fn deadline_exceeded() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "i/o deadline exceeded")
}
