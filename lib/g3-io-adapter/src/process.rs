/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::process::Stdio;

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::pipe::pipe;
use crate::{
    ChildRelayConfig, ChildRelayError, ChildStdioError, MergedStream, PipeReader, PipeStream,
    PipeWriter,
};

type RelayResult = Result<u64, ChildRelayError>;

/// Prepare `cmd` so that its stdin and stdout can be driven through the
/// returned stream. Anything the child writes to stderr is discarded.
///
/// The command is not started here. After spawning it, hand the child to
/// [`ChildStdioBinder::bind`] to connect its stdio to the stream.
pub fn command_stream(cmd: &mut Command) -> (PipeStream, ChildStdioBinder) {
    // child stdout -> local read
    let (local_r, stdout_w) = pipe();
    // local write -> child stdin
    let (stdin_r, local_w) = pipe();

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let binder = ChildStdioBinder {
        stdin_r,
        stdout_w,
        config: ChildRelayConfig::default(),
    };
    (MergedStream::new(local_r, local_w), binder)
}

pub struct ChildStdioBinder {
    stdin_r: PipeReader,
    stdout_w: PipeWriter,
    config: ChildRelayConfig,
}

impl ChildStdioBinder {
    pub fn set_relay_config(&mut self, config: ChildRelayConfig) {
        self.config = config;
    }

    /// Start relaying between the stdio of the spawned `child` and the pipes
    /// behind the stream returned by [`command_stream`].
    pub fn bind(self, child: &mut Child) -> Result<ChildStdioRelay, ChildStdioError> {
        let handle = Handle::try_current().map_err(|_| ChildStdioError::NoRuntime)?;
        let stdin = child.stdin.take().ok_or(ChildStdioError::StdinNotPiped)?;
        let Some(stdout) = child.stdout.take() else {
            child.stdin = Some(stdin);
            return Err(ChildStdioError::StdoutNotPiped);
        };
        debug!("relaying stdio of child process {:?}", child.id());

        let buffer_size = self.config.buffer_size();
        let stdin_task = handle.spawn(run_relay(self.stdin_r, stdin, buffer_size, "stdin"));
        let stdout_task = handle.spawn(run_relay(stdout, self.stdout_w, buffer_size, "stdout"));
        Ok(ChildStdioRelay {
            stdin_task,
            stdout_task,
        })
    }
}

/// The two relay tasks started by [`ChildStdioBinder::bind`].
pub struct ChildStdioRelay {
    stdin_task: JoinHandle<RelayResult>,
    stdout_task: JoinHandle<RelayResult>,
}

impl ChildStdioRelay {
    pub fn is_finished(&self) -> bool {
        self.stdin_task.is_finished() && self.stdout_task.is_finished()
    }

    pub fn abort(&self) {
        self.stdin_task.abort();
        self.stdout_task.abort();
    }

    /// Wait for both directions to finish, and get the number of bytes
    /// relayed into the child's stdin and out of its stdout, in this order.
    pub async fn wait(self) -> (RelayResult, RelayResult) {
        let stdin = join_relay(self.stdin_task).await;
        let stdout = join_relay(self.stdout_task).await;
        (stdin, stdout)
    }
}

async fn join_relay(task: JoinHandle<RelayResult>) -> RelayResult {
    match task.await {
        Ok(r) => r,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(ChildRelayError::Aborted),
    }
}

async fn run_relay<R, W>(reader: R, writer: W, buffer_size: usize, name: &'static str) -> RelayResult
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let r = relay(reader, writer, buffer_size).await;
    match &r {
        Ok(n) => debug!("child {name} relay finished after {n} bytes"),
        Err(e) => debug!("child {name} relay failed: {e}"),
    }
    r
}

async fn relay<R, W>(mut reader: R, mut writer: W, buffer_size: usize) -> RelayResult
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;
    loop {
        let nr = reader
            .read(&mut buf)
            .await
            .map_err(ChildRelayError::ReadFailed)?;
        if nr == 0 {
            break;
        }
        writer
            .write_all(&buf[..nr])
            .await
            .map_err(ChildRelayError::WriteFailed)?;
        total += nr as u64;
    }
    writer
        .shutdown()
        .await
        .map_err(ChildRelayError::WriteFailed)?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[tokio::test]
    async fn relay_until_eof() {
        let reader = tokio_test::io::Builder::new()
            .read(b"hello ")
            .read(b"world")
            .build();
        let (mut peer_r, peer_w) = pipe();

        let task = tokio::spawn(relay(reader, peer_w, 4096));
        let mut data = Vec::new();
        peer_r.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"hello world");
        assert_eq!(task.await.unwrap().unwrap(), 11);
    }

    #[tokio::test]
    async fn relay_read_error() {
        let reader = tokio_test::io::Builder::new()
            .read(b"abc")
            .read_error(io::ErrorKind::ConnectionReset.into())
            .build();
        let writer = tokio_test::io::Builder::new().write(b"abc").build();

        let e = relay(reader, writer, 4096).await.unwrap_err();
        assert!(matches!(e, ChildRelayError::ReadFailed(_)));
    }

    #[tokio::test]
    async fn relay_write_error() {
        let reader = tokio_test::io::Builder::new().read(b"abc").build();
        let (peer_r, peer_w) = pipe();
        drop(peer_r);

        let e = relay(reader, peer_w, 4096).await.unwrap_err();
        match e {
            ChildRelayError::WriteFailed(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            e => panic!("unexpected error: {e}"),
        }
    }
}
