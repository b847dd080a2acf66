/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::MergedStream;
use crate::error::closed_pipe;

/// One end of an in-process full duplex channel, see [`stream_pair`].
pub type PipeStream = MergedStream<PipeReader, PipeWriter>;

#[derive(Debug, Default)]
struct PipeState {
    /// data handed over to a parked reader but not read yet
    data: Vec<u8>,
    read_off: usize,
    /// free space of the parked reader, zero if no reader is waiting
    read_wanted: usize,
    reader_closed: bool,
    writer_closed: bool,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

impl PipeState {
    #[inline]
    fn unread(&self) -> &[u8] {
        &self.data[self.read_off..]
    }

    fn consume(&mut self, n: usize) {
        self.read_off += n;
        if self.read_off == self.data.len() {
            self.data.clear();
            self.read_off = 0;
        }
    }
}

#[derive(Debug, Default)]
struct Pipe {
    state: Mutex<PipeState>,
}

impl Pipe {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        // no code path panics with the lock held, so the state is still sound
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn register(slot: &mut Option<Waker>, cx: &Context<'_>) {
    if !matches!(slot, Some(w) if w.will_wake(cx.waker())) {
        *slot = Some(cx.waker().clone());
    }
}

fn wake(waker: Option<Waker>) {
    if let Some(waker) = waker {
        waker.wake();
    }
}

/// Create a synchronous in-memory pipe.
///
/// There is no buffering inside. A write stays pending until a read is
/// waiting on the other end, and then hands over at most as many bytes as
/// that read asked for, so a large write may complete partially. A write
/// that is dropped before it completes has transferred nothing.
pub fn pipe() -> (PipeReader, PipeWriter) {
    let pipe = Arc::new(Pipe::default());
    (
        PipeReader { pipe: pipe.clone() },
        PipeWriter { pipe },
    )
}

/// Create two streams cross wired by two pipes, so that data written to one
/// of them can be read from the other, in both directions.
pub fn stream_pair() -> (PipeStream, PipeStream) {
    let (a_r, a_w) = pipe();
    let (b_r, b_w) = pipe();
    (MergedStream::new(b_r, a_w), MergedStream::new(a_r, b_w))
}

#[derive(Debug)]
pub struct PipeReader {
    pipe: Arc<Pipe>,
}

impl PipeReader {
    /// Close the read side. Any pending or later write on the other end will
    /// fail with a closed pipe error.
    pub fn close(&self) {
        let mut state = self.pipe.lock();
        state.reader_closed = true;
        state.read_wanted = 0;
        state.data.clear();
        state.read_off = 0;
        let waker = state.write_waker.take();
        drop(state);
        wake(waker);
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut guard = self.pipe.lock();
        let state = &mut *guard;
        if state.reader_closed {
            return Poll::Ready(Err(closed_pipe()));
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let unread = state.unread();
        if !unread.is_empty() {
            let n = unread.len().min(buf.remaining());
            buf.put_slice(&unread[..n]);
            state.consume(n);
            state.read_wanted = 0;
            return Poll::Ready(Ok(()));
        }

        if state.writer_closed {
            return Poll::Ready(Ok(()));
        }
        state.read_wanted = buf.remaining();
        register(&mut state.read_waker, cx);
        let waker = state.write_waker.take();
        drop(guard);
        wake(waker);
        Poll::Pending
    }
}

#[derive(Debug)]
pub struct PipeWriter {
    pipe: Arc<Pipe>,
}

impl PipeWriter {
    /// Close the write side. The reader will see end of stream once it has
    /// read the data already handed over.
    pub fn close(&self) {
        let mut state = self.pipe.lock();
        state.writer_closed = true;
        let waker = state.read_waker.take();
        drop(state);
        wake(waker);
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut guard = self.pipe.lock();
        let state = &mut *guard;
        if state.writer_closed || state.reader_closed {
            return Poll::Ready(Err(closed_pipe()));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        if state.read_wanted == 0 || !state.unread().is_empty() {
            register(&mut state.write_waker, cx);
            return Poll::Pending;
        }

        let n = buf.len().min(state.read_wanted);
        state.data.extend_from_slice(&buf[..n]);
        state.read_wanted = 0;
        let waker = state.read_waker.take();
        drop(guard);
        wake(waker);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.close();
        Poll::Ready(Ok(()))
    }
}
