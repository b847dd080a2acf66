/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::{self, IoSlice};
use std::pin::Pin;
use std::task::{Context, Poll};

use log::debug;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::error::closed_stream;

pin_project! {
    /// A bidirectional stream made of a read half and a write half which may
    /// come from different sources.
    pub struct MergedStream<R, W> {
        #[pin]
        reader: Option<R>,
        #[pin]
        writer: W,
    }
}

impl<R, W> MergedStream<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        MergedStream {
            reader: Some(reader),
            writer,
        }
    }

    /// The read half, or `None` if the stream has been closed.
    #[inline]
    pub fn reader(&self) -> Option<&R> {
        self.reader.as_ref()
    }

    #[inline]
    pub fn writer(&self) -> &W {
        &self.writer
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    /// Get back the two halves, so that they can be driven and closed
    /// independently. Returns `None` if the stream has been closed.
    pub fn into_split(self) -> Option<(R, W)> {
        let MergedStream { reader, writer } = self;
        reader.map(|r| (r, writer))
    }
}

impl<R, W> MergedStream<R, W>
where
    W: AsyncWrite + Unpin,
{
    /// Close both halves.
    ///
    /// The read half is dropped and the write half is shut down. An error
    /// from the shutdown is not returned, so this never fails.
    pub async fn close(&mut self) {
        drop(self.reader.take());
        if let Err(e) = self.writer.shutdown().await {
            debug!("ignored shutdown error of the write half: {e}");
        }
    }
}

impl<R, W> AsyncRead for MergedStream<R, W>
where
    R: AsyncRead,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project().reader.as_pin_mut() {
            Some(reader) => reader.poll_read(cx, buf),
            None => Poll::Ready(Err(closed_stream())),
        }
    }
}

impl<R, W> AsyncWrite for MergedStream<R, W>
where
    W: AsyncWrite,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().writer.poll_write(cx, buf)
    }

    #[inline]
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().writer.poll_flush(cx)
    }

    #[inline]
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().writer.poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().writer.poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.writer.is_write_vectored()
    }
}
