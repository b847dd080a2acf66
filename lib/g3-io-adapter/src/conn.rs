/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::time::{Instant, Sleep};

use crate::error::deadline_exceeded;

pub trait SocketAddrs {
    fn local_addr(&self) -> io::Result<SocketAddr>;
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl SocketAddrs for TcpStream {
    #[inline]
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    #[inline]
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

/// A network connection with address introspection and i/o deadlines.
///
/// A deadline is an absolute time after which pending and future transfers
/// in that direction fail with [`io::ErrorKind::TimedOut`]. `None` clears it.
pub trait Connection: AsyncRead + AsyncWrite + SocketAddrs {
    fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        self.set_read_deadline(deadline)?;
        self.set_write_deadline(deadline)
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()>;

    fn set_write_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()>;
}

pin_project! {
    /// Add read and write deadlines to a stream.
    pub struct DeadlineStream<S> {
        #[pin]
        inner: S,
        read_deadline: Option<Pin<Box<Sleep>>>,
        write_deadline: Option<Pin<Box<Sleep>>>,
    }
}

impl<S> DeadlineStream<S> {
    pub fn new(inner: S) -> Self {
        DeadlineStream {
            inner,
            read_deadline: None,
            write_deadline: None,
        }
    }

    #[inline]
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Set both deadlines, see [`Connection::set_deadline`].
    ///
    /// These setters work for any inner stream, including those without
    /// socket addresses.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        self.set_read_deadline(deadline)?;
        self.set_write_deadline(deadline)
    }

    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        reset_timer(&mut self.read_deadline, deadline)
    }

    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        reset_timer(&mut self.write_deadline, deadline)
    }
}

fn reset_timer(timer: &mut Option<Pin<Box<Sleep>>>, deadline: Option<Instant>) -> io::Result<()> {
    let Some(deadline) = deadline else {
        *timer = None;
        return Ok(());
    };
    if let Some(sleep) = timer {
        sleep.as_mut().reset(deadline);
        return Ok(());
    }

    // the timer can only be created inside a runtime
    if Handle::try_current().is_err() {
        return Err(io::Error::other("no tokio runtime to run the deadline timer"));
    }
    *timer = Some(Box::pin(tokio::time::sleep_until(deadline)));
    Ok(())
}

fn check_expired(timer: &Option<Pin<Box<Sleep>>>) -> io::Result<()> {
    match timer {
        Some(sleep) if sleep.deadline() <= Instant::now() => Err(deadline_exceeded()),
        _ => Ok(()),
    }
}

fn poll_expired<T>(timer: &mut Option<Pin<Box<Sleep>>>, cx: &mut Context<'_>) -> Poll<io::Result<T>> {
    if let Some(sleep) = timer {
        if sleep.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(deadline_exceeded()));
        }
    }
    Poll::Pending
}

impl<S: AsyncRead> AsyncRead for DeadlineStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        check_expired(this.read_deadline)?;
        match this.inner.poll_read(cx, buf) {
            Poll::Pending => poll_expired(this.read_deadline, cx),
            r => r,
        }
    }
}

impl<S: AsyncWrite> AsyncWrite for DeadlineStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        check_expired(this.write_deadline)?;
        match this.inner.poll_write(cx, buf) {
            Poll::Pending => poll_expired(this.write_deadline, cx),
            r => r,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        check_expired(this.write_deadline)?;
        match this.inner.poll_flush(cx) {
            Poll::Pending => poll_expired(this.write_deadline, cx),
            r => r,
        }
    }

    #[inline]
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        check_expired(this.write_deadline)?;
        match this.inner.poll_write_vectored(cx, bufs) {
            Poll::Pending => poll_expired(this.write_deadline, cx),
            r => r,
        }
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

impl<S: SocketAddrs> SocketAddrs for DeadlineStream<S> {
    #[inline]
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    #[inline]
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }
}

impl<S> Connection for DeadlineStream<S>
where
    S: AsyncRead + AsyncWrite + SocketAddrs,
{
    #[inline]
    fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        DeadlineStream::set_deadline(self, deadline)
    }

    #[inline]
    fn set_read_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        DeadlineStream::set_read_deadline(self, deadline)
    }

    #[inline]
    fn set_write_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        DeadlineStream::set_write_deadline(self, deadline)
    }
}
