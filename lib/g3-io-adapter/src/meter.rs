/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

use crate::{Connection, SocketAddrs};

#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
pub struct StreamMeterSnapshot {
    pub read: u64,
    pub write: u64,
}

/// Byte counters of a metered stream.
///
/// The counters only ever grow, and can be read at any time from other
/// threads while the stream is in use.
#[derive(Default, Debug)]
pub struct StreamMeterStats {
    read: AtomicU64,
    write: AtomicU64,
}

pub type ArcStreamMeterStats = Arc<StreamMeterStats>;

impl StreamMeterStats {
    #[inline]
    pub fn add_read_bytes(&self, size: usize) {
        self.read.fetch_add(size as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_write_bytes(&self, size: usize) {
        self.write.fetch_add(size as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn read_count(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn write_count(&self) -> u64 {
        self.write.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StreamMeterSnapshot {
        StreamMeterSnapshot {
            read: self.read_count(),
            write: self.write_count(),
        }
    }
}

fn poll_read_metered<R>(
    reader: Pin<&mut R>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
    stats: &StreamMeterStats,
) -> Poll<io::Result<()>>
where
    R: AsyncRead,
{
    let old_filled_len = buf.filled().len();
    let r = reader.poll_read(cx, buf);
    // data filled before an error is still counted
    let nr = buf.filled().len() - old_filled_len;
    if nr > 0 {
        stats.add_read_bytes(nr);
    }
    r
}

fn poll_write_metered<W>(
    writer: Pin<&mut W>,
    cx: &mut Context<'_>,
    buf: &[u8],
    stats: &StreamMeterStats,
) -> Poll<io::Result<usize>>
where
    W: AsyncWrite,
{
    let nw = ready!(writer.poll_write(cx, buf))?;
    stats.add_write_bytes(nw);
    Poll::Ready(Ok(nw))
}

fn poll_write_vectored_metered<W>(
    writer: Pin<&mut W>,
    cx: &mut Context<'_>,
    bufs: &[IoSlice<'_>],
    stats: &StreamMeterStats,
) -> Poll<io::Result<usize>>
where
    W: AsyncWrite,
{
    let nw = ready!(writer.poll_write_vectored(cx, bufs))?;
    stats.add_write_bytes(nw);
    Poll::Ready(Ok(nw))
}

pin_project! {
    pub struct MeteredReader<R> {
        #[pin]
        inner: R,
        stats: ArcStreamMeterStats,
    }
}

impl<R> MeteredReader<R> {
    pub fn new(inner: R) -> Self {
        MeteredReader::with_stats(inner, Arc::new(StreamMeterStats::default()))
    }

    pub fn with_stats(inner: R, stats: ArcStreamMeterStats) -> Self {
        MeteredReader { inner, stats }
    }

    #[inline]
    pub fn stats(&self) -> &ArcStreamMeterStats {
        &self.stats
    }

    #[inline]
    pub fn read_count(&self) -> u64 {
        self.stats.read_count()
    }

    #[inline]
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead> AsyncRead for MeteredReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        poll_read_metered(this.inner, cx, buf, this.stats)
    }
}

impl<R: io::Read> io::Read for MeteredReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let nr = self.inner.read(buf)?;
        self.stats.add_read_bytes(nr);
        Ok(nr)
    }
}

pin_project! {
    pub struct MeteredWriter<W> {
        #[pin]
        inner: W,
        stats: ArcStreamMeterStats,
    }
}

impl<W> MeteredWriter<W> {
    pub fn new(inner: W) -> Self {
        MeteredWriter::with_stats(inner, Arc::new(StreamMeterStats::default()))
    }

    pub fn with_stats(inner: W, stats: ArcStreamMeterStats) -> Self {
        MeteredWriter { inner, stats }
    }

    #[inline]
    pub fn stats(&self) -> &ArcStreamMeterStats {
        &self.stats
    }

    #[inline]
    pub fn write_count(&self) -> u64 {
        self.stats.write_count()
    }

    #[inline]
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite> AsyncWrite for MeteredWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        poll_write_metered(this.inner, cx, buf, this.stats)
    }

    #[inline]
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
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
        poll_write_vectored_metered(this.inner, cx, bufs, this.stats)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

impl<W: io::Write> io::Write for MeteredWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let nw = self.inner.write(buf)?;
        self.stats.add_write_bytes(nw);
        Ok(nw)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pin_project! {
    /// Count the bytes read from and written to a connection.
    ///
    /// Everything else, including shutdown errors, is passed through as is.
    pub struct MeteredStream<C> {
        #[pin]
        inner: C,
        stats: ArcStreamMeterStats,
    }
}

impl<C> MeteredStream<C> {
    pub fn new(inner: C) -> Self {
        MeteredStream::with_stats(inner, Arc::new(StreamMeterStats::default()))
    }

    pub fn with_stats(inner: C, stats: ArcStreamMeterStats) -> Self {
        MeteredStream { inner, stats }
    }

    #[inline]
    pub fn stats(&self) -> &ArcStreamMeterStats {
        &self.stats
    }

    #[inline]
    pub fn read_count(&self) -> u64 {
        self.stats.read_count()
    }

    #[inline]
    pub fn write_count(&self) -> u64 {
        self.stats.write_count()
    }

    #[inline]
    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: AsyncRead> AsyncRead for MeteredStream<C> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        poll_read_metered(this.inner, cx, buf, this.stats)
    }
}

impl<C: AsyncWrite> AsyncWrite for MeteredStream<C> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        poll_write_metered(this.inner, cx, buf, this.stats)
    }

    #[inline]
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
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
        poll_write_vectored_metered(this.inner, cx, bufs, this.stats)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

impl<C: io::Read> io::Read for MeteredStream<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let nr = self.inner.read(buf)?;
        self.stats.add_read_bytes(nr);
        Ok(nr)
    }
}

impl<C: io::Write> io::Write for MeteredStream<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let nw = self.inner.write(buf)?;
        self.stats.add_write_bytes(nw);
        Ok(nw)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<C: SocketAddrs> SocketAddrs for MeteredStream<C> {
    #[inline]
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    #[inline]
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }
}

impl<C: Connection> Connection for MeteredStream<C> {
    #[inline]
    fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        self.inner.set_deadline(deadline)
    }

    #[inline]
    fn set_read_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        self.inner.set_read_deadline(deadline)
    }

    #[inline]
    fn set_write_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        self.inner.set_write_deadline(deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use crate::DeadlineStream;

    /// Fill part of the buffer, then fail.
    struct PartialReader;

    impl AsyncRead for PartialReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            buf.put_slice(b"ab");
            Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
        }
    }

    #[tokio::test]
    async fn reader() {
        let mock = tokio_test::io::Builder::new()
            .read(b"hello")
            .read_error(io::ErrorKind::ConnectionReset.into())
            .read(b"abc")
            .build();
        let mut reader = MeteredReader::new(mock);

        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(reader.read_count(), 5);

        let e = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(reader.read_count(), 5);

        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, 3);
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(reader.read_count(), 8);
    }

    #[tokio::test]
    async fn reader_partial_error() {
        let mut reader = MeteredReader::new(PartialReader);
        let mut buf = [0u8; 16];
        assert!(reader.read(&mut buf).await.is_err());
        assert_eq!(reader.read_count(), 2);
    }

    #[test]
    fn std_reader() {
        let mut reader = MeteredReader::new(&b"hello world"[..]);
        let mut data = Vec::new();
        io::Read::read_to_end(&mut reader, &mut data).unwrap();
        assert_eq!(data, b"hello world");
        assert_eq!(reader.read_count(), 11);
        assert_eq!(reader.stats().write_count(), 0);
    }

    #[tokio::test]
    async fn writer() {
        let mut writer = MeteredWriter::new(Vec::new());
        writer.write_all(b"abc").await.unwrap();
        writer.write_all(b"").await.unwrap();
        writer.write_all(b"1234567").await.unwrap();
        writer.flush().await.unwrap();
        assert_eq!(writer.write_count(), 10);
        assert_eq!(writer.get_ref(), b"abc1234567");
    }

    #[tokio::test]
    async fn writer_error() {
        let mock = tokio_test::io::Builder::new()
            .write(b"abc")
            .write_error(io::ErrorKind::BrokenPipe.into())
            .write(b"1234567")
            .build();
        let mut writer = MeteredWriter::new(mock);

        writer.write_all(b"abc").await.unwrap();
        let e = writer.write(b"xyz").await.unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);
        writer.write_all(b"1234567").await.unwrap();
        assert_eq!(writer.write_count(), 10);
    }

    #[test]
    fn std_writer_threads() {
        let stats = Arc::new(StreamMeterStats::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    let mut writer = MeteredWriter::with_stats(io::sink(), stats);
                    for _ in 0..100 {
                        io::Write::write_all(&mut writer, b"x").unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.write_count(), 1600);
        assert_eq!(stats.read_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shared_writer_tasks() {
        let writer = Arc::new(tokio::sync::Mutex::new(MeteredWriter::new(tokio::io::sink())));
        let stats = writer.lock().await.stats().clone();

        let mut tasks = Vec::new();
        for _ in 0..64 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                writer.lock().await.write_all(b"x").await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(stats.write_count(), 64);
    }

    #[tokio::test]
    async fn stream_mock() {
        let mock = tokio_test::io::Builder::new()
            .write(b"abc")
            .write_error(io::ErrorKind::ConnectionReset.into())
            .write(b"1234567")
            .read(b"pong")
            .build();
        let mut stream = MeteredStream::new(mock);

        stream.write_all(b"abc").await.unwrap();
        assert!(stream.write(b"x").await.is_err());
        stream.write_all(b"1234567").await.unwrap();
        assert_eq!(stream.write_count(), 10);
        assert_eq!(stream.read_count(), 0);

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(stream.stats().snapshot(), StreamMeterSnapshot { read: 4, write: 10 });
    }

    #[test]
    fn std_stream_tcp() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            io::Read::read_exact(&mut s, &mut buf).unwrap();
            io::Write::write_all(&mut s, b"pong!").unwrap();
            buf
        });

        let mut conn = MeteredStream::new(std::net::TcpStream::connect(addr).unwrap());
        io::Write::write_all(&mut conn, b"ping").unwrap();
        io::Write::flush(&mut conn).unwrap();
        assert_eq!(&server.join().unwrap(), b"ping");

        let mut data = Vec::new();
        io::Read::read_to_end(&mut conn, &mut data).unwrap();
        assert_eq!(data, b"pong!");
        assert_eq!(conn.stats().snapshot(), StreamMeterSnapshot { read: 5, write: 4 });
    }

    #[tokio::test]
    async fn stream_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (mut server, client_addr) = server.unwrap();

        let mut conn = MeteredStream::new(DeadlineStream::new(client.unwrap()));
        assert_eq!(conn.local_addr().unwrap(), client_addr);
        assert_eq!(conn.peer_addr().unwrap(), addr);

        conn.set_deadline(Some(Instant::now() + Duration::from_secs(10)))
            .unwrap();
        conn.write_all(b"abc").await.unwrap();
        conn.write_all(b"").await.unwrap();
        conn.write_all(b"1234567").await.unwrap();
        assert_eq!(conn.write_count(), 10);
        assert_eq!(conn.read_count(), 0);

        let mut buf = [0u8; 10];
        server.read_exact(&mut buf).await.unwrap();
        server.write_all(b"pong").await.unwrap();
        drop(server);

        let mut data = Vec::new();
        conn.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"pong");
        assert_eq!(conn.read_count(), 4);

        conn.set_write_deadline(Some(Instant::now())).unwrap();
        let e = conn.write(b"late").await.unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::TimedOut);
        assert_eq!(conn.write_count(), 10);
    }
}
