/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

use crate::CaptureConfig;

/// A write only sink which keeps the first `max_size` bytes and the last
/// `max_size` bytes written to it, and counts everything in between.
///
/// Writes never block and never fail, so it can be used to capture the
/// output of a child process without bounding the child.
#[derive(Debug)]
pub struct PrefixSuffixBuffer {
    max_size: usize,
    prefix: Vec<u8>,
    /// ring buffer once `suffix.len() == max_size`
    suffix: Vec<u8>,
    suffix_off: usize,
    skipped: u64,
}

impl PrefixSuffixBuffer {
    pub fn new(max_size: usize) -> Self {
        PrefixSuffixBuffer {
            max_size,
            prefix: Vec::new(),
            suffix: Vec::new(),
            suffix_off: 0,
            skipped: 0,
        }
    }

    pub fn with_config(config: &CaptureConfig) -> Self {
        PrefixSuffixBuffer::new(config.max_size())
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of bytes written but kept in neither the prefix nor the suffix.
    #[inline]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.skipped > 0
    }

    pub fn total_written(&self) -> u64 {
        (self.prefix.len() + self.suffix.len()) as u64 + self.skipped
    }

    pub fn save(&mut self, data: &[u8]) {
        let mut data = fill(&mut self.prefix, self.max_size, data);

        // only the last max_size bytes may reach the suffix
        if data.len() > self.max_size {
            let overage = data.len() - self.max_size;
            data = &data[overage..];
            self.skipped += overage as u64;
        }
        data = fill(&mut self.suffix, self.max_size, data);

        // the suffix is full if there is still data left, overwrite it in a circle
        while !data.is_empty() {
            let room = &mut self.suffix[self.suffix_off..];
            let n = room.len().min(data.len());
            room[..n].copy_from_slice(&data[..n]);
            data = &data[n..];
            self.skipped += n as u64;
            self.suffix_off += n;
            if self.suffix_off == self.max_size {
                self.suffix_off = 0;
            }
        }
    }

    /// Rebuild the retained content, with a marker line in place of the
    /// skipped bytes if there are any.
    pub fn render(&self) -> Vec<u8> {
        if self.suffix.is_empty() {
            return self.prefix.clone();
        }
        if self.skipped == 0 {
            let mut buf = Vec::with_capacity(self.prefix.len() + self.suffix.len());
            buf.extend_from_slice(&self.prefix);
            buf.extend_from_slice(&self.suffix);
            return buf;
        }

        let marker = format!("\n... omitting {} bytes ...\n", self.skipped);
        let mut buf = Vec::with_capacity(self.prefix.len() + marker.len() + self.suffix.len());
        buf.extend_from_slice(&self.prefix);
        buf.extend_from_slice(marker.as_bytes());
        buf.extend_from_slice(&self.suffix[self.suffix_off..]);
        buf.extend_from_slice(&self.suffix[..self.suffix_off]);
        buf
    }

    pub fn render_lossy(&self) -> String {
        String::from_utf8_lossy(&self.render()).into_owned()
    }
}

/// Append to `dst` until it reaches `max_size`, returning what is left of `data`.
fn fill<'a>(dst: &mut Vec<u8>, max_size: usize, data: &'a [u8]) -> &'a [u8] {
    let remain = max_size.saturating_sub(dst.len());
    if remain == 0 {
        return data;
    }
    let add = remain.min(data.len());
    dst.extend_from_slice(&data[..add]);
    &data[add..]
}

impl io::Write for PrefixSuffixBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.save(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncWrite for PrefixSuffixBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().save(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
