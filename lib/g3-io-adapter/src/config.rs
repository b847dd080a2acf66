/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

const DEFAULT_CAPTURE_SIZE: usize = 32 * 1024; // 32KB

const DEFAULT_RELAY_BUFFER_SIZE: usize = 16 * 1024; // 16KB
const MINIMAL_RELAY_BUFFER_SIZE: usize = 4 * 1024; // 4KB

/// Size of the head and of the tail kept by a [`crate::PrefixSuffixBuffer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CaptureConfig {
    max_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            max_size: DEFAULT_CAPTURE_SIZE,
        }
    }
}

impl CaptureConfig {
    pub fn new(max_size: usize) -> Self {
        CaptureConfig { max_size }
    }

    #[inline]
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChildRelayConfig {
    buffer_size: usize,
}

impl Default for ChildRelayConfig {
    fn default() -> Self {
        ChildRelayConfig {
            buffer_size: DEFAULT_RELAY_BUFFER_SIZE,
        }
    }
}

impl ChildRelayConfig {
    pub fn set_buffer_size(&mut self, buffer_size: usize) {
        self.buffer_size = buffer_size.max(MINIMAL_RELAY_BUFFER_SIZE);
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
