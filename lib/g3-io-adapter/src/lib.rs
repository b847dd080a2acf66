/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod capture;
mod config;
mod conn;
mod error;
mod merged;
mod meter;
mod pipe;
mod process;

pub use capture::PrefixSuffixBuffer;
pub use config::{CaptureConfig, ChildRelayConfig};
pub use conn::{Connection, DeadlineStream, SocketAddrs};
pub use error::{ChildRelayError, ChildStdioError};
pub use merged::MergedStream;
pub use meter::{
    ArcStreamMeterStats, MeteredReader, MeteredStream, MeteredWriter, StreamMeterSnapshot,
    StreamMeterStats,
};
pub use pipe::{PipeReader, PipeStream, PipeWriter, pipe, stream_pair};
pub use process::{ChildStdioBinder, ChildStdioRelay, command_stream};

#[cfg(feature = "yaml")]
pub mod yaml;
