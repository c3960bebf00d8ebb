// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lurker sink-node bridge
//!
//! Reads `#{json}$` frames from a serial port (or a TCP stream carrying the
//! same bytes), maps each sensor record onto a ThingSpeak-style channel
//! update, and uploads it.
//!
//! # Pipeline
//!
//! ```text
//! ByteLink -> FrameReader -> FrameParser -> IngestQueue -> FieldMapper -> RecordSink
//! `------------ reader thread -----------'               `------ consumer (Bridge::run) ------'
//! ```
//!
//! - **Framing**: bytes are accumulated up to `$`; a read timeout keeps the
//!   partial frame, a frame longer than the limit is dropped.
//! - **Parsing**: everything up to the first `#` is noise, the rest must be
//!   a JSON object.
//! - **Mapping**: the `id` selects the channel write key, each measurement
//!   is renamed to its `fieldN`; unknown ids and measurements are dropped.
//! - **Upload**: records are sent in arrival order, at most once, no closer
//!   together than the upload interval.
//!
//! # Quick Start
//!
//! ```bash
//! # Generate a configuration, edit the write keys, run
//! lurker-bridge gen-config --output lurker.toml
//! lurker-bridge --config lurker.toml
//!
//! # Print records instead of uploading them
//! lurker-bridge --config lurker.toml --dry-run
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! [link]
//! kind = "serial"
//! port = "/dev/ttyUSB0"
//! baud_rate = 57600
//!
//! [upload]
//! interval_secs = 15
//!
//! [[sinks]]
//! type = "thingspeak"
//!
//! [channels]
//! lurker1 = "WRITE_KEY"
//!
//! [fields]
//! air_temp = "field1"
//! humidity = "field3"
//! ```

pub mod bridge;
pub mod config;
pub mod frame;
pub mod link;
pub mod mapper;
pub mod parser;
pub mod queue;
pub mod reader;
pub mod record;
pub mod sink;

pub use bridge::{Bridge, BridgeError, BridgeSettings, BridgeStatsSnapshot, StopHandle};
pub use config::{BridgeConfig, ConfigError, LinkConfig, SinkConfig};
pub use frame::{FrameReader, RawFrame};
pub use link::{create_link, ByteLink, LinkError, SerialLink, TcpLink};
pub use mapper::{FieldMapper, FieldMapping, MappingError};
pub use parser::{FrameParser, ParseError};
pub use queue::IngestQueue;
pub use reader::{ReaderError, ReaderLoop, ReaderState, ReaderStatsSnapshot};
pub use record::{FieldValue, SensorRecord, UploadRecord};
pub use sink::{
    create_sink, create_sinks, FeedFormat, JsonLinesSink, RecordSink, SinkError, StdoutSink,
    ThingSpeakSink,
};
