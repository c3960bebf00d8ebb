// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record sinks: where mapped records go.
//!
//! Delivery is best effort. A failed submit is reported to the caller and
//! the record is dropped; nothing is retried or requeued.

use crate::config::SinkConfig;
use crate::record::UploadRecord;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("update rejected by server (rate limited or bad key)")]
    Rejected,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("form encoding error: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),
}

/// Something that consumes upload records.
pub trait RecordSink: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Deliver one record.
    fn submit(&mut self, record: &UploadRecord) -> Result<(), SinkError>;

    /// Flush buffered output.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Feed export formats offered by ThingSpeak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Json,
    Csv,
    Xml,
}

impl FeedFormat {
    fn extension(self) -> &'static str {
        match self {
            FeedFormat::Json => "json",
            FeedFormat::Csv => "csv",
            FeedFormat::Xml => "xml",
        }
    }
}

/// ThingSpeak-compatible HTTP sink.
///
/// Each record becomes one form-encoded `POST /update`. The service answers
/// with the new entry id, or `0` when it refused the update.
pub struct ThingSpeakSink {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl ThingSpeakSink {
    /// Create a sink for the given server (e.g. `https://api.thingspeak.com`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lurker-bridge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Server base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Download a channel feed.
    ///
    /// `read_key` is only needed for private channels.
    pub fn fetch_feed(
        &self,
        channel: &str,
        read_key: Option<&str>,
        format: FeedFormat,
    ) -> Result<String, SinkError> {
        let url = format!(
            "{}/channels/{}/feeds.{}",
            self.base_url,
            channel,
            format.extension()
        );

        let mut request = self.client.get(&url);
        if let Some(key) = read_key {
            request = request.query(&[("api_key", key)]);
        }

        let response = request.send()?;
        let status = response.status();
        let body = response.text()?;

        if !status.is_success() {
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

impl RecordSink for ThingSpeakSink {
    fn name(&self) -> &str {
        "thingspeak"
    }

    fn submit(&mut self, record: &UploadRecord) -> Result<(), SinkError> {
        let response = self
            .client
            .post(format!("{}/update", self.base_url))
            .header(ACCEPT, "text/plain")
            .form(&record.to_form_pairs())
            .send()?;

        let status = response.status();
        let body = response.text()?;

        if !status.is_success() {
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let entry_id = body.trim();
        if entry_id == "0" {
            return Err(SinkError::Rejected);
        }

        tracing::debug!(entry_id, "Update accepted");
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    received_at: DateTime<Utc>,
    record: &'a UploadRecord,
}

/// Appends records to a JSON-lines file.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    /// Open (or create) the file in append mode, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for JsonLinesSink {
    fn name(&self) -> &str {
        "json-lines"
    }

    fn submit(&mut self, record: &UploadRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(&JsonLine {
            received_at: Utc::now(),
            record,
        })?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        // Records arrive seconds apart; keep the file current
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Prints each record as the form body an upload would send (dry run).
pub struct StdoutSink {
    out: Box<dyn Write + Send>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }

    /// Print to another writer instead of stdout.
    pub fn with_writer(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordSink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    fn submit(&mut self, record: &UploadRecord) -> Result<(), SinkError> {
        let line = serde_urlencoded::to_string(record.to_form_pairs())?;
        writeln!(self.out, "{}", line)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Create a sink from configuration.
pub fn create_sink(config: &SinkConfig) -> Result<Box<dyn RecordSink>, SinkError> {
    match config {
        SinkConfig::Thingspeak {
            base_url,
            timeout_secs,
        } => Ok(Box::new(ThingSpeakSink::new(
            base_url.clone(),
            Duration::from_secs(*timeout_secs),
        )?)),
        SinkConfig::JsonLines { path } => Ok(Box::new(JsonLinesSink::open(path)?)),
        SinkConfig::Stdout => Ok(Box::new(StdoutSink::new())),
    }
}

/// Create every configured sink.
pub fn create_sinks(configs: &[SinkConfig]) -> Result<Vec<Box<dyn RecordSink>>, SinkError> {
    configs.iter().map(create_sink).collect()
}
