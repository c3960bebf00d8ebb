// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge coordinator.
//!
//! Wires the reader thread, the ingest queue, the field mapper and the
//! configured sinks together, and runs the consumer loop on the calling
//! thread.

use crate::config::{BridgeConfig, ConfigError};
use crate::frame::DEFAULT_MAX_FRAME_LEN;
use crate::link::{create_link, ByteLink, LinkError};
use crate::mapper::FieldMapper;
use crate::queue::IngestQueue;
use crate::reader::{ReaderError, ReaderLoop};
use crate::record::{SensorRecord, UploadRecord};
use crate::sink::{create_sinks, RecordSink, SinkError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sink setup failed: {0}")]
    Sink(#[from] SinkError),

    #[error("Reader error: {0}")]
    Reader(ReaderError),

    #[error("Link failed: {0}")]
    Link(LinkError),
}

impl From<ReaderError> for BridgeError {
    fn from(e: ReaderError) -> Self {
        match e {
            ReaderError::Link(link) => BridgeError::Link(link),
            other => BridgeError::Reader(other),
        }
    }
}

/// Consumer loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Minimum time between two uploads.
    pub upload_interval: Duration,
    /// How long to wait on an empty queue before checking for shutdown.
    pub poll_interval: Duration,
    /// Frame length limit handed to the reader.
    pub max_frame_len: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            upload_interval: Duration::from_secs(15),
            poll_interval: Duration::from_millis(200),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl BridgeSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            upload_interval: Duration::from_secs(config.upload.interval_secs),
            poll_interval: Duration::from_millis(config.upload.poll_interval_ms),
            max_frame_len: config.frame.max_len,
        }
    }
}

/// Consumer-side counters.
#[derive(Debug, Default)]
struct BridgeStats {
    records_unmapped: AtomicU64,
    uploads_ok: AtomicU64,
    uploads_failed: AtomicU64,
}

/// Point-in-time bridge statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStatsSnapshot {
    /// Complete frames received.
    pub frames_read: u64,
    /// Frames that failed to parse.
    pub parse_errors: u64,
    /// Link read timeouts.
    pub timeouts: u64,
    /// Oversized frames dropped.
    pub overruns: u64,
    /// Records queued for mapping.
    pub records_queued: u64,
    /// Records with no configured channel.
    pub records_unmapped: u64,
    /// Successful sink submissions (counted per sink).
    pub uploads_ok: u64,
    /// Failed sink submissions (counted per sink).
    pub uploads_failed: u64,
}

/// Handle to stop a running bridge from another thread.
#[derive(Clone)]
pub struct StopHandle {
    shutdown: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request shutdown. Queued records are still delivered.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Serial-to-cloud bridge.
pub struct Bridge {
    settings: BridgeSettings,
    reader: ReaderLoop,
    queue: Arc<IngestQueue<SensorRecord>>,
    mapper: FieldMapper,
    sinks: Vec<Box<dyn RecordSink>>,
    shutdown: Arc<AtomicBool>,
    stats: BridgeStats,
    last_upload: Option<Instant>,
}

impl Bridge {
    /// Assemble a bridge from its parts.
    pub fn new(
        settings: BridgeSettings,
        link: Box<dyn ByteLink>,
        mapper: FieldMapper,
        sinks: Vec<Box<dyn RecordSink>>,
    ) -> Self {
        let queue = Arc::new(IngestQueue::new());
        let reader = ReaderLoop::with_max_len(link, Arc::clone(&queue), settings.max_frame_len);

        Self {
            settings,
            reader,
            queue,
            mapper,
            sinks,
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: BridgeStats::default(),
            last_upload: None,
        }
    }

    /// Build a bridge from validated configuration.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;

        let mapper = FieldMapper::new(config.field_mapping()?);
        let sinks = create_sinks(&config.sinks)?;
        let link = create_link(&config.link);

        Ok(Self::new(
            BridgeSettings::from_config(config),
            link,
            mapper,
            sinks,
        ))
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Get a handle to stop the bridge from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Names of the configured sinks.
    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Get snapshot of current stats.
    pub fn stats(&self) -> BridgeStatsSnapshot {
        let reader = self.reader.stats();
        BridgeStatsSnapshot {
            frames_read: reader.frames_read,
            parse_errors: reader.parse_errors,
            timeouts: reader.timeouts,
            overruns: reader.overruns,
            records_queued: reader.records_queued,
            records_unmapped: self.stats.records_unmapped.load(Ordering::Relaxed),
            uploads_ok: self.stats.uploads_ok.load(Ordering::Relaxed),
            uploads_failed: self.stats.uploads_failed.load(Ordering::Relaxed),
        }
    }

    /// Run the bridge (blocking).
    ///
    /// Returns once the stop handle fires or the link fails, after every
    /// record already received has been delivered.
    pub fn run(&mut self) -> Result<(), BridgeError> {
        tracing::info!(
            link = %self.reader.describe(),
            sinks = ?self.sink_names(),
            upload_interval_secs = self.settings.upload_interval.as_secs(),
            "Starting bridge"
        );

        self.reader.start()?;

        while !self.shutdown.load(Ordering::SeqCst) && self.reader.is_running() {
            if let Some(record) = self.queue.pop_timeout(self.settings.poll_interval) {
                self.process(record);
            }
        }

        let result = self.finish();

        let stats = self.stats();
        tracing::info!(
            frames_read = stats.frames_read,
            uploads_ok = stats.uploads_ok,
            uploads_failed = stats.uploads_failed,
            "Bridge stopped"
        );

        result
    }

    fn finish(&mut self) -> Result<(), BridgeError> {
        self.reader.stop();
        self.drain_pending();

        let joined = self.reader.join();
        // The last read may have completed one more frame
        self.drain_pending();
        self.queue.wait_until_drained();

        for sink in &mut self.sinks {
            if let Err(e) = sink.flush() {
                tracing::warn!(sink = sink.name(), error = %e, "Sink flush failed");
            }
        }

        joined.map_err(BridgeError::from)
    }

    fn drain_pending(&mut self) {
        while let Some(record) = self.queue.try_pop() {
            self.process(record);
        }
    }

    fn process(&mut self, record: SensorRecord) {
        let upload = self.mapper.map(&record);

        if upload.is_empty() {
            self.stats.records_unmapped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                id = record.id().unwrap_or("<none>"),
                "Record unmapped, not forwarded"
            );
        } else {
            self.pace();
            self.dispatch(&upload);
        }

        self.queue.task_done();
    }

    /// Sleep until the upload interval has passed since the last upload.
    fn pace(&self) {
        let Some(last) = self.last_upload else {
            return;
        };
        let elapsed = last.elapsed();
        if elapsed < self.settings.upload_interval {
            std::thread::sleep(self.settings.upload_interval - elapsed);
        }
    }

    fn dispatch(&mut self, upload: &UploadRecord) {
        for sink in &mut self.sinks {
            match sink.submit(upload) {
                Ok(()) => {
                    self.stats.uploads_ok.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        sink = sink.name(),
                        fields = upload.field_count(),
                        "Record uploaded"
                    );
                }
                Err(e) => {
                    self.stats.uploads_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(sink = sink.name(), error = %e, "Upload failed");
                }
            }
        }
        self.last_upload = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LinkConfig, SinkConfig};
    use crate::mapper::FieldMapping;
    use crate::record::FieldValue;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::io;

    /// Link that plays back a script and then reports the peer closed.
    struct ScriptLink {
        bytes: VecDeque<u8>,
        open: bool,
    }

    impl ScriptLink {
        fn boxed(script: &str) -> Box<dyn ByteLink> {
            Box::new(Self {
                bytes: script.bytes().collect(),
                open: false,
            })
        }
    }

    impl ByteLink for ScriptLink {
        fn open(&mut self) -> Result<(), LinkError> {
            self.open = true;
            Ok(())
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn read_byte(&mut self) -> Result<u8, LinkError> {
            self.bytes.pop_front().ok_or(LinkError::Closed)
        }

        fn describe(&self) -> String {
            "script".into()
        }
    }

    struct RecordingSink {
        records: Arc<Mutex<Vec<UploadRecord>>>,
        fail: bool,
    }

    impl RecordSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        fn submit(&mut self, record: &UploadRecord) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Io(io::Error::other("down")));
            }
            self.records.lock().push(record.clone());
            Ok(())
        }
    }

    fn mapper() -> FieldMapper {
        let mut channels = std::collections::BTreeMap::new();
        channels.insert("lurker1".to_string(), "KEY1".to_string());
        FieldMapper::new(FieldMapping::new(channels, FieldMapping::default_fields()).unwrap())
    }

    fn fast_settings() -> BridgeSettings {
        BridgeSettings {
            upload_interval: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
            max_frame_len: 256,
        }
    }

    #[test]
    fn test_run_uploads_then_reports_link_failure() {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            records: Arc::clone(&records),
            fail: false,
        };
        let mut bridge = Bridge::new(
            fast_settings(),
            ScriptLink::boxed(r#"#{"id":"lurker1","air_temp":12.34}$#{"id":"ghost","air_temp":1}$"#),
            mapper(),
            vec![Box::new(sink)],
        );

        match bridge.run() {
            Err(BridgeError::Link(LinkError::Closed)) => {}
            other => panic!("expected Link(Closed), got {:?}", other),
        }

        let uploaded = records.lock();
        assert_eq!(uploaded.len(), 1);
        assert_eq!(uploaded[0].credential(), Some("KEY1"));
        assert_eq!(uploaded[0].get("field1"), Some(&FieldValue::Float(12.34)));

        let stats = bridge.stats();
        assert_eq!(stats.frames_read, 2);
        assert_eq!(stats.records_queued, 2);
        assert_eq!(stats.records_unmapped, 1);
        assert_eq!(stats.uploads_ok, 1);
        assert_eq!(stats.uploads_failed, 0);
    }

    #[test]
    fn test_sink_failure_is_counted_not_fatal() {
        let sink = RecordingSink {
            records: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        };
        let mut bridge = Bridge::new(
            fast_settings(),
            ScriptLink::boxed(r#"#{"id":"lurker1"}$#{"id":"lurker1"}$"#),
            mapper(),
            vec![Box::new(sink)],
        );

        let _ = bridge.run();
        let stats = bridge.stats();
        assert_eq!(stats.uploads_failed, 2);
        assert_eq!(stats.uploads_ok, 0);
    }

    #[test]
    fn test_uploads_are_paced() {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            records: Arc::clone(&records),
            fail: false,
        };
        let settings = BridgeSettings {
            upload_interval: Duration::from_millis(100),
            ..fast_settings()
        };
        let mut bridge = Bridge::new(
            settings,
            ScriptLink::boxed(r#"#{"id":"lurker1"}$#{"id":"lurker1"}$#{"id":"lurker1"}$"#),
            mapper(),
            vec![Box::new(sink)],
        );

        let started = Instant::now();
        let _ = bridge.run();
        // Three uploads, two gaps
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(records.lock().len(), 3);
    }

    #[test]
    fn test_stop_handle_before_run() {
        let (tx, rx) = crossbeam::channel::unbounded::<u8>();
        struct IdleLink(crossbeam::channel::Receiver<u8>, bool);
        impl ByteLink for IdleLink {
            fn open(&mut self) -> Result<(), LinkError> {
                self.1 = true;
                Ok(())
            }
            fn close(&mut self) {
                self.1 = false;
            }
            fn is_open(&self) -> bool {
                self.1
            }
            fn read_byte(&mut self) -> Result<u8, LinkError> {
                self.0
                    .recv_timeout(Duration::from_millis(10))
                    .map_err(|_| LinkError::Timeout)
            }
            fn describe(&self) -> String {
                "idle".into()
            }
        }

        let mut bridge = Bridge::new(
            fast_settings(),
            Box::new(IdleLink(rx, false)),
            mapper(),
            Vec::new(),
        );
        let handle = bridge.stop_handle();
        handle.stop();
        assert!(handle.is_stopped());

        bridge.run().unwrap();
        drop(tx);
    }

    #[test]
    fn test_from_config_builds_sinks() {
        let mut config = BridgeConfig {
            link: LinkConfig::Tcp {
                address: "127.0.0.1:1".into(),
                read_timeout_ms: 100,
            },
            sinks: vec![SinkConfig::Stdout],
            ..BridgeConfig::default()
        };
        config.add_channel("lurker1", "KEY1");

        let bridge = Bridge::from_config(&config).unwrap();
        assert_eq!(bridge.sink_names(), vec!["stdout"]);
        assert_eq!(bridge.settings().upload_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        // No channels configured
        assert!(matches!(
            Bridge::from_config(&BridgeConfig::default()),
            Err(BridgeError::Config(_))
        ));
    }
}
