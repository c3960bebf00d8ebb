// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background reader thread.
//!
//! The reader owns the link while it runs: it reads frames, parses them and
//! pushes the resulting records onto the ingest queue. The link is handed
//! back on [`ReaderLoop::join`] so the loop can be started again.

use crate::frame::{FrameReader, DEFAULT_MAX_FRAME_LEN};
use crate::link::{ByteLink, LinkError};
use crate::parser::FrameParser;
use crate::queue::IngestQueue;
use crate::record::SensorRecord;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Reader errors.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("could not open link: {0}")]
    Open(#[source] LinkError),

    #[error("link failed: {0}")]
    Link(#[source] LinkError),

    #[error("reader thread panicked")]
    Panicked,

    #[error("link was lost when a previous reader thread failed")]
    LinkLost,

    #[error("could not spawn reader thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Reader state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Stopped,
    Running,
}

/// Reader counters.
#[derive(Debug, Default)]
pub struct ReaderStats {
    /// Complete frames received.
    pub frames_read: AtomicU64,
    /// Frames that did not parse.
    pub parse_errors: AtomicU64,
    /// Read timeouts (silent link).
    pub timeouts: AtomicU64,
    /// Frames dropped for exceeding the length limit.
    pub overruns: AtomicU64,
    /// Records pushed onto the queue.
    pub records_queued: AtomicU64,
}

impl ReaderStats {
    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> ReaderStatsSnapshot {
        ReaderStatsSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            records_queued: self.records_queued.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReaderStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStatsSnapshot {
    pub frames_read: u64,
    pub parse_errors: u64,
    pub timeouts: u64,
    pub overruns: u64,
    pub records_queued: u64,
}

/// What the reader thread hands back when it exits.
type ReaderExit = (Box<dyn ByteLink>, Option<LinkError>);

/// Start/stop wrapper around the reader thread.
pub struct ReaderLoop {
    link: Option<Box<dyn ByteLink>>,
    description: String,
    max_len: usize,
    queue: Arc<IngestQueue<SensorRecord>>,
    running: Arc<AtomicBool>,
    stats: Arc<ReaderStats>,
    worker: Option<JoinHandle<Option<ReaderExit>>>,
}

impl ReaderLoop {
    /// Create a stopped reader feeding `queue`.
    pub fn new(link: Box<dyn ByteLink>, queue: Arc<IngestQueue<SensorRecord>>) -> Self {
        Self::with_max_len(link, queue, DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a stopped reader with an explicit frame length limit.
    pub fn with_max_len(
        link: Box<dyn ByteLink>,
        queue: Arc<IngestQueue<SensorRecord>>,
        max_len: usize,
    ) -> Self {
        let description = link.describe();
        Self {
            link: Some(link),
            description,
            max_len,
            queue,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ReaderStats::default()),
            worker: None,
        }
    }

    /// Open the link if needed and start the reader thread.
    ///
    /// Starting a running reader does nothing. A thread that was asked to
    /// stop but has not exited yet is joined first; this takes at most one
    /// link read timeout.
    pub fn start(&mut self) -> Result<(), ReaderError> {
        if self.is_running() {
            tracing::info!(link = %self.description, "Reader already running");
            return Ok(());
        }

        if self.worker.is_some() {
            if let Err(e) = self.join() {
                tracing::warn!(error = %e, "Previous reader run ended with an error");
            }
        }

        let mut link = self.link.take().ok_or(ReaderError::LinkLost)?;
        if !link.is_open() {
            if let Err(e) = link.open() {
                self.link = Some(link);
                return Err(ReaderError::Open(e));
            }
        }

        self.running.store(true, Ordering::SeqCst);

        let max_len = self.max_len;
        let queue = Arc::clone(&self.queue);
        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);
        // The thread takes the link only once it runs
        let slot = Arc::new(Mutex::new(Some(link)));
        let thread_slot = Arc::clone(&slot);

        let spawned = thread::Builder::new()
            .name("lurker-reader".into())
            .spawn(move || {
                let link = thread_slot.lock().take()?;
                Some(read_loop(link, max_len, &queue, &running, &stats))
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                tracing::info!(link = %self.description, "Reader started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.link = slot.lock().take();
                Err(ReaderError::Spawn(e))
            }
        }
    }

    /// Ask the reader thread to stop after its current read.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!(link = %self.description, "Stopping reader");
        }
    }

    /// Wait for the reader thread to exit and take the link back.
    ///
    /// Call [`stop`](Self::stop) first unless the thread is expected to die
    /// on its own. Returns [`ReaderError::Link`] if the thread ended on a
    /// fatal link error.
    pub fn join(&mut self) -> Result<(), ReaderError> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };

        match handle.join() {
            Ok(Some((link, fatal))) => {
                self.link = Some(link);
                match fatal {
                    Some(e) => Err(ReaderError::Link(e)),
                    None => Ok(()),
                }
            }
            Ok(None) => Err(ReaderError::LinkLost),
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                Err(ReaderError::Panicked)
            }
        }
    }

    pub fn state(&self) -> ReaderState {
        if self.is_running() {
            ReaderState::Running
        } else {
            ReaderState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue the reader pushes onto.
    pub fn queue(&self) -> &Arc<IngestQueue<SensorRecord>> {
        &self.queue
    }

    /// Link description used in logs.
    pub fn describe(&self) -> &str {
        &self.description
    }

    pub fn stats(&self) -> ReaderStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for ReaderLoop {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.join() {
            tracing::debug!(error = %e, "Reader ended with an error");
        }
        if let Some(link) = self.link.as_mut() {
            link.close();
        }
    }
}

fn read_loop(
    link: Box<dyn ByteLink>,
    max_len: usize,
    queue: &IngestQueue<SensorRecord>,
    running: &AtomicBool,
    stats: &ReaderStats,
) -> ReaderExit {
    let parser = FrameParser::new();
    let mut reader = FrameReader::with_max_len(link, max_len);
    let mut fatal = None;

    while running.load(Ordering::SeqCst) {
        match reader.read_frame() {
            Ok(frame) => {
                stats.frames_read.fetch_add(1, Ordering::Relaxed);
                match parser.parse(&frame) {
                    Ok(record) => {
                        stats.records_queued.fetch_add(1, Ordering::Relaxed);
                        queue.push(record);
                    }
                    Err(e) => {
                        stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(error = %e, "Dropping unparseable frame");
                    }
                }
            }
            Err(LinkError::Timeout) => {
                stats.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Read timeout");
            }
            Err(e @ LinkError::Overrun { .. }) => {
                stats.overruns.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Dropping oversized frame");
            }
            Err(e) => {
                tracing::error!(
                    link = %reader.link().describe(),
                    error = %e,
                    "Link failed, reader stopping"
                );
                running.store(false, Ordering::SeqCst);
                fatal = Some(e);
            }
        }
    }

    let mut link = reader.into_link();
    if fatal.is_some() {
        link.close();
    }
    (link, fatal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    /// Link fed through a channel. Dropping the sender closes the link.
    struct ChannelLink {
        rx: Receiver<u8>,
        open: bool,
        fail_open: bool,
        opens: Arc<AtomicUsize>,
    }

    impl ByteLink for ChannelLink {
        fn open(&mut self) -> Result<(), LinkError> {
            if self.fail_open {
                return Err(LinkError::Open {
                    target: "test".into(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
                });
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
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
            if !self.open {
                return Err(LinkError::NotOpen);
            }
            match self.rx.recv_timeout(Duration::from_millis(10)) {
                Ok(b) => Ok(b),
                Err(RecvTimeoutError::Timeout) => Err(LinkError::Timeout),
                Err(RecvTimeoutError::Disconnected) => Err(LinkError::Closed),
            }
        }

        fn describe(&self) -> String {
            "channel".into()
        }
    }

    fn setup() -> (Sender<u8>, ReaderLoop, Arc<AtomicUsize>) {
        let (tx, rx) = channel::unbounded();
        let opens = Arc::new(AtomicUsize::new(0));
        let link = ChannelLink {
            rx,
            open: false,
            fail_open: false,
            opens: Arc::clone(&opens),
        };
        let reader = ReaderLoop::new(Box::new(link), Arc::new(IngestQueue::new()));
        (tx, reader, opens)
    }

    fn send(tx: &Sender<u8>, s: &str) {
        for b in s.bytes() {
            tx.send(b).unwrap();
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_reader_queues_parsed_records() {
        let (tx, mut reader, opens) = setup();
        assert_eq!(reader.state(), ReaderState::Stopped);

        reader.start().unwrap();
        assert_eq!(reader.state(), ReaderState::Running);
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        send(&tx, r#"#{"id":"lurker1","air_temp":12.34}$#NOT JSON$#{"id":"lurker2"}$"#);

        let queue = Arc::clone(reader.queue());
        let first = queue.pop_timeout(Duration::from_secs(5)).unwrap();
        let second = queue.pop_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.id(), Some("lurker1"));
        assert_eq!(second.id(), Some("lurker2"));

        reader.stop();
        reader.join().unwrap();
        assert_eq!(reader.state(), ReaderState::Stopped);

        let stats = reader.stats();
        assert_eq!(stats.frames_read, 3);
        assert_eq!(stats.parse_errors, 1);
        assert_eq!(stats.records_queued, 2);
    }

    #[test]
    fn test_start_twice_is_noop() {
        let (_tx, mut reader, opens) = setup();
        reader.start().unwrap();
        reader.start().unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(reader.is_running());

        reader.stop();
        reader.stop();
        reader.join().unwrap();
        assert!(!reader.is_running());
    }

    #[test]
    fn test_restart_after_stop() {
        let (tx, mut reader, opens) = setup();
        reader.start().unwrap();
        reader.stop();

        // Not joined yet: start() reclaims the old thread
        reader.start().unwrap();
        assert!(reader.is_running());
        // Link stayed open across runs
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        send(&tx, r#"#{"id":"again"}$"#);
        let record = reader.queue().pop_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(record.id(), Some("again"));
    }

    #[test]
    fn test_fatal_link_error_stops_reader() {
        let (tx, mut reader, _opens) = setup();
        reader.start().unwrap();
        send(&tx, r#"#{"id":"last"}$"#);
        drop(tx);

        wait_for(|| !reader.is_running());
        assert_eq!(reader.state(), ReaderState::Stopped);

        match reader.join() {
            Err(ReaderError::Link(LinkError::Closed)) => {}
            other => panic!("expected Link(Closed), got {:?}", other),
        }

        // The frame received before the failure was still queued
        assert_eq!(reader.queue().len(), 1);
    }

    #[test]
    fn test_open_failure_is_reported() {
        let (_tx, rx) = channel::unbounded();
        let link = ChannelLink {
            rx,
            open: false,
            fail_open: true,
            opens: Arc::new(AtomicUsize::new(0)),
        };
        let mut reader = ReaderLoop::new(Box::new(link), Arc::new(IngestQueue::new()));

        assert!(matches!(reader.start(), Err(ReaderError::Open(_))));
        assert_eq!(reader.state(), ReaderState::Stopped);
        // The link is kept, so another attempt fails the same way
        assert!(matches!(reader.start(), Err(ReaderError::Open(_))));
    }

    /// Link whose first read panics.
    struct PanickingLink;

    impl ByteLink for PanickingLink {
        fn open(&mut self) -> Result<(), LinkError> {
            Ok(())
        }

        fn close(&mut self) {}

        fn is_open(&self) -> bool {
            true
        }

        fn read_byte(&mut self) -> Result<u8, LinkError> {
            panic!("driver crashed");
        }

        fn describe(&self) -> String {
            "panicking".into()
        }
    }

    #[test]
    fn test_start_after_panic_reports_lost_link() {
        let mut reader = ReaderLoop::new(Box::new(PanickingLink), Arc::new(IngestQueue::new()));
        reader.start().unwrap();

        assert!(matches!(reader.join(), Err(ReaderError::Panicked)));
        assert_eq!(reader.state(), ReaderState::Stopped);

        // The link went down with the thread
        assert!(matches!(reader.start(), Err(ReaderError::LinkLost)));
        assert!(matches!(reader.start(), Err(ReaderError::LinkLost)));
        assert_eq!(reader.state(), ReaderState::Stopped);
    }

    #[test]
    fn test_split_frame_survives_timeouts() {
        let (tx, mut reader, _opens) = setup();
        reader.start().unwrap();

        send(&tx, r#"#{"id":"#);
        // Several read timeouts pass in between
        thread::sleep(Duration::from_millis(50));
        send(&tx, r#""split"}$"#);

        let record = reader.queue().pop_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(record.id(), Some("split"));
        assert!(reader.stats().timeouts > 0);
    }
}
