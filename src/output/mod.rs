//! Bounded hand-off from the capture thread to a single output thread.

pub mod report;
pub mod writer;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use log::{debug, warn};

use crate::metrics::{DecodeEvent, DecodeObserver};
use crate::session::SessionRecord;

pub use report::SessionReport;
pub use writer::{Destination, Format, RecordWriter};

/// Create the session queue. Capacity is at least one.
pub fn queue(
    capacity: usize,
    observer: Arc<dyn DecodeObserver>,
) -> (Emitter, Receiver<SessionRecord>) {
    let (tx, rx) = bounded(capacity.max(1));
    (Emitter { tx, observer }, rx)
}

/// Producer side of the session queue. Never blocks.
#[derive(Clone)]
pub struct Emitter {
    tx: Sender<SessionRecord>,
    observer: Arc<dyn DecodeObserver>,
}

impl Emitter {
    /// Queue a finished record. Returns false if it was dropped.
    pub fn try_emit(&self, record: SessionRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                self.observer.record(DecodeEvent::QueueFull);
                warn!(
                    "output queue full, dropping session {}",
                    describe(&record)
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("output worker gone, dropping session");
                false
            }
        }
    }
}

fn describe(record: &SessionRecord) -> String {
    match record.identity() {
        Some(id) => format!("{} -> {}", id.client, id.server),
        None => "(no client data)".to_string(),
    }
}

/// Consumer thread: drains the queue into a [`RecordWriter`] until every
/// [`Emitter`] is dropped or [`cancel`](OutputWorker::cancel) is called.
pub struct OutputWorker {
    handle: JoinHandle<Result<u64>>,
    cancel: Sender<()>,
}

impl OutputWorker {
    pub fn spawn(rx: Receiver<SessionRecord>, mut writer: RecordWriter) -> Result<Self> {
        let (cancel, cancel_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("hasshcap-output".into())
            .spawn(move || drain(&rx, &cancel_rx, &mut writer))
            .context("spawning output thread")?;
        Ok(OutputWorker { handle, cancel })
    }

    /// Stop after the record currently being written. Queued records are
    /// abandoned.
    pub fn cancel(&self) {
        let _ = self.cancel.try_send(());
    }

    /// Wait for the thread and return how many records it wrote.
    pub fn join(self) -> Result<u64> {
        let OutputWorker { handle, cancel } = self;
        let result = handle
            .join()
            .map_err(|_| anyhow!("output thread panicked"))?;
        // Held until here so a closed cancel channel never ends the loop early.
        drop(cancel);
        result
    }
}

fn drain(
    rx: &Receiver<SessionRecord>,
    cancel: &Receiver<()>,
    writer: &mut RecordWriter,
) -> Result<u64> {
    let mut written = 0u64;
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(record) => {
                    writer.write(&record)?;
                    written += 1;
                }
                Err(_) => break,
            },
            recv(cancel) -> _ => {
                debug!("output cancelled after {} records", written);
                break;
            }
        }
    }
    writer.finish()?;
    Ok(written)
}
