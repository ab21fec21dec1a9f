//! Background worker owning every suspending operation.
//!
//! Runs on its own thread with a private tokio runtime. The owning thread
//! sends `SyncCommand`s and drains `DataChange`s; the worker never touches
//! the store.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, info, warn};

use crate::models::Record;
use crate::pagination::FetchRequestId;
use crate::source::{ImageSource, PhotoCandidate};
use crate::sync::{ChangeEvent, InboundMessage, RemoteChannel, SyncError};
use crate::transaction::{BatchId, OutboundBatch};

#[derive(Debug)]
pub enum SyncCommand {
    /// Forward a batch to the remote. Batches are submitted in send order.
    Submit(OutboundBatch),
    /// Fetch `count` photos from the image source.
    FetchImages {
        request_id: FetchRequestId,
        count: usize,
    },
    Shutdown,
}

#[derive(Debug)]
pub enum DataChange {
    /// Full remote state, received on (re)connect
    Snapshot(Vec<Record>),
    /// Ordered remote delta
    Changes(Vec<ChangeEvent>),
    BatchAcked(BatchId),
    BatchFailed { batch_id: BatchId, error: SyncError },
    ImagesFetched {
        request_id: FetchRequestId,
        photos: Vec<PhotoCandidate>,
    },
    FetchFailed {
        request_id: FetchRequestId,
        error: String,
    },
    /// The inbound stream could not be opened or has ended
    ConnectionFailed { error: SyncError },
}

pub struct SyncWorker {
    remote: Arc<dyn RemoteChannel>,
    source: Arc<dyn ImageSource>,
    data_tx: Sender<DataChange>,
    command_rx: Receiver<SyncCommand>,
}

impl SyncWorker {
    pub fn new(
        remote: Arc<dyn RemoteChannel>,
        source: Arc<dyn ImageSource>,
        data_tx: Sender<DataChange>,
        command_rx: Receiver<SyncCommand>,
    ) -> Self {
        Self {
            remote,
            source,
            data_tx,
            command_rx,
        }
    }

    pub fn run(self) {
        let rt = match Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                warn!("Failed to create sync runtime: {}", e);
                let _ = self.data_tx.send(DataChange::ConnectionFailed {
                    error: SyncError::Unavailable(e.to_string()),
                });
                return;
            }
        };
        debug!("Sync worker thread started");

        // Submit results travel through the stream task so that an ack never
        // overtakes the echo of its own batch.
        let (result_tx, result_rx) = tokio_mpsc::unbounded_channel::<DataChange>();
        rt.spawn(Self::receive_changes(
            self.remote.clone(),
            self.data_tx.clone(),
            result_rx,
        ));

        // One submit task keeps outbound batches in order.
        let (submit_tx, submit_rx) = tokio_mpsc::unbounded_channel::<OutboundBatch>();
        rt.spawn(Self::submit_batches(self.remote.clone(), result_tx, submit_rx));

        loop {
            match self.command_rx.recv() {
                Ok(SyncCommand::Submit(batch)) => {
                    debug!(batch = %batch.batch_id, ops = batch.ops.len(), "queueing batch");
                    if submit_tx.send(batch).is_err() {
                        warn!("Submit task is gone; dropping batch");
                    }
                }
                Ok(SyncCommand::FetchImages { request_id, count }) => {
                    let source = self.source.clone();
                    let data_tx = self.data_tx.clone();
                    rt.spawn(async move {
                        let change = match source.fetch_random(count).await {
                            Ok(photos) => DataChange::ImagesFetched { request_id, photos },
                            Err(e) => DataChange::FetchFailed {
                                request_id,
                                error: format!("{:#}", e),
                            },
                        };
                        let _ = data_tx.send(change);
                    });
                }
                Ok(SyncCommand::Shutdown) | Err(_) => break,
            }
        }

        debug!("Sync worker shutting down");
        rt.shutdown_timeout(Duration::from_millis(500));
    }

    /// Forward inbound changes and submit results to the owning thread.
    ///
    /// Stream messages already queued win over a pending submit result; the
    /// remote queues a batch's changes before acknowledging it, so the echo
    /// is always reported first.
    async fn receive_changes(
        remote: Arc<dyn RemoteChannel>,
        data_tx: Sender<DataChange>,
        mut result_rx: tokio_mpsc::UnboundedReceiver<DataChange>,
    ) {
        let mut stream = match remote.subscribe().await {
            Ok(stream) => {
                info!("Change stream open");
                Some(stream)
            }
            Err(error) => {
                warn!("Failed to open change stream: {}", error);
                if data_tx.send(DataChange::ConnectionFailed { error }).is_err() {
                    return;
                }
                None
            }
        };

        loop {
            let next = match stream.as_mut() {
                Some(stream) => tokio::select! {
                    biased;
                    message = stream.recv() => Next::Inbound(message),
                    result = result_rx.recv() => Next::Result(result),
                },
                None => Next::Result(result_rx.recv().await),
            };

            let change = match next {
                Next::Inbound(Some(InboundMessage::Snapshot(records))) => {
                    DataChange::Snapshot(records)
                }
                Next::Inbound(Some(InboundMessage::Changes(changes))) => {
                    DataChange::Changes(changes)
                }
                Next::Inbound(None) => {
                    stream = None;
                    DataChange::ConnectionFailed {
                        error: SyncError::Disconnected,
                    }
                }
                Next::Result(Some(change)) => change,
                Next::Result(None) => return,
            };
            if data_tx.send(change).is_err() {
                return;
            }
        }
    }

    async fn submit_batches(
        remote: Arc<dyn RemoteChannel>,
        result_tx: tokio_mpsc::UnboundedSender<DataChange>,
        mut submit_rx: tokio_mpsc::UnboundedReceiver<OutboundBatch>,
    ) {
        while let Some(batch) = submit_rx.recv().await {
            let change = match remote.submit(&batch).await {
                Ok(()) => DataChange::BatchAcked(batch.batch_id),
                Err(error) => DataChange::BatchFailed {
                    batch_id: batch.batch_id,
                    error,
                },
            };
            if result_tx.send(change).is_err() {
                return;
            }
        }
    }
}

enum Next {
    Inbound(Option<InboundMessage>),
    Result(Option<DataChange>),
}
