use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

pub(crate) enum QueueItem {
    Chunk(Bytes),
    End,
    Error(Error),
}

/// Producer handle for a queue-backed carrier.
///
/// The stream must be terminated with [`ChunkSender::finish`] or
/// [`ChunkSender::fail`]; dropping the handle without either reads as a
/// cancelled pipeline on the consumer side.
pub struct ChunkSender {
    tx: mpsc::Sender<QueueItem>,
}

impl ChunkSender {
    /// Push one chunk, suspending while the queue is full.
    ///
    /// Fails with [`Error::Cancelled`] once the consumer is gone, which is
    /// how teardown propagates back into producer tasks.
    pub async fn send(&self, chunk: Bytes) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx
            .send(QueueItem::Chunk(chunk))
            .await
            .map_err(|_| Error::Cancelled)
    }

    /// Terminate the stream normally.
    pub async fn finish(self) {
        let _ = self.tx.send(QueueItem::End).await;
    }

    /// Terminate the stream with an error the consumer's next read re-raises.
    pub async fn fail(self, error: Error) {
        let _ = self.tx.send(QueueItem::Error(error)).await;
    }
}

pub(crate) struct QueueData {
    rx: mpsc::Receiver<QueueItem>,
    leftover: Bytes,
    finished: bool,
}

impl QueueData {
    pub(crate) fn channel(capacity: usize) -> (ChunkSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            ChunkSender { tx },
            Self {
                rx,
                leftover: Bytes::new(),
                finished: false,
            },
        )
    }

    pub(crate) async fn read(&mut self, n: usize) -> Result<Bytes> {
        loop {
            if !self.leftover.is_empty() {
                let take = n.min(self.leftover.len());
                return Ok(self.leftover.split_to(take));
            }
            if self.finished {
                return Ok(Bytes::new());
            }
            match self.rx.recv().await {
                Some(QueueItem::Chunk(chunk)) => self.leftover = chunk,
                Some(QueueItem::End) => {
                    self.finished = true;
                    return Ok(Bytes::new());
                },
                Some(QueueItem::Error(error)) => {
                    self.finished = true;
                    return Err(error);
                },
                // Producer dropped without a sentinel: the task was torn down.
                None => {
                    self.finished = true;
                    return Err(Error::Cancelled);
                },
            }
        }
    }
}
