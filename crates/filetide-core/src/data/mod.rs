mod bytes;
mod queue;
mod url;

use ::bytes::{Bytes, BytesMut};
use std::io::SeekFrom;

use crate::error::{Error, Result};
use crate::metadata::Metadata;

pub use self::queue::ChunkSender;

use self::bytes::BytesData;
use self::queue::QueueData;
use self::url::UrlData;

/// Preferred chunk granularity for streamed reads and queue items.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Bound on in-flight chunks per producer/consumer edge.
pub const QUEUE_CAPACITY: usize = 8;

/// A byte stream flowing between pipeline steps, with attached metadata.
///
/// One type, three backings: a bounded queue fed by a producer task, a fully
/// materialized buffer, or a remote HTTP resource accessed through range
/// requests. Whether `seek`/`tell` are available is a capability of the
/// backing, queried with [`PipelineData::is_seekable`].
pub struct PipelineData {
    inner: DataInner,
    metadata: Metadata,
}

enum DataInner {
    Queue(QueueData),
    Bytes(BytesData),
    Url(UrlData),
}

impl PipelineData {
    /// Carrier over a fully materialized buffer.
    pub fn from_bytes(metadata: Metadata, body: impl Into<Bytes>) -> Self {
        Self {
            inner: DataInner::Bytes(BytesData::new(body.into())),
            metadata,
        }
    }

    /// Carrier over a remote HTTP resource, read through range requests.
    pub fn from_url(url: ::url::Url, client: reqwest::Client) -> Self {
        Self {
            inner: DataInner::Url(UrlData::new(url, client)),
            metadata: Metadata::new(),
        }
    }

    /// Queue-backed carrier plus the producer handle feeding it.
    ///
    /// The producer pushes chunks and terminates the stream with
    /// [`ChunkSender::finish`] or [`ChunkSender::fail`]; pushes suspend while
    /// the queue is full.
    pub fn queue(metadata: Metadata) -> (ChunkSender, Self) {
        let (sender, data) = QueueData::channel(QUEUE_CAPACITY);
        (
            sender,
            Self {
                inner: DataInner::Queue(data),
                metadata,
            },
        )
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn is_seekable(&self) -> bool {
        !matches!(self.inner, DataInner::Queue(_))
    }

    /// Read up to `n` bytes; an empty result means end of stream.
    ///
    /// `read(0)` returns empty bytes without advancing. A queue backing may
    /// return fewer than `n` bytes while more remain; use
    /// [`PipelineData::read_full`] when an exact count is required.
    pub async fn read(&mut self, n: usize) -> Result<Bytes> {
        if n == 0 {
            return Ok(Bytes::new());
        }
        let chunk = match &mut self.inner {
            DataInner::Queue(queue) => queue.read(n).await?,
            DataInner::Bytes(buf) => buf.read(n),
            DataInner::Url(url) => {
                let chunk = url.read(n).await?;
                self.adopt_url_media_type();
                chunk
            },
        };
        Ok(chunk)
    }

    /// Read exactly `n` bytes unless the stream ends first.
    pub async fn read_full(&mut self, n: usize) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(n.min(STREAM_CHUNK_SIZE));
        while out.len() < n {
            let chunk = self.read(n - out.len()).await?;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Drain the stream to its end and concatenate the remainder.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Next chunk of at most [`STREAM_CHUNK_SIZE`] bytes, `None` at the end.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let chunk = self.read(STREAM_CHUNK_SIZE).await?;
        if chunk.is_empty() {
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }

    /// Reposition the cursor. Fails with [`Error::Unsupported`] on a queue
    /// backing; on a URL backing the target is clamped to `[0, length]`.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        match &mut self.inner {
            DataInner::Queue(_) => Err(Error::unsupported(
                "seek is unsupported for queue-backed pipeline data",
            )),
            DataInner::Bytes(buf) => buf.seek(pos),
            DataInner::Url(url) => url.seek(pos).await,
        }
    }

    /// Current cursor position. Fails with [`Error::Unsupported`] on a queue
    /// backing.
    pub fn tell(&self) -> Result<u64> {
        match &self.inner {
            DataInner::Queue(_) => Err(Error::unsupported(
                "tell is unsupported for queue-backed pipeline data",
            )),
            DataInner::Bytes(buf) => Ok(buf.tell()),
            DataInner::Url(url) => Ok(url.tell()),
        }
    }

    /// Total stream length. Fails with [`Error::Unsupported`] on a queue
    /// backing; a URL backing discovers it with HEAD or a one-byte range GET.
    pub async fn size(&mut self) -> Result<u64> {
        match &mut self.inner {
            DataInner::Queue(_) => Err(Error::unsupported(
                "size is unsupported for queue-backed pipeline data",
            )),
            DataInner::Bytes(buf) => Ok(buf.size()),
            DataInner::Url(url) => url.size().await,
        }
    }

    /// Buffer a non-seekable carrier into a Bytes carrier, keeping metadata.
    ///
    /// Rejects streams longer than `max_buffer_bytes` with
    /// [`Error::ResourceLimit`]. Seekable carriers pass through untouched.
    pub async fn into_seekable(mut self, max_buffer_bytes: u64) -> Result<Self> {
        if self.is_seekable() {
            return Ok(self);
        }
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            if (out.len() + chunk.len()) as u64 > max_buffer_bytes {
                return Err(Error::resource_limit(format!(
                    "non-seekable input exceeds the {max_buffer_bytes} byte buffering cap"
                )));
            }
            out.extend_from_slice(&chunk);
        }
        Ok(Self {
            inner: DataInner::Bytes(BytesData::new(out.freeze())),
            metadata: self.metadata,
        })
    }

    fn adopt_url_media_type(&mut self) {
        if self.metadata.media_type.is_some() {
            return;
        }
        if let DataInner::Url(url) = &self.inner {
            if let Some(content_type) = url.content_type() {
                self.metadata.media_type = Some(content_type.to_string());
            }
        }
    }
}

impl std::fmt::Debug for PipelineData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backing = match &self.inner {
            DataInner::Queue(_) => "queue",
            DataInner::Bytes(_) => "bytes",
            DataInner::Url(_) => "url",
        };
        f.debug_struct("PipelineData")
            .field("backing", &backing)
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::SeekFrom;

    use bytes::Bytes;

    use super::PipelineData;
    use crate::error::Error;
    use crate::metadata::Metadata;

    fn bytes_data(body: &[u8]) -> PipelineData {
        PipelineData::from_bytes(Metadata::new(), Bytes::copy_from_slice(body))
    }

    #[tokio::test]
    async fn bytes_reads_in_chunks_until_exhausted() {
        for chunk_size in [1usize, 2, 5, 100] {
            let mut data = bytes_data(b"123neco456neco");
            let mut collected = Vec::new();
            loop {
                let chunk = data.read(chunk_size).await.expect("read");
                if chunk.is_empty() {
                    break;
                }
                collected.extend_from_slice(&chunk);
            }
            assert_eq!(collected, b"123neco456neco");
        }
    }

    #[tokio::test]
    async fn bytes_seek_and_tell_are_exact() {
        let mut data = bytes_data(b"0123456789");
        assert_eq!(data.seek(SeekFrom::Start(4)).await.expect("seek"), 4);
        assert_eq!(data.tell().expect("tell"), 4);
        assert_eq!(data.read_to_end().await.expect("rest"), &b"456789"[..]);

        assert_eq!(data.seek(SeekFrom::End(-3)).await.expect("seek end"), 7);
        assert_eq!(data.read(2).await.expect("read"), &b"78"[..]);
        assert_eq!(data.seek(SeekFrom::Current(-1)).await.expect("back"), 8);
        assert_eq!(data.tell().expect("tell"), 8);
    }

    #[tokio::test]
    async fn read_zero_returns_empty_without_advancing() {
        let mut data = bytes_data(b"abc");
        assert!(data.read(0).await.expect("read").is_empty());
        assert_eq!(data.tell().expect("tell"), 0);
        assert_eq!(data.read_to_end().await.expect("all"), &b"abc"[..]);
    }

    #[tokio::test]
    async fn iteration_concatenation_equals_read_to_end() {
        let body: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();

        let mut iterated = Vec::new();
        let mut data = bytes_data(&body);
        while let Some(chunk) = data.next_chunk().await.expect("chunk") {
            iterated.extend_from_slice(&chunk);
        }

        let mut fresh = bytes_data(&body);
        assert_eq!(iterated, fresh.read_to_end().await.expect("all"));
    }

    #[tokio::test]
    async fn queue_delivers_chunks_in_order_and_ends_cleanly() {
        let (tx, mut data) = PipelineData::queue(Metadata::new());
        tokio::spawn(async move {
            tx.send(Bytes::from_static(b"neco")).await.expect("send");
            tx.send(Bytes::from_static(b"neco2")).await.expect("send");
            tx.finish().await;
        });

        assert_eq!(data.read_to_end().await.expect("drain"), &b"neconeco2"[..]);
        // Consumed to the end: further reads stay empty.
        assert!(data.read(10).await.expect("after end").is_empty());
    }

    #[tokio::test]
    async fn queue_read_returns_at_most_the_current_chunk() {
        let (tx, mut data) = PipelineData::queue(Metadata::new());
        tokio::spawn(async move {
            tx.send(Bytes::from_static(b"abcdef")).await.expect("send");
            tx.finish().await;
        });

        assert_eq!(data.read(4).await.expect("read"), &b"abcd"[..]);
        assert_eq!(data.read(4).await.expect("read"), &b"ef"[..]);
        assert!(data.read(4).await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn queue_rejects_seek_tell_and_size() {
        let (_tx, mut data) = PipelineData::queue(Metadata::new());
        assert!(matches!(
            data.seek(SeekFrom::Start(0)).await,
            Err(Error::Unsupported { .. })
        ));
        assert!(matches!(data.tell(), Err(Error::Unsupported { .. })));
        assert!(matches!(data.size().await, Err(Error::Unsupported { .. })));
    }

    #[tokio::test]
    async fn queue_reraises_the_producer_error() {
        let (tx, mut data) = PipelineData::queue(Metadata::new());
        tokio::spawn(async move {
            tx.send(Bytes::from_static(b"partial")).await.expect("send");
            tx.fail(Error::network("upstream reset")).await;
        });

        assert_eq!(data.read(100).await.expect("first"), &b"partial"[..]);
        assert!(matches!(data.read(100).await, Err(Error::Network { .. })));
        // The failure is terminal.
        assert!(data.read(100).await.expect("after error").is_empty());
    }

    #[tokio::test]
    async fn dropped_producer_reads_as_cancellation() {
        let (tx, mut data) = PipelineData::queue(Metadata::new());
        drop(tx);
        assert!(matches!(data.read(1).await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn into_seekable_buffers_queue_carriers() {
        let (tx, data) = PipelineData::queue(Metadata::for_file("x.bin", "application/x-test"));
        tokio::spawn(async move {
            tx.send(Bytes::from_static(b"hello ")).await.expect("send");
            tx.send(Bytes::from_static(b"world")).await.expect("send");
            tx.finish().await;
        });

        let mut seekable = data.into_seekable(1024).await.expect("materialize");
        assert!(seekable.is_seekable());
        assert_eq!(seekable.metadata().file_name.as_deref(), Some("x.bin"));
        seekable.seek(SeekFrom::Start(6)).await.expect("seek");
        assert_eq!(seekable.read_to_end().await.expect("rest"), &b"world"[..]);
    }

    #[tokio::test]
    async fn into_seekable_enforces_the_buffer_cap() {
        let (tx, data) = PipelineData::queue(Metadata::new());
        tokio::spawn(async move {
            for _ in 0..4 {
                if tx.send(Bytes::from_static(&[0u8; 1024])).await.is_err() {
                    return;
                }
            }
            tx.finish().await;
        });

        assert!(matches!(
            data.into_seekable(2048).await,
            Err(Error::ResourceLimit { .. })
        ));
    }
}
