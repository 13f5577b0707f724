use std::io::SeekFrom;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::header;
use reqwest::{Response, StatusCode};

use crate::data::STREAM_CHUNK_SIZE;
use crate::error::{Error, Result};

const RETRY_MAX_ATTEMPTS: usize = 2;
const RETRY_BASE_BACKOFF_MS: u64 = 300;

/// Forward seeks shorter than this are satisfied by reading and discarding
/// on the open connection instead of issuing a new ranged request.
const SEEK_READAHEAD_LIMIT: u64 = STREAM_CHUNK_SIZE as u64;

pub(crate) struct UrlData {
    client: reqwest::Client,
    url: url::Url,
    pos: u64,
    len: Option<u64>,
    response: Option<Response>,
    /// Bytes already pulled from the response but not yet handed out; the
    /// first byte is at `pos`.
    leftover: Bytes,
    /// Cursor position at which the current response was opened, used to
    /// detect servers that keep truncating the same range.
    opened_at: Option<u64>,
    content_type: Option<String>,
}

impl UrlData {
    pub(crate) fn new(url: url::Url, client: reqwest::Client) -> Self {
        Self {
            client,
            url,
            pos: 0,
            len: None,
            response: None,
            leftover: Bytes::new(),
            opened_at: None,
            content_type: None,
        }
    }

    pub(crate) fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub(crate) fn tell(&self) -> u64 {
        self.pos
    }

    /// Read exactly `n` bytes, concatenating successive ranges until
    /// satisfied or end of stream.
    pub(crate) async fn read(&mut self, n: usize) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while out.len() < n {
            if !self.leftover.is_empty() {
                let take = (n - out.len()).min(self.leftover.len());
                out.extend_from_slice(&self.leftover.split_to(take));
                self.pos += take as u64;
                continue;
            }
            if let Some(len) = self.len {
                if self.pos >= len {
                    break;
                }
            }
            if self.response.is_none() && !self.open().await? {
                break;
            }
            let Some(response) = self.response.as_mut() else {
                break;
            };
            match response.chunk().await {
                Ok(Some(chunk)) => self.leftover = chunk,
                Ok(None) => {
                    let opened_at = self.opened_at.take();
                    self.response = None;
                    match self.len {
                        None => {
                            self.len = Some(self.pos);
                            break;
                        },
                        Some(len) if self.pos >= len => break,
                        // Short range: reopen at the current position, unless
                        // the server made no progress at all this round.
                        Some(len) if opened_at == Some(self.pos) => {
                            return Err(Error::network(format!(
                                "source stream truncated at byte {} of {len}",
                                self.pos
                            )));
                        },
                        Some(_) => continue,
                    }
                },
                Err(error) => {
                    self.response = None;
                    return Err(error.into());
                },
            }
        }
        Ok(out.freeze())
    }

    pub(crate) async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let len = self.size().await?;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(delta) => len as i128 + delta as i128,
        };
        let target = target.clamp(0, len as i128) as u64;
        if target == self.pos {
            return Ok(self.pos);
        }
        if target > self.pos
            && target - self.pos <= SEEK_READAHEAD_LIMIT
            && (self.response.is_some() || !self.leftover.is_empty())
        {
            // Cheaper to read past a short gap than to reopen the connection.
            while self.pos < target {
                let gap = (target - self.pos) as usize;
                if self.read(gap.min(STREAM_CHUNK_SIZE)).await?.is_empty() {
                    break;
                }
            }
            return Ok(self.pos);
        }
        self.response = None;
        self.opened_at = None;
        self.leftover = Bytes::new();
        self.pos = target;
        Ok(self.pos)
    }

    /// Total resource length, discovered with HEAD and falling back to a
    /// one-byte ranged GET when the server does not answer HEAD usefully.
    pub(crate) async fn size(&mut self) -> Result<u64> {
        if let Some(len) = self.len {
            return Ok(len);
        }
        if let Ok(response) = self.client.head(self.url.clone()).send().await {
            if response.status() == StatusCode::NOT_FOUND {
                return Err(Error::not_found("source url", self.url.as_str()));
            }
            if response.status().is_success() {
                self.capture_content_type(&response);
                if let Some(len) = header_u64(&response, header::CONTENT_LENGTH) {
                    self.len = Some(len);
                    return Ok(len);
                }
            }
        }

        let response = self
            .client
            .get(self.url.clone())
            .header(header::RANGE, "bytes=0-0")
            .header(header::ACCEPT_ENCODING, "identity")
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::not_found("source url", self.url.as_str()));
        }
        self.capture_content_type(&response);
        if response.status() == StatusCode::PARTIAL_CONTENT {
            if let Some(total) = content_range_total(&response) {
                self.len = Some(total);
                return Ok(total);
            }
        } else if response.status().is_success() {
            if let Some(len) = header_u64(&response, header::CONTENT_LENGTH) {
                self.len = Some(len);
                return Ok(len);
            }
        }
        Err(Error::network(format!(
            "cannot determine length of {}",
            self.url
        )))
    }

    /// Open a ranged GET at the cursor. Returns `false` when the cursor is
    /// already at or past the end of the resource.
    async fn open(&mut self) -> Result<bool> {
        let mut attempt = 1;
        loop {
            let result = self
                .client
                .get(self.url.clone())
                .header(header::RANGE, format!("bytes={}-", self.pos))
                .header(header::ACCEPT_ENCODING, "identity")
                .send()
                .await;
            let response = match result {
                Ok(response) => response,
                Err(error) => {
                    if is_retriable_error(&error) && attempt < RETRY_MAX_ATTEMPTS {
                        tokio::time::sleep(backoff(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(error.into());
                },
            };

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Err(Error::not_found("source url", self.url.as_str()));
            }
            if status == StatusCode::RANGE_NOT_SATISFIABLE {
                if let Some(total) = content_range_total(&response) {
                    self.len = Some(total);
                } else if self.len.is_none() {
                    self.len = Some(self.pos);
                }
                return Ok(false);
            }
            if status == StatusCode::PARTIAL_CONTENT {
                self.capture_content_type(&response);
                if self.len.is_none() {
                    self.len = content_range_total(&response).or_else(|| {
                        header_u64(&response, header::CONTENT_LENGTH).map(|l| self.pos + l)
                    });
                }
                self.opened_at = Some(self.pos);
                self.response = Some(response);
                return Ok(true);
            }
            if status.is_success() {
                // Server ignored the range header; the body restarts at zero.
                self.capture_content_type(&response);
                if self.len.is_none() {
                    self.len = header_u64(&response, header::CONTENT_LENGTH);
                }
                self.opened_at = Some(self.pos);
                self.response = Some(response);
                let skip = self.pos;
                if skip > 0 {
                    return self.discard_prefix(skip).await;
                }
                return Ok(true);
            }
            if is_retriable_status(status) && attempt < RETRY_MAX_ATTEMPTS {
                tokio::time::sleep(backoff(attempt)).await;
                attempt += 1;
                continue;
            }
            return Err(Error::network(format!(
                "source request for {} failed with status {status}",
                self.url
            )));
        }
    }

    /// Drop `count` leading bytes of a full-body response so the stream
    /// lines up with the cursor. Returns `false` when the body ends first.
    async fn discard_prefix(&mut self, mut count: u64) -> Result<bool> {
        while count > 0 {
            let Some(response) = self.response.as_mut() else {
                return Ok(false);
            };
            match response.chunk().await {
                Ok(Some(mut chunk)) => {
                    if (chunk.len() as u64) <= count {
                        count -= chunk.len() as u64;
                    } else {
                        self.leftover = chunk.split_off(count as usize);
                        count = 0;
                    }
                },
                Ok(None) => {
                    self.response = None;
                    self.opened_at = None;
                    self.len = Some(self.pos - count);
                    return Ok(false);
                },
                Err(error) => {
                    self.response = None;
                    return Err(error.into());
                },
            }
        }
        Ok(true)
    }

    fn capture_content_type(&mut self, response: &Response) {
        if self.content_type.is_some() {
            return;
        }
        if let Some(value) = response.headers().get(header::CONTENT_TYPE) {
            if let Ok(text) = value.to_str() {
                self.content_type = Some(text.to_string());
            }
        }
    }
}

/// Total length out of a `Content-Range: bytes a-b/N` header.
fn content_range_total(response: &Response) -> Option<u64> {
    let value = response.headers().get(header::CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

fn header_u64(response: &Response, name: header::HeaderName) -> Option<u64> {
    response
        .headers()
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn is_retriable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retriable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

fn backoff(attempt: usize) -> Duration {
    let factor = 1_u64 << (attempt.saturating_sub(1)).min(4);
    Duration::from_millis(RETRY_BASE_BACKOFF_MS * factor)
}
