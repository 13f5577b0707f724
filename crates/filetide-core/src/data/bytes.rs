use std::io::SeekFrom;

use bytes::Bytes;

use crate::error::{Error, Result};

pub(crate) struct BytesData {
    buf: Bytes,
    pos: u64,
}

impl BytesData {
    pub(crate) fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn read(&mut self, n: usize) -> Bytes {
        let len = self.buf.len() as u64;
        if self.pos >= len {
            return Bytes::new();
        }
        let start = self.pos as usize;
        let end = (start + n).min(self.buf.len());
        self.pos = end as u64;
        self.buf.slice(start..end)
    }

    pub(crate) fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let len = self.buf.len() as i128;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(delta) => len + delta as i128,
        };
        if target < 0 {
            return Err(Error::invalid_arguments("seek before start of stream"));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }

    pub(crate) fn tell(&self) -> u64 {
        self.pos
    }

    pub(crate) fn size(&self) -> u64 {
        self.buf.len() as u64
    }
}
