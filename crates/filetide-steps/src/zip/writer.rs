//! Streaming ZIP writer over a queue carrier.
//!
//! Entry sizes are unknown until their data has flowed, so local headers set
//! the data-descriptor flag and real sizes follow each entry; the central
//! directory is emitted on finish. Entries are stored uncompressed, which
//! keeps the writer free of CPU-bound work for inputs that are usually
//! compressed already.

use bytes::Bytes;

use filetide_core::{ChunkSender, Error, Result};

use super::archive::{
    CENTRAL_SIG, COMPRESSION_STORE, DESCRIPTOR_SIG, EOCD_SIG, LOCAL_SIG, ZipDateTime,
};

/// Data-descriptor plus UTF-8 name flags.
const ENTRY_FLAGS: u16 = 0x0808;
const VERSION_NEEDED: u16 = 20;

pub struct ZipStreamWriter<'a> {
    tx: &'a ChunkSender,
    offset: u64,
    central: Vec<CentralRecord>,
    open: Option<OpenEntry>,
}

struct OpenEntry {
    name: String,
    modified: ZipDateTime,
    header_offset: u64,
    hasher: crc32fast::Hasher,
    size: u64,
}

struct CentralRecord {
    name: String,
    modified: ZipDateTime,
    crc32: u32,
    size: u64,
    header_offset: u64,
}

impl<'a> ZipStreamWriter<'a> {
    pub fn new(tx: &'a ChunkSender) -> Self {
        Self {
            tx,
            offset: 0,
            central: Vec::new(),
            open: None,
        }
    }

    pub async fn begin_entry(&mut self, name: String, modified: ZipDateTime) -> Result<()> {
        if self.open.is_some() {
            return Err(Error::format("zip", "previous entry was not finished"));
        }
        if name.len() > u16::MAX as usize {
            return Err(Error::format("zip", "entry name is too long"));
        }
        let (date, time) = modified.to_dos();
        let mut header = FieldWriter::with_capacity(30 + name.len());
        header.u32(LOCAL_SIG);
        header.u16(VERSION_NEEDED);
        header.u16(ENTRY_FLAGS);
        header.u16(COMPRESSION_STORE);
        header.u16(time);
        header.u16(date);
        header.u32(0); // crc, in the descriptor
        header.u32(0); // compressed size, in the descriptor
        header.u32(0); // uncompressed size, in the descriptor
        header.u16(name.len() as u16);
        header.u16(0); // extra length
        header.bytes(name.as_bytes());

        self.open = Some(OpenEntry {
            name,
            modified,
            header_offset: self.offset,
            hasher: crc32fast::Hasher::new(),
            size: 0,
        });
        self.emit(header.finish()).await
    }

    pub async fn write(&mut self, chunk: Bytes) -> Result<()> {
        let Some(entry) = self.open.as_mut() else {
            return Err(Error::format("zip", "no entry is open for writing"));
        };
        entry.hasher.update(&chunk);
        entry.size += chunk.len() as u64;
        if entry.size > u32::MAX as u64 {
            return Err(Error::resource_limit(format!(
                "entry `{}` exceeds the 4 GiB stored-entry limit",
                entry.name
            )));
        }
        self.emit(chunk).await
    }

    pub async fn finish_entry(&mut self) -> Result<()> {
        let Some(entry) = self.open.take() else {
            return Err(Error::format("zip", "no entry is open to finish"));
        };
        let crc32 = entry.hasher.finalize();

        let mut descriptor = FieldWriter::with_capacity(16);
        descriptor.u32(DESCRIPTOR_SIG);
        descriptor.u32(crc32);
        descriptor.u32(entry.size as u32); // stored: compressed == uncompressed
        descriptor.u32(entry.size as u32);
        self.emit(descriptor.finish()).await?;

        self.central.push(CentralRecord {
            name: entry.name,
            modified: entry.modified,
            crc32,
            size: entry.size,
            header_offset: entry.header_offset,
        });
        Ok(())
    }

    /// Emit the central directory and end record.
    pub async fn finish(mut self) -> Result<()> {
        if self.open.is_some() {
            return Err(Error::format("zip", "an entry is still open"));
        }
        let records = std::mem::take(&mut self.central);
        if records.len() > u16::MAX as usize {
            return Err(Error::resource_limit(
                "archive exceeds the 65535 entry limit",
            ));
        }
        let entry_count = records.len() as u16;
        let directory_offset = self.offset;
        for record in records {
            let (date, time) = record.modified.to_dos();
            let mut out = FieldWriter::with_capacity(46 + record.name.len());
            out.u32(CENTRAL_SIG);
            out.u16(VERSION_NEEDED); // version made by
            out.u16(VERSION_NEEDED);
            out.u16(ENTRY_FLAGS);
            out.u16(COMPRESSION_STORE);
            out.u16(time);
            out.u16(date);
            out.u32(record.crc32);
            out.u32(record.size as u32);
            out.u32(record.size as u32);
            out.u16(record.name.len() as u16);
            out.u16(0); // extra length
            out.u16(0); // comment length
            out.u16(0); // disk number
            out.u16(0); // internal attributes
            out.u32(0); // external attributes
            out.u32(record.header_offset as u32);
            out.bytes(record.name.as_bytes());
            self.offset_guard(record.header_offset)?;
            self.emit(out.finish()).await?;
        }
        let directory_size = self.offset - directory_offset;
        self.offset_guard(directory_offset)?;

        let mut eocd = FieldWriter::with_capacity(22);
        eocd.u32(EOCD_SIG);
        eocd.u16(0); // this disk
        eocd.u16(0); // directory disk
        eocd.u16(entry_count);
        eocd.u16(entry_count);
        eocd.u32(directory_size as u32);
        eocd.u32(directory_offset as u32);
        eocd.u16(0); // comment length
        self.emit(eocd.finish()).await
    }

    fn offset_guard(&self, offset: u64) -> Result<()> {
        if offset > u32::MAX as u64 {
            return Err(Error::resource_limit(
                "archive exceeds the 4 GiB stored-archive limit",
            ));
        }
        Ok(())
    }

    async fn emit(&mut self, chunk: Bytes) -> Result<()> {
        self.offset += chunk.len() as u64;
        self.tx.send(chunk).await
    }
}

/// Little-endian field assembly for container records.
struct FieldWriter {
    out: Vec<u8>,
}

impl FieldWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
        }
    }

    fn u16(&mut self, value: u16) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    fn bytes(&mut self, value: &[u8]) {
        self.out.extend_from_slice(value);
    }

    fn finish(self) -> Bytes {
        Bytes::from(self.out)
    }
}
