//! ZIP container access over the seekable carrier interface.
//!
//! The end-of-central-directory record is located in a bounded tail read, the
//! central directory is decoded from buffered bytes, and member data is
//! streamed from the local header offset, so a range-backed URL carrier never
//! has to download more of the archive than the directory and the requested
//! members.

use bytes::Bytes;
use chrono::{Datelike, Timelike};
use flate2::{Decompress, FlushDecompress, Status};

use filetide_core::data::STREAM_CHUNK_SIZE;
use filetide_core::{ChunkSender, Error, PipelineData, Result};

pub const COMPRESSION_STORE: u16 = 0;
pub const COMPRESSION_DEFLATE: u16 = 8;

pub(crate) const LOCAL_SIG: u32 = 0x0403_4b50;
pub(crate) const CENTRAL_SIG: u32 = 0x0201_4b50;
pub(crate) const EOCD_SIG: u32 = 0x0605_4b50;
pub(crate) const DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const EOCD64_SIG: u32 = 0x0606_4b50;
const EOCD64_LOCATOR_SIG: u32 = 0x0706_4b50;

const EOCD_MIN_LEN: u64 = 22;
const EOCD64_LOCATOR_LEN: usize = 20;
/// EOCD record, a maximal archive comment and the zip64 locator.
const EOCD_SEARCH_SPAN: u64 = EOCD_MIN_LEN + u16::MAX as u64 + EOCD64_LOCATOR_LEN as u64;
/// Central directories larger than this are rejected outright.
const MAX_CENTRAL_DIR_BYTES: u64 = 64 * 1024 * 1024;
const LOCAL_HEADER_LEN: usize = 30;

/// Entry modification timestamp in MS-DOS two-second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZipDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl ZipDateTime {
    pub fn from_dos(date: u16, time: u16) -> Self {
        Self {
            year: 1980 + (date >> 9),
            month: ((date >> 5) & 0x0f) as u8,
            day: (date & 0x1f) as u8,
            hour: (time >> 11) as u8,
            minute: ((time >> 5) & 0x3f) as u8,
            second: ((time & 0x1f) * 2) as u8,
        }
    }

    pub fn to_dos(self) -> (u16, u16) {
        let date = ((self.year.saturating_sub(1980)) << 9)
            | ((self.month as u16) << 5)
            | self.day as u16;
        let time =
            ((self.hour as u16) << 11) | ((self.minute as u16) << 5) | (self.second as u16 / 2);
        (date, time)
    }

    pub fn now() -> Self {
        let now = chrono::Local::now();
        Self {
            year: now.year().clamp(1980, 2107) as u16,
            month: now.month() as u8,
            day: now.day() as u8,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second() as u8,
        }
    }

    /// `YYYY-MM-DD HH:MM:SS`, the form the archive preview reports.
    pub fn format(&self) -> String {
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub header_offset: u64,
    pub modified: ZipDateTime,
}

impl ZipEntry {
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// Central directory of one archive, in stored order.
#[derive(Debug)]
pub struct ZipArchive {
    pub entries: Vec<ZipEntry>,
}

impl ZipArchive {
    pub fn find(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }
}

/// Locate and decode the central directory of a seekable carrier.
pub async fn read_archive(data: &mut PipelineData) -> Result<ZipArchive> {
    let size = data.size().await?;
    if size < EOCD_MIN_LEN {
        return Err(Error::format("zip", "input is too short to be a ZIP archive"));
    }

    let tail_len = size.min(EOCD_SEARCH_SPAN);
    data.seek(std::io::SeekFrom::Start(size - tail_len)).await?;
    let tail = data.read_full(tail_len as usize).await?;
    if tail.len() as u64 != tail_len {
        return Err(Error::format("zip", "input ended while locating the directory"));
    }

    let eocd_at = find_eocd(&tail)
        .ok_or_else(|| Error::format("zip", "end of central directory record not found"))?;
    let eocd = &tail[eocd_at..];
    let mut entry_count = read_u16(eocd, 10) as u64;
    let mut directory_size = read_u32(eocd, 12) as u64;
    let mut directory_offset = read_u32(eocd, 16) as u64;

    if entry_count == u16::MAX as u64
        || directory_size == u32::MAX as u64
        || directory_offset == u32::MAX as u64
    {
        let (count, dir_size, dir_offset) =
            read_zip64_directory_fields(data, &tail, eocd_at).await?;
        entry_count = count;
        directory_size = dir_size;
        directory_offset = dir_offset;
    }

    if directory_size > MAX_CENTRAL_DIR_BYTES {
        return Err(Error::resource_limit(format!(
            "central directory of {directory_size} bytes exceeds the {MAX_CENTRAL_DIR_BYTES} byte cap"
        )));
    }

    data.seek(std::io::SeekFrom::Start(directory_offset)).await?;
    let directory = data.read_full(directory_size as usize).await?;
    if directory.len() as u64 != directory_size {
        return Err(Error::format("zip", "central directory is truncated"));
    }

    parse_central_directory(&directory, entry_count)
}

/// Stream one member's decompressed bytes into a queue carrier.
///
/// Verifies the CRC-32 and the declared uncompressed size as the data flows.
pub async fn stream_member(
    data: &mut PipelineData,
    entry: &ZipEntry,
    tx: &ChunkSender,
) -> Result<()> {
    data.seek(std::io::SeekFrom::Start(entry.header_offset))
        .await?;
    let header = data.read_full(LOCAL_HEADER_LEN).await?;
    if header.len() < LOCAL_HEADER_LEN || read_u32(&header, 0) != LOCAL_SIG {
        return Err(Error::format(
            "zip",
            format!("missing local header for `{}`", entry.name),
        ));
    }
    let name_len = read_u16(&header, 26) as i64;
    let extra_len = read_u16(&header, 28) as i64;
    data.seek(std::io::SeekFrom::Current(name_len + extra_len))
        .await?;

    let mut hasher = crc32fast::Hasher::new();
    let written = match entry.method {
        COMPRESSION_STORE => stream_stored(data, entry, tx, &mut hasher).await?,
        COMPRESSION_DEFLATE => stream_deflated(data, entry, tx, &mut hasher).await?,
        method => {
            return Err(Error::format(
                "zip",
                format!("unsupported compression method {method} for `{}`", entry.name),
            ));
        },
    };

    if written != entry.uncompressed_size {
        return Err(Error::format(
            "zip",
            format!(
                "member `{}` produced {written} bytes, expected {}",
                entry.name, entry.uncompressed_size
            ),
        ));
    }
    if hasher.finalize() != entry.crc32 {
        return Err(Error::format(
            "zip",
            format!("CRC mismatch in member `{}`", entry.name),
        ));
    }
    Ok(())
}

async fn stream_stored(
    data: &mut PipelineData,
    entry: &ZipEntry,
    tx: &ChunkSender,
    hasher: &mut crc32fast::Hasher,
) -> Result<u64> {
    let mut remaining = entry.compressed_size;
    let mut written = 0u64;
    while remaining > 0 {
        let want = remaining.min(STREAM_CHUNK_SIZE as u64) as usize;
        let chunk = data.read_full(want).await?;
        if chunk.is_empty() {
            return Err(Error::format(
                "zip",
                format!("member `{}` data is truncated", entry.name),
            ));
        }
        remaining -= chunk.len() as u64;
        written += chunk.len() as u64;
        hasher.update(&chunk);
        tx.send(chunk).await?;
    }
    Ok(written)
}

async fn stream_deflated(
    data: &mut PipelineData,
    entry: &ZipEntry,
    tx: &ChunkSender,
    hasher: &mut crc32fast::Hasher,
) -> Result<u64> {
    let mut inflater = Decompress::new(false);
    let mut out_buf = vec![0u8; STREAM_CHUNK_SIZE];
    let mut remaining = entry.compressed_size;
    let mut written = 0u64;
    let mut stream_end = false;

    while remaining > 0 && !stream_end {
        let want = remaining.min(STREAM_CHUNK_SIZE as u64) as usize;
        let chunk = data.read_full(want).await?;
        if chunk.is_empty() {
            return Err(Error::format(
                "zip",
                format!("member `{}` data is truncated", entry.name),
            ));
        }
        remaining -= chunk.len() as u64;

        let mut consumed = 0usize;
        while consumed < chunk.len() {
            let before_in = inflater.total_in();
            let before_out = inflater.total_out();
            let status = inflater
                .decompress(&chunk[consumed..], &mut out_buf, FlushDecompress::None)
                .map_err(|error| {
                    Error::format("zip", format!("inflate failed in `{}`: {error}", entry.name))
                })?;
            let used = (inflater.total_in() - before_in) as usize;
            consumed += used;
            let produced = (inflater.total_out() - before_out) as usize;
            if produced > 0 {
                hasher.update(&out_buf[..produced]);
                written += produced as u64;
                tx.send(Bytes::copy_from_slice(&out_buf[..produced])).await?;
            }
            if matches!(status, Status::StreamEnd) {
                stream_end = true;
                break;
            }
            if used == 0 && produced == 0 {
                return Err(Error::format(
                    "zip",
                    format!("inflate stalled in `{}`", entry.name),
                ));
            }
        }
    }

    // Drain whatever the inflater still holds after the last input byte.
    loop {
        let before_out = inflater.total_out();
        let status = inflater
            .decompress(&[], &mut out_buf, FlushDecompress::Finish)
            .map_err(|error| {
                Error::format("zip", format!("inflate failed in `{}`: {error}", entry.name))
            })?;
        let produced = (inflater.total_out() - before_out) as usize;
        if produced > 0 {
            hasher.update(&out_buf[..produced]);
            written += produced as u64;
            tx.send(Bytes::copy_from_slice(&out_buf[..produced])).await?;
        }
        if matches!(status, Status::StreamEnd) || produced == 0 {
            break;
        }
    }
    Ok(written)
}

fn find_eocd(tail: &[u8]) -> Option<usize> {
    if (tail.len() as u64) < EOCD_MIN_LEN {
        return None;
    }
    let last = tail.len() - EOCD_MIN_LEN as usize;
    for at in (0..=last).rev() {
        if read_u32(tail, at) == EOCD_SIG {
            let comment_len = read_u16(tail, at + 20) as usize;
            if at + EOCD_MIN_LEN as usize + comment_len == tail.len() {
                return Some(at);
            }
        }
    }
    None
}

async fn read_zip64_directory_fields(
    data: &mut PipelineData,
    tail: &[u8],
    eocd_at: usize,
) -> Result<(u64, u64, u64)> {
    if eocd_at < EOCD64_LOCATOR_LEN {
        return Err(Error::format("zip", "zip64 locator record is missing"));
    }
    let locator = &tail[eocd_at - EOCD64_LOCATOR_LEN..eocd_at];
    if read_u32(locator, 0) != EOCD64_LOCATOR_SIG {
        return Err(Error::format("zip", "zip64 locator record is missing"));
    }
    let eocd64_offset = read_u64(locator, 8);

    data.seek(std::io::SeekFrom::Start(eocd64_offset)).await?;
    let record = data.read_full(56).await?;
    if record.len() < 56 || read_u32(&record, 0) != EOCD64_SIG {
        return Err(Error::format("zip", "zip64 end of central directory is malformed"));
    }
    Ok((
        read_u64(&record, 32),
        read_u64(&record, 40),
        read_u64(&record, 48),
    ))
}

fn parse_central_directory(directory: &[u8], entry_count: u64) -> Result<ZipArchive> {
    let mut entries = Vec::new();
    let mut at = 0usize;
    while (entries.len() as u64) < entry_count {
        if directory.len() - at < 46 {
            return Err(Error::format("zip", "central directory entry is truncated"));
        }
        if read_u32(directory, at) != CENTRAL_SIG {
            return Err(Error::format("zip", "bad central directory signature"));
        }
        let method = read_u16(directory, at + 10);
        let mod_time = read_u16(directory, at + 12);
        let mod_date = read_u16(directory, at + 14);
        let crc32 = read_u32(directory, at + 16);
        let mut compressed_size = read_u32(directory, at + 20) as u64;
        let mut uncompressed_size = read_u32(directory, at + 24) as u64;
        let name_len = read_u16(directory, at + 28) as usize;
        let extra_len = read_u16(directory, at + 30) as usize;
        let comment_len = read_u16(directory, at + 32) as usize;
        let mut header_offset = read_u32(directory, at + 42) as u64;

        let fields_end = at + 46 + name_len + extra_len + comment_len;
        if directory.len() < fields_end {
            return Err(Error::format("zip", "central directory entry is truncated"));
        }
        let name = String::from_utf8_lossy(&directory[at + 46..at + 46 + name_len]).into_owned();

        let extra = &directory[at + 46 + name_len..at + 46 + name_len + extra_len];
        apply_zip64_extra(
            extra,
            &mut uncompressed_size,
            &mut compressed_size,
            &mut header_offset,
        )?;

        entries.push(ZipEntry {
            name,
            method,
            crc32,
            compressed_size,
            uncompressed_size,
            header_offset,
            modified: ZipDateTime::from_dos(mod_date, mod_time),
        });
        at = fields_end;
    }
    Ok(ZipArchive { entries })
}

/// Replace maxed-out 32-bit directory fields from the zip64 extra field.
fn apply_zip64_extra(
    extra: &[u8],
    uncompressed_size: &mut u64,
    compressed_size: &mut u64,
    header_offset: &mut u64,
) -> Result<()> {
    let needs_any = *uncompressed_size == u32::MAX as u64
        || *compressed_size == u32::MAX as u64
        || *header_offset == u32::MAX as u64;
    if !needs_any {
        return Ok(());
    }
    let mut at = 0usize;
    while extra.len() - at >= 4 {
        let id = read_u16(extra, at);
        let size = read_u16(extra, at + 2) as usize;
        let body_at = at + 4;
        if extra.len() < body_at + size {
            return Err(Error::format("zip", "extra field is truncated"));
        }
        if id == 0x0001 {
            let mut field_at = body_at;
            let mut take = |target: &mut u64| -> Result<()> {
                if *target == u32::MAX as u64 {
                    if field_at + 8 > body_at + size {
                        return Err(Error::format("zip", "zip64 extra field is truncated"));
                    }
                    *target = read_u64(extra, field_at);
                    field_at += 8;
                }
                Ok(())
            };
            take(uncompressed_size)?;
            take(compressed_size)?;
            take(header_offset)?;
            return Ok(());
        }
        at = body_at + size;
    }
    Err(Error::format("zip", "zip64 sizes promised but extra field is missing"))
}

pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&buf[at..at + 2]);
    u16::from_le_bytes(raw)
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(raw)
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::ZipDateTime;

    #[test]
    fn dos_timestamp_roundtrip_preserves_even_seconds() {
        let stamp = ZipDateTime {
            year: 2024,
            month: 1,
            day: 2,
            hour: 3,
            minute: 4,
            second: 4,
        };
        let (date, time) = stamp.to_dos();
        assert_eq!(ZipDateTime::from_dos(date, time), stamp);
    }

    #[test]
    fn dos_timestamp_formats_with_zero_padding() {
        let stamp = ZipDateTime {
            year: 2024,
            month: 1,
            day: 2,
            hour: 3,
            minute: 4,
            second: 5,
        };
        assert_eq!(stamp.format(), "2024-01-02 03:04:05");
    }
}
