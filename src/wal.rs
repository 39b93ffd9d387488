use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::{Buf, BufMut, Bytes};
use parking_lot::Mutex;

/// Append-only log of opaque records.
///
/// Each record is `len: u32 | payload | crc32(payload): u32`, little endian.
/// The buffer pool only carries a handle to it.
pub struct Wal {
    file: Arc<Mutex<BufWriter<File>>>,
}

impl Wal {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .create_new(true)
            .write(true)
            .open(path)
            .context("failed to create WAL")?;

        Ok(Self {
            file: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    /// Reopens an existing log for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(path)
            .context("failed to open WAL")?;

        Ok(Self {
            file: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn append(&self, payload: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(payload.len() + 8);
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(payload);
        buf.put_u32_le(crc32fast::hash(payload));

        let mut file = self.file.lock();
        file.write_all(&buf).context("failed to append WAL record")?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.get_mut().sync_all()?;
        Ok(())
    }

    /// Reads every record back in append order.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<Bytes>> {
        let mut file = OpenOptions::new()
            .read(true)
            .open(path)
            .context("failed to open WAL for recovery")?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut rbuf: &[u8] = buf.as_slice();
        let mut records = Vec::new();

        while rbuf.has_remaining() {
            if rbuf.remaining() < 4 {
                bail!("incomplete WAL record header");
            }
            let len = rbuf.get_u32_le() as usize;
            if rbuf.remaining() < len + 4 {
                bail!("incomplete WAL record: expected {} bytes", len + 4);
            }

            let payload = Bytes::copy_from_slice(&rbuf[..len]);
            rbuf.advance(len);
            let checksum = rbuf.get_u32_le();

            if crc32fast::hash(&payload) != checksum {
                bail!("WAL checksum mismatch in record {}", records.len());
            }
            records.push(payload);
        }

        Ok(records)
    }
}
