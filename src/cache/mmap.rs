//! # Memory-Mapped Block Cache
//!
//! A [`BlockCache`] backed by a memory-mapped file. The whole file is mapped
//! read-write; block reads copy out of the map and block writes copy into
//! it, so the index's read-modify-write discipline over whole blocks is
//! preserved while the OS page cache handles actual I/O.
//!
//! `sync` flushes the map, which is what gives `detach` its durability
//! point. Anything short of a flush is only as durable as the OS decides.
//!
//! The file length is fixed at creation (`block_size * block_count`) and
//! never grows; the index allocates from its own free list instead of
//! extending the file.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Context, Result};
use memmap2::MmapMut;

use super::BlockCache;
use crate::config::NODE_HEADER_SIZE;

/// File-backed block cache over a fixed-size memory map.
#[derive(Debug)]
pub struct MmapCache {
    _file: File,
    map: MmapMut,
    block_size: usize,
}

impl MmapCache {
    /// Creates (or truncates) the file at `path` sized for `block_count`
    /// blocks and maps it. New blocks read as zeroes.
    pub fn create<P: AsRef<Path>>(path: P, block_size: usize, block_count: u32) -> Result<Self> {
        Self::validate_block_size(block_size)?;
        ensure!(block_count > 0, "cache must hold at least one block");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .wrap_err_with(|| format!("failed to create {}", path.as_ref().display()))?;
        file.set_len(block_size as u64 * block_count as u64)?;

        // SAFETY: the map is private to this process for the lifetime of the
        // cache; the file handle is held alongside the mapping.
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            _file: file,
            map,
            block_size,
        })
    }

    /// Maps an existing file. The file length must be a whole number of
    /// blocks.
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        Self::validate_block_size(block_size)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .wrap_err_with(|| format!("failed to open {}", path.as_ref().display()))?;
        let len = file.metadata()?.len();
        ensure!(len > 0, "{} is empty", path.as_ref().display());
        ensure!(
            len % block_size as u64 == 0,
            "{} is {} bytes, not a multiple of the {}-byte block size",
            path.as_ref().display(),
            len,
            block_size
        );

        // SAFETY: as in `create`.
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            _file: file,
            map,
            block_size,
        })
    }

    fn validate_block_size(block_size: usize) -> Result<()> {
        ensure!(
            block_size.is_power_of_two(),
            "block size {} is not a power of two",
            block_size
        );
        ensure!(
            block_size > NODE_HEADER_SIZE,
            "block size {} leaves no room after the {}-byte header",
            block_size,
            NODE_HEADER_SIZE
        );
        Ok(())
    }

    fn range_of(&self, block_no: u32) -> Result<std::ops::Range<usize>> {
        ensure!(
            block_no < self.block_count(),
            "block {} out of bounds (block_count={})",
            block_no,
            self.block_count()
        );
        let start = block_no as usize * self.block_size;
        Ok(start..start + self.block_size)
    }
}

impl BlockCache for MmapCache {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u32 {
        (self.map.len() / self.block_size) as u32
    }

    fn read_block(&mut self, block_no: u32, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() == self.block_size,
            "read buffer is {} bytes, block size is {}",
            buf.len(),
            self.block_size
        );
        let range = self.range_of(block_no)?;
        buf.copy_from_slice(&self.map[range]);
        Ok(())
    }

    fn write_block(&mut self, block_no: u32, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == self.block_size,
            "write of {} bytes, block size is {}",
            data.len(),
            self.block_size
        );
        let range = self.range_of(block_no)?;
        self.map[range].copy_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_maps_zeroed_blocks() {
        let dir = tempdir().unwrap();
        let mut cache = MmapCache::create(dir.path().join("blocks.db"), 64, 4).unwrap();

        let mut buf = [0xFFu8; 64];
        cache.read_block(3, &mut buf).unwrap();

        assert_eq!(buf, [0u8; 64]);
        assert_eq!(cache.block_count(), 4);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.db");
        let block = [0x3Cu8; 128];

        {
            let mut cache = MmapCache::create(&path, 128, 8).unwrap();
            cache.write_block(5, &block).unwrap();
            cache.sync().unwrap();
        }

        let mut cache = MmapCache::open(&path, 128).unwrap();
        let mut buf = [0u8; 128];
        cache.read_block(5, &mut buf).unwrap();
        assert_eq!(buf, block);
    }

    #[test]
    fn open_rejects_misaligned_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("odd.db");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        assert!(MmapCache::open(&path, 64).is_err());
    }

    #[test]
    fn open_rejects_missing_file() {
        let dir = tempdir().unwrap();
        assert!(MmapCache::open(dir.path().join("absent.db"), 64).is_err());
    }

    #[test]
    fn out_of_bounds_block_is_an_error() {
        let dir = tempdir().unwrap();
        let mut cache = MmapCache::create(dir.path().join("blocks.db"), 64, 2).unwrap();

        let mut buf = [0u8; 64];
        assert!(cache.read_block(2, &mut buf).is_err());
    }
}
