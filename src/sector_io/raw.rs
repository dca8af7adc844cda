//! Raw disk image backing: sector N lives at byte offset `N * 256` (spec
//! §4.1).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::{short_count, SectorIo, SECTOR_SIZE};
use crate::error::{OasisError, Result};
use crate::geometry::DiskGeometry;

pub struct RawImage {
    file: File,
    read_only: bool,
    total_sectors: u32,
}

impl RawImage {
    pub fn open(path: &Path, read_only: bool) -> Result<RawImage> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(RawImage {
            file,
            read_only,
            total_sectors: (len / SECTOR_SIZE as u64) as u32,
        })
    }

    /// Create a new, empty raw image of `total_sectors` logical sectors,
    /// used by `initdisk::build` (spec §4.7).
    pub fn create(path: &Path, total_sectors: u32) -> Result<RawImage> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total_sectors as u64 * SECTOR_SIZE as u64)?;
        Ok(RawImage {
            file,
            read_only: false,
            total_sectors,
        })
    }
}

impl SectorIo for RawImage {
    fn read(&mut self, lba: u32, n: u32, buf: &mut [u8]) -> Result<u32> {
        let to_read = short_count(lba, n, self.total_sectors);
        if to_read == 0 {
            return Ok(0);
        }
        self.file
            .seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64))?;
        self.file
            .read_exact(&mut buf[..to_read as usize * SECTOR_SIZE])?;
        Ok(to_read)
    }

    fn write(&mut self, lba: u32, n: u32, buf: &[u8]) -> Result<u32> {
        if self.read_only {
            return Err(OasisError::ReadOnly);
        }
        self.file
            .seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64))?;
        self.file.write_all(&buf[..n as usize * SECTOR_SIZE])?;
        self.file.flush()?;
        self.total_sectors = self.total_sectors.max(lba + n);
        Ok(n)
    }

    fn total_sectors(&self) -> u32 {
        self.total_sectors
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Raw backings have no track concept, so `sector_increment`/
    /// `track_skew` don't apply; just flat-fill every sector in range.
    fn low_level_format(
        &mut self,
        geometry: &DiskGeometry,
        pattern: u8,
        _sector_increment: u16,
        _track_skew: u16,
    ) -> Result<()> {
        let fill = [pattern; SECTOR_SIZE];
        for lba in 0..geometry.total_sectors() {
            self.write(lba, 1, &fill)?;
        }
        Ok(())
    }
}
