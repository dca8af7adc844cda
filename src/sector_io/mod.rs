//! Uniform 256-byte logical sector interface over raw and IMD-backed disk
//! images (spec §4.1).

mod imd;
mod raw;

pub use imd::ImdImage;
pub use raw::RawImage;

use std::path::Path;

use crate::error::Result;
use crate::geometry::DiskGeometry;

pub const SECTOR_SIZE: usize = 256;

/// Uniform contract every backing format implements. `read`/`write`
/// operate in units of logical 256 B sectors; both return the number of
/// sectors actually transferred, which can be short of `n` when `lba + n`
/// runs past `total_sectors`.
pub trait SectorIo {
    fn read(&mut self, lba: u32, n: u32, buf: &mut [u8]) -> Result<u32>;
    fn write(&mut self, lba: u32, n: u32, buf: &[u8]) -> Result<u32>;
    fn total_sectors(&self) -> u32;
    fn is_read_only(&self) -> bool;

    /// Low-level format (spec §4.7 "FORMAT"): fill every sector with
    /// `pattern`. A raw backing just overwrites every LBA in `geometry`'s
    /// range; an IMD backing additionally rebuilds its track table so the
    /// physical sector-id map reflects `sector_increment` interleave and
    /// the `track_skew * cyl mod sectors_per_track` per-cylinder skew,
    /// first sector id 1.
    fn low_level_format(
        &mut self,
        geometry: &DiskGeometry,
        pattern: u8,
        sector_increment: u16,
        track_skew: u16,
    ) -> Result<()>;
}

/// Open `path` for sector I/O, selecting the backing by extension: a
/// case-insensitive `.imd` suffix selects the ImageDisk backing, anything
/// else is treated as a raw image.
pub fn open(path: &Path, read_only: bool) -> Result<Box<dyn SectorIo>> {
    let is_imd = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("imd"))
        .unwrap_or(false);

    if is_imd {
        Ok(Box::new(ImdImage::open(path, read_only)?))
    } else {
        Ok(Box::new(RawImage::open(path, read_only)?))
    }
}

pub(crate) fn short_count(lba: u32, n: u32, total: u32) -> u32 {
    if lba >= total {
        0
    } else {
        n.min(total - lba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn open_selects_backing_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let raw_path = dir.path().join("image.dsk");
        std::fs::File::create(&raw_path)
            .unwrap()
            .write_all(&[0u8; SECTOR_SIZE * 2])
            .unwrap();
        let io = open(&raw_path, true).unwrap();
        assert_eq!(io.total_sectors(), 2);

        let imd_path = dir.path().join("image.IMD");
        let mut f = std::fs::File::create(&imd_path).unwrap();
        f.write_all(&[0x1A]).unwrap(); // empty comment, just the terminator
        drop(f);
        assert!(open(&imd_path, true).is_ok());
    }

    #[test]
    fn short_count_clamps_at_eof() {
        assert_eq!(short_count(0, 4, 10), 4);
        assert_eq!(short_count(8, 4, 10), 2);
        assert_eq!(short_count(10, 4, 10), 0);
        assert_eq!(short_count(20, 4, 10), 0);
    }
}
