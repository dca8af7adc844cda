//! ImageDisk (IMD) backing: a track-centric container where each track
//! carries a uniform physical sector size of 128 or 256 bytes, with two
//! 128-byte physical sectors combining into one 256-byte logical sector
//! (spec §4.1).

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use super::{SectorIo, SECTOR_SIZE};
use crate::error::{OasisError, Result};
use crate::geometry::DiskGeometry;

const COMMENT_TERMINATOR: u8 = 0x1A;

struct Track {
    sector_size: usize,
    /// Declared logical sector id for each physical position, preserving
    /// interleave order.
    smap: Vec<u8>,
    /// Physical sector payloads, one per `smap` entry, already zero-filled
    /// for unavailable/data-error sectors at parse time.
    sectors: Vec<Vec<u8>>,
}

impl Track {
    fn logical_sectors(&self) -> u32 {
        if self.sector_size == 256 {
            self.smap.len() as u32
        } else {
            (self.smap.len() / 2) as u32
        }
    }

    /// Locate the physical sector(s) backing logical index `n` (0-based,
    /// relative to this track) and return their combined 256-byte slice.
    fn read_logical(&self, n: u32) -> Result<[u8; SECTOR_SIZE]> {
        let mut out = [0u8; SECTOR_SIZE];
        if self.sector_size == 256 {
            out.copy_from_slice(&self.sectors[n as usize]);
        } else {
            let first_id = 2 * n + 1;
            let second_id = 2 * n + 2;
            let p1 = self.find_physical(first_id)?;
            let p2 = self.find_physical(second_id)?;
            out[..128].copy_from_slice(&self.sectors[p1]);
            out[128..].copy_from_slice(&self.sectors[p2]);
        }
        Ok(out)
    }

    fn write_logical(&mut self, n: u32, data: &[u8; SECTOR_SIZE]) -> Result<()> {
        if self.sector_size == 256 {
            self.sectors[n as usize].copy_from_slice(data);
        } else {
            let p1 = self.find_physical(2 * n + 1)?;
            let p2 = self.find_physical(2 * n + 2)?;
            self.sectors[p1].copy_from_slice(&data[..128]);
            self.sectors[p2].copy_from_slice(&data[128..]);
        }
        Ok(())
    }

    fn find_physical(&self, id: u32) -> Result<usize> {
        self.smap
            .iter()
            .position(|&s| s as u32 == id)
            .ok_or_else(|| OasisError::InvalidImage(format!("sector id {id} not present on track")))
    }
}

/// Physical-position -> logical sector id map for one track, honoring a
/// fixed `sector_increment` interleave and a per-track rotational `skew`
/// (spec §4.7 "FORMAT"). First sector id is 1.
fn interleaved_smap(sectors_per_track: u16, sector_increment: u16, skew: u16) -> Vec<u8> {
    let n = sectors_per_track as usize;
    if n == 0 {
        return Vec::new();
    }
    let increment = (sector_increment as usize % n).max(1);

    let mut smap = vec![0u8; n];
    let mut slot = 0usize;
    for id in 1..=n {
        while smap[slot] != 0 {
            slot = (slot + 1) % n;
        }
        smap[slot] = id as u8;
        slot = (slot + increment) % n;
    }

    let skew = skew as usize % n;
    (0..n).map(|p| smap[(p + skew) % n]).collect()
}

/// Build a fresh track table for `geometry`, one track per (cylinder,
/// head), every physical sector filled with `pattern`.
fn format_tracks(geometry: &DiskGeometry, pattern: u8, sector_increment: u16, track_skew: u16) -> Vec<Track> {
    let mut tracks = Vec::new();
    for cyl in 0..geometry.cylinders {
        let skew = geometry.track_skew(track_skew, cyl);
        let smap = interleaved_smap(geometry.sectors_per_track, sector_increment, skew);
        let sectors = vec![vec![pattern; 256]; smap.len()];
        for _head in 0..geometry.heads {
            tracks.push(Track {
                sector_size: 256,
                smap: smap.clone(),
                sectors: sectors.clone(),
            });
        }
    }
    tracks
}

pub struct ImdImage {
    tracks: Vec<Track>,
    total_sectors: u32,
    read_only: bool,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Result<u8> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| OasisError::InvalidImage("truncated IMD track header".into()))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| OasisError::InvalidImage("truncated IMD sector data".into()))?;
        self.pos = end;
        Ok(slice)
    }

    fn remaining(&self) -> bool {
        self.pos < self.bytes.len()
    }
}

fn sector_size_for_code(code: u8) -> Result<usize> {
    match code {
        0 => Ok(128),
        1 => Ok(256),
        2 => Ok(512),
        3 => Ok(1024),
        4 => Ok(2048),
        5 => Ok(4096),
        6 => Ok(8192),
        other => Err(OasisError::InvalidImage(format!(
            "unknown IMD sector size code {other}"
        ))),
    }
}

fn parse_tracks(bytes: &[u8]) -> Result<Vec<Track>> {
    let comment_end = bytes
        .iter()
        .position(|&b| b == COMMENT_TERMINATOR)
        .ok_or_else(|| OasisError::InvalidImage("missing IMD comment terminator".into()))?;
    let mut r = Reader {
        bytes,
        pos: comment_end + 1,
    };

    let mut tracks = Vec::new();
    while r.remaining() {
        let _mode = r.byte()?;
        let _cylinder = r.byte()?;
        let head_byte = r.byte()?;
        let num_sectors = r.byte()? as usize;
        let size_code = r.byte()?;
        let sector_size = sector_size_for_code(size_code)?;

        if sector_size != 128 && sector_size != 256 {
            return Err(OasisError::InvalidImage(format!(
                "unsupported IMD sector size {sector_size} (only 128/256 supported)"
            )));
        }
        if sector_size == 128 && num_sectors % 2 != 0 {
            return Err(OasisError::InvalidImage(
                "track has an odd count of 128-byte sectors".into(),
            ));
        }

        let smap = r.take(num_sectors)?.to_vec();
        if head_byte & 0x80 != 0 {
            r.take(num_sectors)?; // optional cylinder map, unused
        }
        if head_byte & 0x40 != 0 {
            r.take(num_sectors)?; // optional head map, unused
        }

        let mut sectors = Vec::with_capacity(num_sectors);
        for _ in 0..num_sectors {
            let record_type = r.byte()?;
            let data = match record_type {
                0 => vec![0u8; sector_size],
                1 | 3 => r.take(sector_size)?.to_vec(),
                2 | 4 => vec![r.byte()?; sector_size],
                5 | 7 => {
                    r.take(sector_size)?;
                    vec![0u8; sector_size]
                }
                6 | 8 => {
                    r.byte()?;
                    vec![0u8; sector_size]
                }
                other => {
                    return Err(OasisError::InvalidImage(format!(
                        "unknown IMD sector record type {other}"
                    )))
                }
            };
            sectors.push(data);
        }

        tracks.push(Track {
            sector_size,
            smap,
            sectors,
        });
    }

    Ok(tracks)
}

impl ImdImage {
    pub fn open(path: &Path, read_only: bool) -> Result<ImdImage> {
        let bytes = fs::read(path)?;
        let tracks = parse_tracks(&bytes)?;
        let total_sectors = tracks.iter().map(Track::logical_sectors).sum();
        Ok(ImdImage {
            tracks,
            total_sectors,
            read_only,
        })
    }

    /// Locate the (track, within-track logical index) for a global LBA.
    fn locate(&self, lba: u32) -> Option<(usize, u32)> {
        let mut remaining = lba;
        for (i, t) in self.tracks.iter().enumerate() {
            let count = t.logical_sectors();
            if remaining < count {
                return Some((i, remaining));
            }
            remaining -= count;
        }
        None
    }
}

impl SectorIo for ImdImage {
    fn read(&mut self, lba: u32, n: u32, buf: &mut [u8]) -> Result<u32> {
        let mut done = 0u32;
        for i in 0..n {
            let Some((ti, within)) = self.locate(lba + i) else {
                break;
            };
            let sector = self.tracks[ti].read_logical(within)?;
            let off = done as usize * SECTOR_SIZE;
            buf[off..off + SECTOR_SIZE].copy_from_slice(&sector);
            done += 1;
        }
        Ok(done)
    }

    fn write(&mut self, lba: u32, n: u32, buf: &[u8]) -> Result<u32> {
        if self.read_only {
            return Err(OasisError::ReadOnly);
        }
        let mut done = 0u32;
        for i in 0..n {
            let Some((ti, within)) = self.locate(lba + i) else {
                break;
            };
            let off = done as usize * SECTOR_SIZE;
            let mut sector = [0u8; SECTOR_SIZE];
            sector.copy_from_slice(&buf[off..off + SECTOR_SIZE]);
            self.tracks[ti].write_logical(within, &sector)?;
            done += 1;
        }
        Ok(done)
    }

    fn total_sectors(&self) -> u32 {
        self.total_sectors
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn low_level_format(
        &mut self,
        geometry: &DiskGeometry,
        pattern: u8,
        sector_increment: u16,
        track_skew: u16,
    ) -> Result<()> {
        if self.read_only {
            return Err(OasisError::ReadOnly);
        }
        self.tracks = format_tracks(geometry, pattern, sector_increment, track_skew);
        self.total_sectors = self.tracks.iter().map(Track::logical_sectors).sum();
        Ok(())
    }
}

/// Build a minimal IMD byte stream with a single 256-byte-sector track;
/// used only by tests.
#[cfg(test)]
fn synth_256_track(num_sectors: u8) -> Vec<u8> {
    let mut out = vec![COMMENT_TERMINATOR];
    out.push(0); // mode
    out.push(0); // cylinder
    out.push(0); // head, no optional maps
    out.push(num_sectors);
    out.push(1); // size code 1 = 256 bytes
    for id in 1..=num_sectors {
        out.push(id);
    }
    for id in 1..=num_sectors {
        out.push(1); // record type 1 = normal data
        out.extend(std::iter::repeat(id).take(SECTOR_SIZE));
    }
    out
}

#[cfg(test)]
fn write_temp_imd(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.imd");
    File::create(&path).unwrap().write_all(bytes).unwrap();
    (dir, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_track_256_round_trip() {
        let bytes = synth_256_track(4);
        let (_dir, path) = write_temp_imd(&bytes);
        let mut img = ImdImage::open(&path, false).unwrap();
        assert_eq!(img.total_sectors(), 4);

        let mut buf = [0u8; SECTOR_SIZE];
        img.read(2, 1, &mut buf).unwrap();
        assert_eq!(buf[0], 3); // sector id 3 (0-based lba 2 -> id 3)

        let mut new_sector = [0xAAu8; SECTOR_SIZE];
        img.write(0, 1, &mut new_sector).unwrap();
        img.read(0, 1, &mut buf).unwrap();
        assert_eq!(buf, new_sector);
    }

    #[test]
    fn rejects_odd_count_of_128_byte_sectors() {
        let mut out = vec![COMMENT_TERMINATOR];
        out.push(0);
        out.push(0);
        out.push(0);
        out.push(3); // odd
        out.push(0); // size code 0 = 128 bytes
        out.extend([1u8, 2, 3]);
        for id in 1..=3u8 {
            out.push(1);
            out.extend(std::iter::repeat(id).take(128));
        }
        let (_dir, path) = write_temp_imd(&out);
        assert!(ImdImage::open(&path, false).is_err());
    }

    #[test]
    fn rejects_unsupported_sector_size() {
        let mut out = vec![COMMENT_TERMINATOR];
        out.push(0);
        out.push(0);
        out.push(0);
        out.push(2);
        out.push(2); // size code 2 = 512 bytes, unsupported
        out.extend([1u8, 2]);
        for id in 1..=2u8 {
            out.push(1);
            out.extend(std::iter::repeat(id).take(512));
        }
        let (_dir, path) = write_temp_imd(&out);
        assert!(ImdImage::open(&path, false).is_err());
    }

    #[test]
    fn data_error_sector_reads_as_zero() {
        let mut out = vec![COMMENT_TERMINATOR];
        out.push(0);
        out.push(0);
        out.push(0);
        out.push(1);
        out.push(1); // 256 bytes
        out.push(1); // smap: id 1
        out.push(5); // record type 5 = normal with data error
        out.extend([0x42u8; SECTOR_SIZE]);
        let (_dir, path) = write_temp_imd(&out);
        let mut img = ImdImage::open(&path, false).unwrap();
        let mut buf = [0xFFu8; SECTOR_SIZE];
        img.read(0, 1, &mut buf).unwrap();
        assert_eq!(buf, [0u8; SECTOR_SIZE]);
    }

    #[test]
    fn read_only_rejects_write() {
        let bytes = synth_256_track(1);
        let (_dir, path) = write_temp_imd(&bytes);
        let mut img = ImdImage::open(&path, true).unwrap();
        let sector = [0u8; SECTOR_SIZE];
        assert!(img.write(0, 1, &sector).is_err());
    }

    #[test]
    fn interleaved_smap_is_a_permutation_of_sector_ids() {
        let smap = interleaved_smap(26, 2, 0);
        let mut sorted = smap.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (1..=26).collect::<Vec<u8>>());
    }

    #[test]
    fn low_level_format_rebuilds_track_table_with_skew() {
        let bytes = synth_256_track(1);
        let (_dir, path) = write_temp_imd(&bytes);
        let mut img = ImdImage::open(&path, false).unwrap();

        let geometry = DiskGeometry::new(1, 3, 5);
        img.low_level_format(&geometry, 0xE5, 2, 3).unwrap();
        assert_eq!(img.total_sectors(), 15);
        assert_eq!(img.tracks.len(), 3);

        // cylinder 0 has zero skew, so sector id 1 sits at physical slot 0.
        assert_eq!(img.tracks[0].smap[0], 1);
        // cylinder 1's skew (3*1 mod 5 = 3) rotates the same base map.
        assert_ne!(img.tracks[0].smap, img.tracks[1].smap);

        let mut buf = [0u8; SECTOR_SIZE];
        img.read(0, 1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xE5));
    }

    #[test]
    fn low_level_format_rejects_read_only() {
        let bytes = synth_256_track(1);
        let (_dir, path) = write_temp_imd(&bytes);
        let mut img = ImdImage::open(&path, true).unwrap();
        let geometry = DiskGeometry::new(1, 1, 1);
        assert!(img.low_level_format(&geometry, 0xE5, 1, 0).is_err());
    }

    #[test]
    fn two_128_byte_sectors_combine_into_one_logical() {
        let mut out = vec![COMMENT_TERMINATOR];
        out.push(0);
        out.push(0);
        out.push(0);
        out.push(2);
        out.push(0); // 128 bytes
        out.extend([1u8, 2]); // smap
        out.push(1);
        out.extend([0xAAu8; 128]);
        out.push(1);
        out.extend([0xBBu8; 128]);
        let (_dir, path) = write_temp_imd(&out);
        let mut img = ImdImage::open(&path, false).unwrap();
        assert_eq!(img.total_sectors(), 1);
        let mut buf = [0u8; SECTOR_SIZE];
        img.read(0, 1, &mut buf).unwrap();
        assert_eq!(&buf[..128], &[0xAAu8; 128][..]);
        assert_eq!(&buf[128..], &[0xBBu8; 128][..]);
    }
}
