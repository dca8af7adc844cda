//! In-memory disk layout: header, allocation bitmap, and directory,
//! loaded from and flushed back to sector storage (spec §4.4).
//!
//! Ownership is a tree: `DiskLayout` owns the sector I/O handle, the
//! bitmap bytes, and the directory entries. No cycles, no shared state
//! outside this struct.

use crate::bitmap::{Bitmap, MAX_BYTES};
use crate::deb::{Deb, FileFormat, DEB_SIZE};
use crate::endian::{le16_read, le16_write};
use crate::error::{OasisError, Result};
use crate::geometry::DiskGeometry;
use crate::sector_io::{SectorIo, SECTOR_SIZE};

pub const HEADER_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub label: [u8; 8],
    pub timestamp: [u8; 3],
    pub backup_vol: [u8; 8],
    pub backup_timestamp: [u8; 3],
    /// Undocumented semantics (spec §9 open question); preserved verbatim.
    pub flags: u8,
    pub num_heads: u8,
    pub num_cyl: u8,
    pub num_sectors: u8,
    pub dir_sectors_max: u8,
    pub free_blocks: u16,
    pub fs_flags: u8,
}

impl Header {
    pub fn additional_am_sectors(&self) -> usize {
        (self.fs_flags & 0x07) as usize
    }

    pub fn write_protected(&self) -> bool {
        self.fs_flags & 0x80 != 0
    }

    /// Upper nibble of `num_heads`, authoritative per spec §9 (the lower
    /// nibble is a drive-type code, not part of the head count).
    pub fn heads(&self) -> u8 {
        self.num_heads >> 4
    }

    pub fn drive_type(&self) -> u8 {
        self.num_heads & 0x0F
    }

    pub fn geometry(&self) -> DiskGeometry {
        DiskGeometry::new(self.heads(), self.num_cyl as u16, self.num_sectors as u16)
    }

    pub fn unpack(bytes: &[u8; HEADER_SIZE]) -> Header {
        let mut label = [0u8; 8];
        label.copy_from_slice(&bytes[0..8]);
        let timestamp = [bytes[8], bytes[9], bytes[10]];
        let mut backup_vol = [0u8; 8];
        backup_vol.copy_from_slice(&bytes[11..19]);
        let backup_timestamp = [bytes[19], bytes[20], bytes[21]];

        Header {
            label,
            timestamp,
            backup_vol,
            backup_timestamp,
            flags: bytes[22],
            num_heads: bytes[23],
            num_cyl: bytes[24],
            num_sectors: bytes[25],
            dir_sectors_max: bytes[26],
            // bytes[27..29] reserved, always zero.
            free_blocks: le16_read(bytes, 29),
            fs_flags: bytes[31],
        }
    }

    pub fn pack(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..8].copy_from_slice(&self.label);
        out[8..11].copy_from_slice(&self.timestamp);
        out[11..19].copy_from_slice(&self.backup_vol);
        out[19..22].copy_from_slice(&self.backup_timestamp);
        out[22] = self.flags;
        out[23] = self.num_heads;
        out[24] = self.num_cyl;
        out[25] = self.num_sectors;
        out[26] = self.dir_sectors_max;
        le16_write(&mut out, 29, self.free_blocks);
        out[31] = self.fs_flags;
        out
    }
}

pub struct DiskLayout {
    io: Box<dyn SectorIo>,
    header: Header,
    bitmap: Bitmap,
    directory: Vec<Deb>,
}

impl DiskLayout {
    /// Load sequence per spec §4.4: boot sector is read but left opaque,
    /// the header and first bitmap chunk come from sector 1, any
    /// additional allocation-map sectors follow, then the directory.
    pub fn load(mut io: Box<dyn SectorIo>) -> Result<DiskLayout> {
        let mut boot = [0u8; SECTOR_SIZE];
        io.read(0, 1, &mut boot)?;

        let mut sector1 = [0u8; SECTOR_SIZE];
        if io.read(1, 1, &mut sector1)? != 1 {
            return Err(OasisError::InvalidImage("cannot read sector 1".into()));
        }
        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(&sector1[..HEADER_SIZE]);
        let header = Header::unpack(&header_bytes);

        let additional = header.additional_am_sectors();
        let bitmap_len = (SECTOR_SIZE - HEADER_SIZE) + additional * SECTOR_SIZE;
        if bitmap_len > MAX_BYTES {
            return Err(OasisError::InvalidImage(format!(
                "bitmap size {bitmap_len} exceeds maximum {MAX_BYTES}"
            )));
        }

        let mut bitmap_raw = vec![0u8; bitmap_len];
        bitmap_raw[..SECTOR_SIZE - HEADER_SIZE].copy_from_slice(&sector1[HEADER_SIZE..]);
        if additional > 0 {
            let mut extra = vec![0u8; additional * SECTOR_SIZE];
            if io.read(2, additional as u32, &mut extra)? as usize != additional {
                return Err(OasisError::InvalidImage("truncated allocation map".into()));
            }
            bitmap_raw[SECTOR_SIZE - HEADER_SIZE..].copy_from_slice(&extra);
        }

        let capacity_blocks = bitmap_len * 8;
        let geometry_blocks = header.geometry().total_blocks() as usize;
        let block_count = if geometry_blocks == 0 {
            capacity_blocks
        } else {
            geometry_blocks.min(capacity_blocks)
        };
        let bitmap = Bitmap::new(bitmap_raw, block_count)?;

        let dir_sectors = header.dir_sectors_max as u32;
        let dir_start_lba = 2 + additional as u32;
        let mut dir_raw = vec![0u8; dir_sectors as usize * SECTOR_SIZE];
        if dir_sectors > 0 && io.read(dir_start_lba, dir_sectors, &mut dir_raw)? != dir_sectors {
            return Err(OasisError::InvalidImage("truncated directory".into()));
        }

        let mut directory = Vec::with_capacity(dir_sectors as usize * 8);
        for chunk in dir_raw.chunks_exact(DEB_SIZE) {
            let mut arr = [0u8; DEB_SIZE];
            arr.copy_from_slice(chunk);
            directory.push(Deb::from_disk_bytes(&arr)?);
        }

        Ok(DiskLayout {
            io,
            header,
            bitmap,
            directory,
        })
    }

    /// Assemble a layout directly from already-computed parts, used by
    /// `initdisk::build` which constructs header/bitmap/directory in
    /// memory before any of it has ever been read back from disk.
    pub fn load_from_parts(
        io: Box<dyn SectorIo>,
        header: Header,
        bitmap: Bitmap,
        directory: Vec<Deb>,
    ) -> Result<DiskLayout> {
        Ok(DiskLayout {
            io,
            header,
            bitmap,
            directory,
        })
    }

    /// Write-back order (spec §4.4, §5): directory, then sector 1
    /// (header + first bitmap chunk), then the remaining bitmap sectors.
    pub fn flush(&mut self) -> Result<()> {
        let additional = self.header.additional_am_sectors();
        let dir_start_lba = 2 + additional as u32;
        let dir_sectors = self.header.dir_sectors_max as u32;

        if dir_sectors > 0 {
            let mut dir_raw = vec![0u8; self.directory.len() * DEB_SIZE];
            for (i, deb) in self.directory.iter().enumerate() {
                dir_raw[i * DEB_SIZE..(i + 1) * DEB_SIZE].copy_from_slice(&deb.to_disk_bytes());
            }
            self.io.write(dir_start_lba, dir_sectors, &dir_raw)?;
        }

        let mut sector1 = [0u8; SECTOR_SIZE];
        sector1[..HEADER_SIZE].copy_from_slice(&self.header.pack());
        sector1[HEADER_SIZE..].copy_from_slice(&self.bitmap.as_bytes()[..SECTOR_SIZE - HEADER_SIZE]);
        self.io.write(1, 1, &sector1)?;

        if additional > 0 {
            self.io
                .write(2, additional as u32, &self.bitmap.as_bytes()[SECTOR_SIZE - HEADER_SIZE..])?;
        }
        Ok(())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    pub fn bitmap_mut(&mut self) -> &mut Bitmap {
        &mut self.bitmap
    }

    pub fn directory(&self) -> &[Deb] {
        &self.directory
    }

    pub fn deb(&self, index: usize) -> Result<&Deb> {
        self.directory
            .get(index)
            .ok_or_else(|| OasisError::InvalidArgument(format!("DEB index {index} out of range")))
    }

    pub fn deb_mut(&mut self, index: usize) -> Result<&mut Deb> {
        self.directory
            .get_mut(index)
            .ok_or_else(|| OasisError::InvalidArgument(format!("DEB index {index} out of range")))
    }

    pub fn io_mut(&mut self) -> &mut dyn SectorIo {
        self.io.as_mut()
    }

    /// Keep `free_blocks` consistent with the bitmap (spec invariant 2),
    /// to be called after any bitmap mutation, before flushing.
    pub fn sync_free_blocks(&mut self) {
        self.header.free_blocks = self.bitmap.count_free() as u16;
    }

    /// First slot whose format is `Empty` or `Deleted`, used by copy/write
    /// operations that need a free directory entry (spec §4.6).
    pub fn find_reusable_slot(&self) -> Option<usize> {
        self.directory
            .iter()
            .position(|d| matches!(d.format, FileFormat::Empty | FileFormat::Deleted))
    }

    /// Find a valid DEB by exact owner + name + type, used by the
    /// "overwrite an existing file" path of copy (spec §4.6 step 4).
    pub fn find_exact(&self, owner_id: u8, name: [u8; 8], file_type: [u8; 8]) -> Option<usize> {
        self.directory.iter().position(|d| {
            d.is_valid() && d.owner_id == owner_id && d.name == name && d.file_type == file_type
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector_io::RawImage;

    fn build_blank_image(dir_sectors: u8) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.dsk");
        // geometry: 1 head, 77 cyl, 26 sec/track -> 2002 sectors, 500 blocks.
        let total_sectors = 2002u32;
        let mut io = RawImage::create(&path, total_sectors).unwrap();

        let header = Header {
            label: *b"TESTVOL ",
            timestamp: [0; 3],
            backup_vol: *b"        ",
            backup_timestamp: [0; 3],
            flags: 0,
            num_heads: 1 << 4,
            num_cyl: 77,
            num_sectors: 26,
            dir_sectors_max: dir_sectors,
            free_blocks: 0,
            fs_flags: 0, // 0 additional AM sectors
        };
        let mut sector1 = [0u8; SECTOR_SIZE];
        sector1[..HEADER_SIZE].copy_from_slice(&header.pack());
        io.write(1, 1, &sector1).unwrap();

        let dir_bytes = vec![0u8; dir_sectors as usize * SECTOR_SIZE];
        if dir_sectors > 0 {
            io.write(2, dir_sectors as u32, &dir_bytes).unwrap();
        }
        (dir, path)
    }

    #[test]
    fn load_parses_header_bitmap_and_directory() {
        let (_dir, path) = build_blank_image(4);
        let io = RawImage::open(&path, false).unwrap();
        let layout = DiskLayout::load(Box::new(io)).unwrap();

        assert_eq!(layout.header().geometry().total_blocks(), 500);
        assert_eq!(layout.bitmap().block_count(), 500);
        assert_eq!(layout.directory().len(), 32); // 4 sectors * 8 DEBs
        assert!(layout.directory().iter().all(|d| !d.is_valid()));
    }

    #[test]
    fn flush_then_reload_round_trips() {
        let (_dir, path) = build_blank_image(2);
        let io = RawImage::open(&path, false).unwrap();
        let mut layout = DiskLayout::load(Box::new(io)).unwrap();

        layout.bitmap_mut().allocate(10).unwrap();
        layout.sync_free_blocks();
        let new_deb = Deb::parse_host_filename("HELLO.TXT_S").unwrap();
        *layout.deb_mut(0).unwrap() = crate::deb::Deb {
            format: FileFormat::Sequential {
                attrs: Default::default(),
                longest_record: 0,
                last_lba: 0,
            },
            ..new_deb
        };
        layout.flush().unwrap();

        let io2 = RawImage::open(&path, false).unwrap();
        let reloaded = DiskLayout::load(Box::new(io2)).unwrap();
        assert_eq!(reloaded.bitmap().count_free(), 490);
        assert!(reloaded.deb(0).unwrap().is_valid());
        assert_eq!(reloaded.header().free_blocks, 490);
    }

    #[test]
    fn truncated_allocation_map_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.dsk");
        // Only 3 sectors total, but fs_flags claims 7 additional AM
        // sectors (2..9) -> the read for sectors 2..9 comes back short.
        let mut io = RawImage::create(&path, 3).unwrap();
        let header = Header {
            label: *b"TINY    ",
            timestamp: [0; 3],
            backup_vol: *b"        ",
            backup_timestamp: [0; 3],
            flags: 0,
            num_heads: 1 << 4,
            num_cyl: 1,
            num_sectors: 1,
            dir_sectors_max: 0,
            free_blocks: 0,
            fs_flags: 7,
        };
        let mut sector1 = [0u8; SECTOR_SIZE];
        sector1[..HEADER_SIZE].copy_from_slice(&header.pack());
        io.write(1, 1, &sector1).unwrap();

        let io = RawImage::open(&path, true).unwrap();
        assert!(DiskLayout::load(Box::new(io)).is_err());
    }
}
