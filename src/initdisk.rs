//! Low-level format and fresh filesystem initialization (spec §4.7).

use serde::{Deserialize, Serialize};

use crate::deb::Deb;
use crate::error::{OasisError, Result};
use crate::geometry::DiskGeometry;
use crate::layout::{DiskLayout, Header, HEADER_SIZE};
use crate::sector_io::{SectorIo, SECTOR_SIZE};
use crate::timestamp::Timestamp;

pub const MAX_BLOCKS: usize = crate::bitmap::MAX_BLOCKS;
pub const FILL_PATTERN: u8 = 0xE5;

/// Geometry and directory-size inputs to FORMAT/BUILD (spec §4.7),
/// `serde`-deserializable so a CLI/config layer outside this crate can
/// populate it from TOML or flags (spec §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InitdiskOptions {
    pub heads: u8,
    pub tracks_per_surface: u16,
    pub sectors_per_track: u16,
    pub sector_increment: u16,
    pub track_skew: u16,
    pub dir_size: u8,
}

/// Low-level format: fill every sector with `FILL_PATTERN`, then proceed
/// to `build` (spec §4.7 "FORMAT"). `io` must already be sized for the
/// requested geometry (raw images via `RawImage::create`, IMD images via
/// `ImdImage::open`, whose track table this rebuilds in place). The
/// backing itself decides what "format" means: a flat fill for raw
/// images, a fresh interleaved track table for IMD images honoring
/// `sector_increment`/`track_skew`.
pub fn format(io: &mut dyn SectorIo, options: &InitdiskOptions) -> Result<()> {
    let geometry = DiskGeometry::new(options.heads, options.tracks_per_surface, options.sectors_per_track);
    log::info!(
        "formatting {} sectors with fill pattern {FILL_PATTERN:#04x}",
        geometry.total_sectors()
    );
    io.low_level_format(&geometry, FILL_PATTERN, options.sector_increment, options.track_skew)
}

/// Initialize filesystem structures without a low-level format (spec
/// §4.7 "BUILD").
pub fn build(mut io: Box<dyn SectorIo>, options: &InitdiskOptions, label: &str) -> Result<DiskLayout> {
    let geometry = DiskGeometry::new(options.heads, options.tracks_per_surface, options.sectors_per_track);
    let total_blocks = geometry.total_blocks() as usize;
    if total_blocks > MAX_BLOCKS {
        return Err(OasisError::InvalidImage(format!(
            "{total_blocks} total blocks exceeds the {MAX_BLOCKS}-block maximum"
        )));
    }

    let bitmap_bytes = total_blocks.div_ceil(8);
    let additional_am_sectors = if bitmap_bytes <= SECTOR_SIZE - HEADER_SIZE {
        0
    } else {
        (bitmap_bytes - (SECTOR_SIZE - HEADER_SIZE)).div_ceil(SECTOR_SIZE)
    };
    if additional_am_sectors > 7 {
        return Err(OasisError::InvalidImage(format!(
            "{additional_am_sectors} additional allocation-map sectors exceeds the 7-sector maximum"
        )));
    }

    let dir_sectors = options.dir_size.div_ceil(8).max(1);
    // Sectors 0,1 (boot + header/first AM chunk), the additional AM
    // sectors, and the directory sectors are all system-reserved; mark
    // every block touched by that range (spec §3 invariant 3).
    let last_system_sector = 1 + additional_am_sectors + dir_sectors as usize;
    let last_system_block = last_system_sector / 4;

    let mut bitmap_raw = vec![0u8; (SECTOR_SIZE - HEADER_SIZE) + additional_am_sectors * SECTOR_SIZE];
    let mut bitmap = crate::bitmap::Bitmap::new(bitmap_raw.clone(), total_blocks)?;
    for block in 0..=last_system_block.min(total_blocks.saturating_sub(1)) {
        bitmap.set_bit(block, true)?;
    }
    bitmap_raw.copy_from_slice(bitmap.as_bytes());

    let system_allocated = total_blocks - bitmap.count_free();
    let free_blocks = (total_blocks - system_allocated) as u16;

    let header = Header {
        label: pad8(label),
        timestamp: Timestamp::now().pack().unwrap_or([0; 3]),
        backup_vol: *b"        ",
        backup_timestamp: [0; 3],
        flags: 0,
        num_heads: (options.heads << 4) & 0xF0,
        num_cyl: options.tracks_per_surface as u8,
        num_sectors: options.sectors_per_track as u8,
        dir_sectors_max: dir_sectors,
        free_blocks,
        fs_flags: additional_am_sectors as u8,
    };

    log::debug!(
        "build: {total_blocks} blocks, {additional_am_sectors} additional AM sectors, {dir_sectors} directory sectors"
    );

    io.write(0, 1, &[0u8; SECTOR_SIZE])?;

    let mut sector1 = [0u8; SECTOR_SIZE];
    sector1[..HEADER_SIZE].copy_from_slice(&header.pack());
    sector1[HEADER_SIZE..].copy_from_slice(&bitmap_raw[..SECTOR_SIZE - HEADER_SIZE]);
    io.write(1, 1, &sector1)?;

    if additional_am_sectors > 0 {
        io.write(2, additional_am_sectors as u32, &bitmap_raw[SECTOR_SIZE - HEADER_SIZE..])?;
    }

    let dir_raw = vec![0u8; dir_sectors as usize * SECTOR_SIZE];
    let dir_start_lba = 2 + additional_am_sectors as u32;
    if dir_sectors > 0 {
        io.write(dir_start_lba, dir_sectors as u32, &dir_raw)?;
    }

    DiskLayout::load_from_parts(io, header, bitmap, vec![Deb::empty(); dir_sectors as usize * 8])
}

/// Reload the existing layout, zero the bitmap, re-mark system blocks,
/// recompute `free_blocks`, empty every DEB, and flush (spec §4.7
/// "CLEAR").
pub fn clear(layout: &mut DiskLayout) -> Result<()> {
    log::info!("clearing filesystem: re-zeroing bitmap and directory");
    let additional = layout.header().additional_am_sectors();
    let dir_sectors = layout.header().dir_sectors_max as usize;
    let block_count = layout.bitmap().block_count();

    let last_system_sector = 1 + additional + dir_sectors;
    let last_system_block = (last_system_sector / 4).min(block_count.saturating_sub(1));

    *layout.bitmap_mut() = crate::bitmap::Bitmap::zeroed(layout.bitmap().as_bytes().len(), block_count)?;
    for block in 0..=last_system_block {
        layout.bitmap_mut().set_bit(block, true)?;
    }
    layout.sync_free_blocks();

    for i in 0..layout.directory().len() {
        *layout.deb_mut(i)? = Deb::empty();
    }
    layout.flush()
}

/// Rewrite sector 1 with a new label and the current timestamp (spec
/// §4.7 "LABEL").
pub fn label(layout: &mut DiskLayout, new_label: &str) -> Result<()> {
    layout.header_mut().label = pad8(new_label);
    layout.header_mut().timestamp = Timestamp::now().pack().unwrap_or([0; 3]);
    layout.flush()
}

/// Set or clear the software write-protect bit (spec §4.7 "WP"/"NOWP").
pub fn set_write_protect(layout: &mut DiskLayout, protected: bool) -> Result<()> {
    let fs_flags = layout.header().fs_flags;
    layout.header_mut().fs_flags = if protected {
        fs_flags | 0x80
    } else {
        fs_flags & !0x80
    };
    layout.flush()
}

fn pad8(s: &str) -> [u8; 8] {
    let upper = s.to_ascii_uppercase();
    let mut out = [b' '; 8];
    let n = upper.len().min(8);
    out[..n].copy_from_slice(&upper.as_bytes()[..n]);
    out
}
