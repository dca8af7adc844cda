//! Compound directory operations: erase, rename, copy (spec §4.6).

use crate::ascii::{host_to_oasis, is_seven_bit_ascii, SUB};
use crate::deb::{Attrs, Deb, FileFormat};
use crate::error::{OasisError, Result};
use crate::file_io::{write_contiguous, write_sequential};
use crate::layout::DiskLayout;
use crate::timestamp::Timestamp;
use crate::wildcard;

/// Deallocate every block belonging to `index`'s DEB and mark it deleted,
/// preserving its other fields (spec §4.6 "Erase").
pub fn erase(layout: &mut DiskLayout, index: usize) -> Result<()> {
    let deb = *layout.deb(index)?;
    if !deb.is_valid() {
        return Err(OasisError::NotFound(format!("DEB {index} is not a live file")));
    }

    log::debug!("erasing DEB {index} ({})", deb.format_host_filename());
    let block_count = deb.block_count;
    match deb.format {
        FileFormat::Sequential { .. } => {
            let mut blocks = Vec::new();
            let mut lba = deb.start_sector as u32;
            let max_sectors = deb.block_count as u32 * 4;
            let mut visited = 0u32;
            while lba != 0 && visited < max_sectors {
                let block = lba / 4;
                if !blocks.contains(&block) {
                    blocks.push(block);
                }
                let mut sector = [0u8; crate::sector_io::SECTOR_SIZE];
                layout.io_mut().read(lba, 1, &mut sector)?;
                lba = crate::endian::le16_read(&sector, crate::sector_io::SECTOR_SIZE - 2) as u32;
                visited += 1;
            }
            for block in blocks {
                layout.bitmap_mut().deallocate(block as usize, 1)?;
            }
        }
        _ => {
            if block_count > 0 {
                layout
                    .bitmap_mut()
                    .deallocate(deb.start_sector as usize / 4, block_count as usize)?;
            }
        }
    }

    layout.header_mut().free_blocks = layout.header().free_blocks.saturating_add(block_count);
    layout.deb_mut(index)?.format = FileFormat::Deleted;
    Ok(())
}

/// Overwrite name/type on an existing DEB, preserving the timestamp.
/// Collision and ambiguity checks are the caller's responsibility (spec
/// §4.6 "Rename" steps 1-2).
pub fn rename(layout: &mut DiskLayout, index: usize, new_name: &str, new_type: &str) -> Result<()> {
    if new_name.len() > 8 || new_type.len() > 8 {
        return Err(OasisError::InvalidArgument(
            "name/type must each be at most 8 characters".into(),
        ));
    }
    let deb = layout.deb_mut(index)?;
    if !deb.is_valid() {
        return Err(OasisError::NotFound(format!("DEB {index} is not a live file")));
    }
    deb.name = pad8(new_name);
    deb.file_type = pad8(new_type);
    Ok(())
}

fn pad8(s: &str) -> [u8; 8] {
    let upper = s.to_ascii_uppercase();
    let mut out = [b' '; 8];
    out[..upper.len()].copy_from_slice(upper.as_bytes());
    out
}

/// Find the unique valid DEB whose host filename matches `pattern`,
/// optionally scoped to `owner_id_filter`. Used by rename's ambiguity
/// check and by copy's "does this file already exist" lookup.
pub fn find_unique(
    layout: &DiskLayout,
    pattern: &str,
    owner_id_filter: Option<u8>,
) -> Result<usize> {
    let matches: Vec<usize> = layout
        .directory()
        .iter()
        .enumerate()
        .filter(|(_, d)| {
            d.is_valid()
                && owner_id_filter.map(|o| o == d.owner_id).unwrap_or(true)
                && wildcard::matches(pattern, &d.format_host_filename())
        })
        .map(|(i, _)| i)
        .collect();

    match matches.len() {
        0 => Err(OasisError::NotFound(format!("no file matches \"{pattern}\""))),
        1 => Ok(matches[0]),
        n => Err(OasisError::Ambiguous(n)),
    }
}

pub struct CopyOptions {
    pub owner_id: u8,
    pub ascii_conversion: bool,
    pub target_name_override: Option<(String, String)>,
}

/// Copy a host byte buffer into the disk image as a new (or replacing)
/// sequential file (spec §4.6 "Copy host→disk").
pub fn copy_from_host(
    layout: &mut DiskLayout,
    host_basename: &str,
    host_bytes: &[u8],
    options: &CopyOptions,
) -> Result<usize> {
    let (name, file_type) = match &options.target_name_override {
        Some((n, t)) => (n.clone(), t.clone()),
        None => split_basename(host_basename),
    };
    let name_bytes = pad8(&name);
    let type_bytes = pad8(&file_type);

    let (payload, longest_line) = if options.ascii_conversion && is_seven_bit_ascii(host_bytes) {
        host_to_oasis(host_bytes)
    } else {
        (host_bytes.to_vec(), 0)
    };
    let longest_record = if longest_line == 0 { 256 } else { longest_line as u16 };

    let reused_slot = layout.find_exact(options.owner_id, name_bytes, type_bytes);
    if let Some(existing) = reused_slot {
        erase(layout, existing)?;
        layout.flush()?;
    }

    let blocks_needed = payload.len().div_ceil(1024);
    if (blocks_needed as u16 as usize) != blocks_needed
        || layout.header().free_blocks < blocks_needed as u16
    {
        return Err(OasisError::OutOfSpace);
    }

    let slot = match reused_slot {
        Some(existing) => existing,
        None => layout
            .find_reusable_slot()
            .ok_or_else(|| OasisError::InvalidArgument("no free directory slot".into()))?,
    };
    log::info!("copying {host_basename} into slot {slot} ({blocks_needed} blocks)");

    {
        let deb = layout.deb_mut(slot)?;
        deb.name = name_bytes;
        deb.file_type = type_bytes;
        deb.owner_id = options.owner_id;
        deb.timestamp = Timestamp::now().pack().unwrap_or([0; 3]);
        deb.format = FileFormat::Sequential {
            attrs: Attrs::default(),
            longest_record,
            last_lba: 0,
        };
    }

    let mut deb = *layout.deb(slot)?;
    write_sequential(layout, &mut deb, &payload)?;
    *layout.deb_mut(slot)? = deb;

    layout.sync_free_blocks();
    layout.flush()?;
    Ok(slot)
}

fn split_basename(basename: &str) -> (String, String) {
    match basename.rsplit_once('.') {
        Some((n, t)) => (n.to_string(), t.to_string()),
        None => (basename.to_string(), String::new()),
    }
}

/// Write a direct-format file's exact bytes into a fresh slot, used by
/// non-ASCII contiguous copy paths exercising `write_contiguous` (kept
/// distinct from `copy_from_host`, which always targets sequential).
pub fn write_direct_file(
    layout: &mut DiskLayout,
    slot: usize,
    name: &str,
    file_type: &str,
    owner_id: u8,
    alloc_record_len: u16,
    data: &[u8],
) -> Result<()> {
    {
        let deb = layout.deb_mut(slot)?;
        deb.name = pad8(name);
        deb.file_type = pad8(file_type);
        deb.owner_id = owner_id;
        deb.format = FileFormat::Direct {
            attrs: Attrs::default(),
            alloc_record_len,
        };
    }
    let mut deb = *layout.deb(slot)?;
    write_contiguous(layout, &mut deb, data)?;
    deb.record_count = 1;
    *layout.deb_mut(slot)? = deb;
    layout.sync_free_blocks();
    Ok(())
}
