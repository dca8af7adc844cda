//! Directory Entry Block codec (spec §3 "Directory", §4.3).
//!
//! A `Deb` models one 32-byte on-disk record: raw byte (de)serialization
//! for the directory loader (`layout.rs`), and the host filename
//! grammar (`BASE.TYPE_<suffix>`) used by the CLI surface and the
//! transfer codec's `OPEN` packets.

use crate::endian::{le16_read, le16_write};
use crate::error::{OasisError, Result};

pub const DEB_SIZE: usize = 32;

pub const FMT_EMPTY: u8 = 0x00;
pub const FMT_DELETED: u8 = 0xFF;

const TYPE_RELOCATABLE: u8 = 0x01;
const TYPE_ABSOLUTE: u8 = 0x02;
const TYPE_SEQUENTIAL: u8 = 0x04;
const TYPE_DIRECT: u8 = 0x08;
const TYPE_INDEXED: u8 = 0x10;
const TYPE_KEYED: u8 = 0x18;

const ATTR_R: u8 = 0x80;
const ATTR_W: u8 = 0x40;
const ATTR_D: u8 = 0x20;
const TYPE_MASK: u8 = 0x1F;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attrs {
    pub read_protected: bool,
    pub write_protected: bool,
    pub delete_protected: bool,
}

impl Attrs {
    fn from_byte(b: u8) -> Attrs {
        Attrs {
            read_protected: b & ATTR_R != 0,
            write_protected: b & ATTR_W != 0,
            delete_protected: b & ATTR_D != 0,
        }
    }

    fn to_byte(self) -> u8 {
        (if self.read_protected { ATTR_R } else { 0 })
            | (if self.write_protected { ATTR_W } else { 0 })
            | (if self.delete_protected { ATTR_D } else { 0 })
    }

    fn suffix(self) -> String {
        let mut s = String::new();
        if self.read_protected {
            s.push('R');
        }
        if self.write_protected {
            s.push('W');
        }
        if self.delete_protected {
            s.push('D');
        }
        s
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Empty,
    Deleted,
    Relocatable { attrs: Attrs, program_length: u16 },
    Absolute { attrs: Attrs, record_length: u16, load_address: u16 },
    Sequential { attrs: Attrs, longest_record: u16, last_lba: u16 },
    Direct { attrs: Attrs, alloc_record_len: u16 },
    Indexed { attrs: Attrs, key_len: u16, rec_len: u16, alloc_size: u16 },
    Keyed { attrs: Attrs, key_len: u16, rec_len: u16, alloc_size: u16 },
}

impl FileFormat {
    pub fn is_valid(&self) -> bool {
        !matches!(self, FileFormat::Empty | FileFormat::Deleted)
    }

    pub fn attrs(&self) -> Option<Attrs> {
        match *self {
            FileFormat::Empty | FileFormat::Deleted => None,
            FileFormat::Relocatable { attrs, .. }
            | FileFormat::Absolute { attrs, .. }
            | FileFormat::Sequential { attrs, .. }
            | FileFormat::Direct { attrs, .. }
            | FileFormat::Indexed { attrs, .. }
            | FileFormat::Keyed { attrs, .. } => Some(attrs),
        }
    }

    fn type_char(&self) -> Option<char> {
        match self {
            FileFormat::Relocatable { .. } => Some('R'),
            FileFormat::Absolute { .. } => Some('A'),
            FileFormat::Sequential { .. } => Some('S'),
            FileFormat::Direct { .. } => Some('D'),
            FileFormat::Indexed { .. } => Some('I'),
            FileFormat::Keyed { .. } => Some('K'),
            FileFormat::Empty | FileFormat::Deleted => None,
        }
    }

    fn from_byte_and_words(format: u8, ffd1: u16, ffd2: u16) -> Result<FileFormat> {
        if format == FMT_EMPTY {
            return Ok(FileFormat::Empty);
        }
        if format == FMT_DELETED {
            return Ok(FileFormat::Deleted);
        }
        let attrs = Attrs::from_byte(format);
        Ok(match format & TYPE_MASK {
            TYPE_RELOCATABLE => FileFormat::Relocatable {
                attrs,
                program_length: ffd2,
            },
            TYPE_ABSOLUTE => FileFormat::Absolute {
                attrs,
                record_length: ffd1,
                load_address: ffd2,
            },
            TYPE_SEQUENTIAL => FileFormat::Sequential {
                attrs,
                longest_record: ffd1,
                last_lba: ffd2,
            },
            TYPE_DIRECT => FileFormat::Direct {
                attrs,
                alloc_record_len: ffd1,
            },
            TYPE_INDEXED => FileFormat::Indexed {
                attrs,
                key_len: ffd1 >> 9,
                rec_len: ffd1 & 0x1FF,
                alloc_size: ffd2,
            },
            TYPE_KEYED => FileFormat::Keyed {
                attrs,
                key_len: ffd1 >> 9,
                rec_len: ffd1 & 0x1FF,
                alloc_size: ffd2,
            },
            other => {
                return Err(OasisError::InvalidImage(format!(
                    "unknown DEB format type bits {other:#04x}"
                )))
            }
        })
    }

    fn to_byte_and_words(&self) -> (u8, u16, u16) {
        match *self {
            FileFormat::Empty => (FMT_EMPTY, 0, 0),
            FileFormat::Deleted => (FMT_DELETED, 0, 0),
            FileFormat::Relocatable { attrs, program_length } => {
                (TYPE_RELOCATABLE | attrs.to_byte(), 256, program_length)
            }
            FileFormat::Absolute {
                attrs,
                record_length,
                load_address,
            } => (TYPE_ABSOLUTE | attrs.to_byte(), record_length, load_address),
            FileFormat::Sequential {
                attrs,
                longest_record,
                last_lba,
            } => (TYPE_SEQUENTIAL | attrs.to_byte(), longest_record, last_lba),
            FileFormat::Direct {
                attrs,
                alloc_record_len,
            } => (TYPE_DIRECT | attrs.to_byte(), alloc_record_len, 0),
            FileFormat::Indexed {
                attrs,
                key_len,
                rec_len,
                alloc_size,
            } => (
                TYPE_INDEXED | attrs.to_byte(),
                (key_len << 9) | (rec_len & 0x1FF),
                alloc_size,
            ),
            FileFormat::Keyed {
                attrs,
                key_len,
                rec_len,
                alloc_size,
            } => (
                TYPE_KEYED | attrs.to_byte(),
                (key_len << 9) | (rec_len & 0x1FF),
                alloc_size,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deb {
    pub name: [u8; 8],
    pub file_type: [u8; 8],
    pub format: FileFormat,
    pub record_count: u16,
    pub block_count: u16,
    pub start_sector: u16,
    pub timestamp: [u8; 3],
    pub owner_id: u8,
    pub shared_from_owner_id: u8,
}

fn pad8(s: &str) -> Result<[u8; 8]> {
    let upper = s.to_ascii_uppercase();
    if upper.len() > 8 {
        return Err(OasisError::InvalidArgument(format!(
            "\"{s}\" exceeds 8 characters"
        )));
    }
    let mut out = [b' '; 8];
    out[..upper.len()].copy_from_slice(upper.as_bytes());
    Ok(out)
}

fn trim8(field: [u8; 8]) -> String {
    String::from_utf8_lossy(&field)
        .trim_end()
        .trim_start()
        .to_string()
}

impl Deb {
    pub fn empty() -> Deb {
        Deb {
            name: [b' '; 8],
            file_type: [b' '; 8],
            format: FileFormat::Empty,
            record_count: 0,
            block_count: 0,
            start_sector: 0,
            timestamp: [0; 3],
            owner_id: 0,
            shared_from_owner_id: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.format.is_valid()
    }

    /// Decode a 32-byte on-disk record, converting little-endian fields.
    pub fn from_disk_bytes(bytes: &[u8; DEB_SIZE]) -> Result<Deb> {
        let format_byte = bytes[0];
        let mut name = [0u8; 8];
        name.copy_from_slice(&bytes[1..9]);
        let mut file_type = [0u8; 8];
        file_type.copy_from_slice(&bytes[9..17]);
        let ffd1 = le16_read(bytes, 17);
        let ffd2 = le16_read(bytes, 19);
        let record_count = le16_read(bytes, 21);
        let block_count = le16_read(bytes, 23);
        let start_sector = le16_read(bytes, 25);
        let timestamp = [bytes[27], bytes[28], bytes[29]];
        let owner_id = bytes[30];
        let shared_from_owner_id = bytes[31];

        Ok(Deb {
            name,
            file_type,
            format: FileFormat::from_byte_and_words(format_byte, ffd1, ffd2)?,
            record_count,
            block_count,
            start_sector,
            timestamp,
            owner_id,
            shared_from_owner_id,
        })
    }

    pub fn to_disk_bytes(&self) -> [u8; DEB_SIZE] {
        let mut out = [0u8; DEB_SIZE];
        let (format_byte, ffd1, ffd2) = self.format.to_byte_and_words();
        out[0] = format_byte;
        out[1..9].copy_from_slice(&self.name);
        out[9..17].copy_from_slice(&self.file_type);
        le16_write(&mut out, 17, ffd1);
        le16_write(&mut out, 19, ffd2);
        le16_write(&mut out, 21, self.record_count);
        le16_write(&mut out, 23, self.block_count);
        le16_write(&mut out, 25, self.start_sector);
        out[27..30].copy_from_slice(&self.timestamp);
        out[30] = self.owner_id;
        out[31] = self.shared_from_owner_id;
        out
    }

    /// Format the host-visible `BASE.TYPE_<suffix>` name (spec §4.3).
    pub fn format_host_filename(&self) -> String {
        let base = trim8(self.name);
        let ftype = trim8(self.file_type);
        let stem = if ftype.is_empty() {
            base
        } else {
            format!("{base}.{ftype}")
        };

        let Some(type_char) = self.format.type_char() else {
            return stem;
        };
        let attrs = self.format.attrs().unwrap_or_default();
        let attr_suffix = attrs.suffix();

        match self.format {
            FileFormat::Sequential { longest_record, .. } => {
                if longest_record == 0 && attr_suffix.is_empty() {
                    format!("{stem}_{type_char}")
                } else {
                    format!("{stem}_{type_char}{attr_suffix}_{longest_record}")
                }
            }
            FileFormat::Direct { alloc_record_len, .. } => {
                format!("{stem}_{type_char}{attr_suffix}_{alloc_record_len}")
            }
            FileFormat::Relocatable { .. } => {
                format!("{stem}_{type_char}{attr_suffix}_256")
            }
            FileFormat::Absolute {
                record_length,
                load_address,
                ..
            } => {
                format!("{stem}_{type_char}{attr_suffix}_{record_length}_{load_address:04X}")
            }
            FileFormat::Indexed { rec_len, key_len, .. }
            | FileFormat::Keyed { rec_len, key_len, .. } => {
                format!("{stem}_{type_char}{attr_suffix}_{rec_len}_{key_len}")
            }
            FileFormat::Empty | FileFormat::Deleted => stem,
        }
    }

    /// Parse a host filename back into name/type/format/FFD1/FFD2. Fields
    /// not encoded in the name (timestamp, block_count, record_count,
    /// start_sector, owner_id) are left at their `Deb::empty()` defaults.
    pub fn parse_host_filename(text: &str) -> Result<Deb> {
        // The `.` only separates name/type when it precedes the first `_`.
        let underscore_pos = text.find('_');
        let (name_part, suffix) = match underscore_pos {
            Some(u) => (&text[..u], Some(&text[u + 1..])),
            None => (text, None),
        };
        let (base, ftype) = match name_part.find('.') {
            Some(d) => (&name_part[..d], &name_part[d + 1..]),
            None => (name_part, ""),
        };

        let name = pad8(base)?;
        let file_type = pad8(ftype)?;

        let Some(suffix) = suffix else {
            return Ok(Deb {
                name,
                file_type,
                format: FileFormat::Sequential {
                    attrs: Attrs::default(),
                    longest_record: 0,
                    last_lba: 0,
                },
                ..Deb::empty()
            });
        };

        let mut chars = suffix.chars();
        let type_char = chars
            .next()
            .ok_or_else(|| OasisError::InvalidArgument("empty format suffix".into()))?
            .to_ascii_uppercase();

        let rest: String = chars.collect();
        let (attr_str, numeric): (&str, &str) = match rest.find('_') {
            Some(p) => (&rest[..p], &rest[p + 1..]),
            None => (&rest[..], ""),
        };

        let mut attrs = Attrs::default();
        for c in attr_str.chars() {
            match c.to_ascii_uppercase() {
                'R' => attrs.read_protected = true,
                'W' => attrs.write_protected = true,
                'D' => attrs.delete_protected = true,
                other => {
                    return Err(OasisError::InvalidArgument(format!(
                        "unknown attribute letter '{other}'"
                    )))
                }
            }
        }

        let mut nums = numeric.split('_').filter(|s| !s.is_empty());
        let n1 = nums.next();
        let n2 = nums.next();

        let parse_dec = |s: &str| -> Result<u16> {
            s.parse::<u16>()
                .map_err(|_| OasisError::InvalidArgument(format!("bad numeric field \"{s}\"")))
        };
        let parse_hex = |s: &str| -> Result<u16> {
            u16::from_str_radix(s, 16)
                .map_err(|_| OasisError::InvalidArgument(format!("bad hex field \"{s}\"")))
        };

        let format = match type_char {
            'S' => FileFormat::Sequential {
                attrs,
                longest_record: n1.map(parse_dec).transpose()?.unwrap_or(0),
                last_lba: 0,
            },
            'D' => {
                let n1 = n1.ok_or_else(|| {
                    OasisError::InvalidArgument("direct file requires record length".into())
                })?;
                let alloc_record_len = parse_dec(n1)?;
                if alloc_record_len == 0 {
                    return Err(OasisError::InvalidArgument(
                        "direct record length must be > 0".into(),
                    ));
                }
                FileFormat::Direct {
                    attrs,
                    alloc_record_len,
                }
            }
            'R' => {
                let n1 = n1.ok_or_else(|| {
                    OasisError::InvalidArgument("relocatable file requires record length".into())
                })?;
                let _ = parse_dec(n1)?;
                FileFormat::Relocatable {
                    attrs,
                    program_length: 0,
                }
            }
            'A' => {
                let n1 = n1.ok_or_else(|| {
                    OasisError::InvalidArgument("absolute file requires record length".into())
                })?;
                let record_length = parse_dec(n1)?;
                let load_address = n2.map(parse_hex).transpose()?.unwrap_or(0);
                FileFormat::Absolute {
                    attrs,
                    record_length,
                    load_address,
                }
            }
            'I' | 'K' => {
                let rec_len = n1.map(parse_dec).transpose()?.unwrap_or(0);
                let key_len = n2.map(parse_dec).transpose()?.unwrap_or(0);
                if rec_len > 511 {
                    return Err(OasisError::InvalidArgument(
                        "indexed/keyed record length must be <= 511".into(),
                    ));
                }
                if key_len > 127 {
                    return Err(OasisError::InvalidArgument(
                        "indexed/keyed key length must be <= 127".into(),
                    ));
                }
                if type_char == 'I' {
                    FileFormat::Indexed {
                        attrs,
                        key_len,
                        rec_len,
                        alloc_size: 0,
                    }
                } else {
                    FileFormat::Keyed {
                        attrs,
                        key_len,
                        rec_len,
                        alloc_size: 0,
                    }
                }
            }
            other => {
                return Err(OasisError::InvalidArgument(format!(
                    "unknown format letter '{other}'"
                )))
            }
        };

        Ok(Deb {
            name,
            file_type,
            format,
            ..Deb::empty()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_roundtrip_host_filename() {
        let deb = Deb {
            name: pad8("REPORT").unwrap(),
            file_type: pad8("TXT").unwrap(),
            format: FileFormat::Sequential {
                attrs: Attrs {
                    read_protected: true,
                    write_protected: true,
                    delete_protected: false,
                },
                longest_record: 80,
                last_lba: 0,
            },
            ..Deb::empty()
        };
        let formatted = deb.format_host_filename();
        assert_eq!(formatted, "REPORT.TXT_SRW_80");

        let parsed = Deb::parse_host_filename(&formatted).unwrap();
        assert_eq!(parsed.name, deb.name);
        assert_eq!(parsed.file_type, deb.file_type);
        match (parsed.format, deb.format) {
            (
                FileFormat::Sequential {
                    attrs: pa,
                    longest_record: pl,
                    ..
                },
                FileFormat::Sequential {
                    attrs: da,
                    longest_record: dl,
                    ..
                },
            ) => {
                assert_eq!(pa, da);
                assert_eq!(pl, dl);
            }
            _ => panic!("format mismatch"),
        }
    }

    #[test]
    fn sequential_zero_ffd1_no_attrs_omits_suffix_number() {
        let deb = Deb {
            name: pad8("FOO").unwrap(),
            file_type: pad8("BAR").unwrap(),
            format: FileFormat::Sequential {
                attrs: Attrs::default(),
                longest_record: 0,
                last_lba: 0,
            },
            ..Deb::empty()
        };
        assert_eq!(deb.format_host_filename(), "FOO.BAR_S");
    }

    #[test]
    fn absolute_encodes_hex_load_address() {
        let deb = Deb {
            name: pad8("PROG").unwrap(),
            file_type: pad8("ABS").unwrap(),
            format: FileFormat::Absolute {
                attrs: Attrs::default(),
                record_length: 256,
                load_address: 0x0100,
            },
            ..Deb::empty()
        };
        assert_eq!(deb.format_host_filename(), "PROG.ABS_A_256_0100");
    }

    #[test]
    fn indexed_parses_key_and_record_length() {
        let deb = Deb::parse_host_filename("DATA.IDX_I_100_20").unwrap();
        match deb.format {
            FileFormat::Indexed {
                rec_len, key_len, ..
            } => {
                assert_eq!(rec_len, 100);
                assert_eq!(key_len, 20);
            }
            _ => panic!("expected indexed"),
        }
    }

    #[test]
    fn indexed_rejects_oversized_fields() {
        assert!(Deb::parse_host_filename("DATA.IDX_I_600_20").is_err());
        assert!(Deb::parse_host_filename("DATA.IDX_I_100_200").is_err());
    }

    #[test]
    fn no_suffix_defaults_to_sequential() {
        let deb = Deb::parse_host_filename("PLAIN.TXT").unwrap();
        assert_eq!(trim8(deb.name), "PLAIN");
        assert_eq!(trim8(deb.file_type), "TXT");
        assert!(matches!(deb.format, FileFormat::Sequential { longest_record: 0, .. }));
    }

    #[test]
    fn name_too_long_fails() {
        assert!(Deb::parse_host_filename("TOOLONGNAME.TXT_S").is_err());
    }

    #[test]
    fn disk_bytes_roundtrip() {
        let deb = Deb {
            name: pad8("ABC").unwrap(),
            file_type: pad8("DEF").unwrap(),
            format: FileFormat::Direct {
                attrs: Attrs {
                    read_protected: false,
                    write_protected: true,
                    delete_protected: true,
                },
                alloc_record_len: 128,
            },
            record_count: 4,
            block_count: 2,
            start_sector: 100,
            timestamp: [0x12, 0x34, 0x56],
            owner_id: 7,
            shared_from_owner_id: 3,
        };
        let bytes = deb.to_disk_bytes();
        let decoded = Deb::from_disk_bytes(&bytes).unwrap();
        assert_eq!(decoded, deb);
    }

    #[test]
    fn empty_and_deleted_are_not_valid() {
        assert!(!Deb::empty().is_valid());
        let deleted = Deb {
            format: FileFormat::Deleted,
            ..Deb::empty()
        };
        assert!(!deleted.is_valid());
    }

    #[test]
    fn unknown_format_type_bits_rejected() {
        let mut bytes = [0u8; DEB_SIZE];
        bytes[0] = 0x03; // not one of the six defined types, not 0x00/0xFF
        assert!(Deb::from_disk_bytes(&bytes).is_err());
    }
}
