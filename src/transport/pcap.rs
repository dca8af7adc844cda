//! Optional capture of transport traffic to a pcap file using the
//! `LINKTYPE_RTAC_SERIAL` (250) per-packet pseudo-header, so captures
//! can be opened directly in Wireshark (spec §4.8 "Capture", added).

use std::fs::File;
use std::io::{Result as IoResult, Write};
use std::path::Path;

const LINKTYPE_RTAC_SERIAL: u32 = 250;
const PCAP_MAGIC: u32 = 0xA1B2C3D4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToDevice,
    DeviceToHost,
}

pub struct PcapWriter {
    file: File,
}

impl PcapWriter {
    pub fn create(path: &Path) -> IoResult<Self> {
        let mut file = File::create(path)?;
        let mut header = Vec::with_capacity(24);
        header.extend(&PCAP_MAGIC.to_le_bytes());
        header.extend(&2u16.to_le_bytes()); // version major
        header.extend(&4u16.to_le_bytes()); // version minor
        header.extend(&0i32.to_le_bytes()); // thiszone
        header.extend(&0u32.to_le_bytes()); // sigfigs
        header.extend(&65535u32.to_le_bytes()); // snaplen
        header.extend(&LINKTYPE_RTAC_SERIAL.to_le_bytes());
        file.write_all(&header)?;
        Ok(Self { file })
    }

    /// Append one frame. `secs`/`micros` are caller-supplied since this
    /// crate's scripted test paths never call `Instant::now()`.
    pub fn write_frame(
        &mut self,
        secs: u32,
        micros: u32,
        direction: Direction,
        payload: &[u8],
    ) -> IoResult<()> {
        let masked: Vec<u8> = payload.iter().map(|&b| b & 0x7F).collect();
        let mut pseudo = Vec::with_capacity(10 + masked.len());
        pseudo.extend(&secs.to_be_bytes());
        pseudo.extend(&micros.to_be_bytes());
        pseudo.push(match direction {
            Direction::HostToDevice => 0,
            Direction::DeviceToHost => 1,
        });
        pseudo.push(0); // control-line state, unused
        pseudo.extend(&[0u8, 0u8]); // reserved
        pseudo.extend(&masked);

        let incl_len = pseudo.len() as u32;
        let mut record = Vec::with_capacity(16 + pseudo.len());
        record.extend(&secs.to_le_bytes());
        record.extend(&micros.to_le_bytes());
        record.extend(&incl_len.to_le_bytes());
        record.extend(&incl_len.to_le_bytes());
        record.extend(&pseudo);
        self.file.write_all(&record)
    }
}
