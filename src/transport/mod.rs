//! Serial transport: packet codec, ACK-toggle session, optional pcap
//! capture (spec §4.8).

pub mod codec;
pub mod pcap;
pub mod session;

use crate::deb::Deb;
use crate::error::Result;

/// Command byte for the DEB-carrying "open file" packet.
pub const CMD_OPEN: u8 = b'O';

/// Encode an `OPEN` packet whose payload is a DEB's on-disk bytes.
pub fn encode_open_packet(deb: &Deb) -> Result<Vec<u8>> {
    codec::encode_frame(CMD_OPEN, &deb.to_disk_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deb::{Attrs, FileFormat};

    #[test]
    fn open_packet_round_trips_a_deb() {
        let mut deb = Deb::empty();
        deb.name = *b"READFILE";
        deb.file_type = *b"TXT     ";
        deb.format = FileFormat::Sequential {
            attrs: Attrs::default(),
            longest_record: 80,
            last_lba: 7,
        };
        deb.block_count = 3;
        deb.start_sector = 4;

        let frame = encode_open_packet(&deb).unwrap();
        let decoded = codec::decode_frame(&frame).unwrap();
        assert!(decoded.checksum_ok);
        assert_eq!(decoded.cmd, CMD_OPEN);
        assert_eq!(decoded.payload, deb.to_disk_bytes().to_vec());
    }
}
