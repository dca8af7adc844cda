//! DLE-stuffed, run-length-compressed, LRC-checksummed packet codec
//! (spec §4.8).
//!
//! Frame structure: `DLE STX <cmd> <encoded-payload> DLE ETX <LRC> 0xFF`.
//! The envelope bytes (`DLE STX`, the trailing LRC/0xFF) are not
//! themselves DLE-stuffed; everything between `<cmd>` and the trailing
//! `DLE ETX` inclusive is.

use crate::error::{OasisError, Result};

const DLE: u8 = 0x10;
const STX: u8 = 0x02;
const ETX: u8 = 0x03;
const SI: u8 = 0x0F;
const SO: u8 = 0x0E;
const CAN: u8 = 0x18;
const VT: u8 = 0x0B;
const ESC: u8 = 0x1B;
const TRAILER_PAD: u8 = 0xFF;

const RUN_LENGTH_MAX: usize = 127;
pub const PAYLOAD_CAPACITY: usize = 512;

/// LRC property (spec §8 invariant 11): sum of bytes mod 256, OR 0xC0,
/// AND 0x7F.
pub fn lrc(bytes: &[u8]) -> u8 {
    let sum: u32 = bytes.iter().fold(0u32, |acc, &b| acc + b as u32);
    ((sum % 256) as u8 | 0xC0) & 0x7F
}

fn emit_escaped(out: &mut Vec<u8>, masked: u8) {
    if masked == DLE {
        out.push(DLE);
        out.push(DLE);
    } else if masked == ESC {
        out.push(DLE);
        out.push(CAN);
    } else {
        out.push(masked);
    }
}

/// DLE-stuff and run-length-compress `data` (spec §4.8 "Encoding rules").
pub fn encode_payload(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut shift = 0u8;
    let mut i = 0;

    while i < data.len() {
        let b = data[i];
        let want_shift = b & 0x80;
        if want_shift != shift {
            out.push(DLE);
            out.push(if want_shift != 0 { SI } else { SO });
            shift = want_shift;
        }
        emit_escaped(&mut out, b & 0x7F);

        let mut run = 1usize;
        while i + run < data.len() && data[i + run] == b {
            run += 1;
        }
        if run >= 4 {
            let mut remaining = run - 1;
            while remaining > 0 {
                let chunk = remaining.min(RUN_LENGTH_MAX);
                out.push(DLE);
                out.push(VT);
                emit_escaped(&mut out, chunk as u8);
                remaining -= chunk;
            }
        }
        i += run;

        if out.len() > PAYLOAD_CAPACITY {
            return Err(OasisError::InvalidArgument(
                "encoded payload exceeds 512-byte capacity".into(),
            ));
        }
    }
    Ok(out)
}

/// Build a full frame: `DLE STX <cmd> <encoded payload> DLE ETX <LRC> 0xFF`.
pub fn encode_frame(cmd: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let mut body = vec![cmd];
    body.extend(encode_payload(payload)?);
    body.push(DLE);
    body.push(ETX);

    let checksum = lrc(&body);
    let mut frame = vec![DLE, STX];
    frame.extend(body);
    frame.push(checksum);
    frame.push(TRAILER_PAD);
    Ok(frame)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub cmd: u8,
    pub payload: Vec<u8>,
    pub checksum_ok: bool,
}

fn decode_escaped_byte(bytes: &[u8]) -> Result<(u8, usize)> {
    match bytes.first() {
        Some(&DLE) => match bytes.get(1) {
            Some(&DLE) => Ok((DLE, 2)),
            Some(&CAN) => Ok((ESC, 2)),
            _ => Err(OasisError::InvalidArgument("unknown DLE escape in run count".into())),
        },
        Some(&b) => Ok((b, 1)),
        None => Err(OasisError::InvalidArgument("EOF inside run count escape".into())),
    }
}

/// Decode one full frame (spec §4.8 "Decoding rules"). A checksum
/// mismatch is reported via `checksum_ok: false`, not as an `Err` — the
/// caller (the session layer) decides whether to retry.
pub fn decode_frame(frame: &[u8]) -> Result<DecodedFrame> {
    if frame.get(0..2) != Some(&[DLE, STX][..]) {
        return Err(OasisError::InvalidArgument("missing header DLE STX".into()));
    }
    let mut i = 2;
    let cmd = *frame
        .get(i)
        .ok_or_else(|| OasisError::InvalidArgument("EOF reading command byte".into()))?;
    i += 1;

    let mut lrc_bytes = vec![cmd];
    let mut out = Vec::new();
    let mut shift = 0u8;
    let mut last_emitted: Option<u8> = None;
    let mut found_trailer = false;

    while i < frame.len() {
        let b = frame[i];
        if b != DLE {
            let v = b | shift;
            out.push(v);
            last_emitted = Some(v);
            lrc_bytes.push(b);
            i += 1;
        } else {
            let esc = *frame
                .get(i + 1)
                .ok_or_else(|| OasisError::InvalidArgument("EOF inside DLE escape".into()))?;
            lrc_bytes.push(DLE);
            lrc_bytes.push(esc);
            i += 2;
            match esc {
                SI => shift = 0x80,
                SO => shift = 0x00,
                DLE => {
                    let v = DLE | shift;
                    out.push(v);
                    last_emitted = Some(v);
                }
                CAN => {
                    let v = ESC | shift;
                    out.push(v);
                    last_emitted = Some(v);
                }
                VT => {
                    let (count, consumed) = decode_escaped_byte(&frame[i..])?;
                    lrc_bytes.extend_from_slice(&frame[i..i + consumed]);
                    i += consumed;
                    let fill = last_emitted.ok_or_else(|| {
                        OasisError::InvalidArgument("run-length marker with no prior byte".into())
                    })?;
                    for _ in 0..count {
                        out.push(fill);
                    }
                }
                ETX => {
                    found_trailer = true;
                    break;
                }
                _ => return Err(OasisError::InvalidArgument("unknown DLE escape sequence".into())),
            }
        }

        if out.len() > PAYLOAD_CAPACITY {
            return Err(OasisError::InvalidArgument("decoded payload overflow".into()));
        }
    }

    if !found_trailer {
        return Err(OasisError::InvalidArgument("missing trailer DLE ETX".into()));
    }

    let received_lrc = *frame
        .get(i)
        .ok_or_else(|| OasisError::InvalidArgument("EOF reading LRC byte".into()))?;
    let computed = lrc(&lrc_bytes);
    let checksum_ok = computed == received_lrc;

    Ok(DecodedFrame {
        cmd,
        payload: if checksum_ok { out } else { Vec::new() },
        checksum_ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn law1_roundtrip_small_payloads() {
        let samples: &[&[u8]] = &[
            b"",
            b"hello",
            &[0x10, 0x1B, 0x80, 0x00, 0xFF],
            &[0x41; 10],
            &[0x80; 200],
        ];
        for payload in samples {
            let frame = encode_frame(b'O', payload).unwrap();
            let decoded = decode_frame(&frame).unwrap();
            assert!(decoded.checksum_ok);
            assert_eq!(decoded.cmd, b'O');
            assert_eq!(&decoded.payload, payload);
        }
    }

    #[test]
    fn law1_roundtrip_every_byte_value_run() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let frame = encode_frame(b'X', &payload).unwrap();
        let decoded = decode_frame(&frame).unwrap();
        assert!(decoded.checksum_ok);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn run_length_compresses_long_runs() {
        let payload = vec![0x41u8; 100];
        let frame = encode_frame(b'O', &payload).unwrap();
        // far shorter than 100 literal bytes plus envelope
        assert!(frame.len() < 40);
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn invariant11_lrc_matches_formula() {
        let bytes = [1u8, 2, 3, 250, 250];
        let sum: u32 = bytes.iter().map(|&b| b as u32).sum();
        let expected = ((sum % 256) as u8 | 0xC0) & 0x7F;
        assert_eq!(lrc(&bytes), expected);
    }

    #[test]
    fn s5_checksum_mismatch_yields_empty_payload() {
        let payload = [1u8, 2, 3];
        let mut frame = encode_frame(b'O', &payload).unwrap();
        let lrc_index = frame.len() - 2;
        frame[lrc_index] ^= 0xFF;

        let decoded = decode_frame(&frame).unwrap();
        assert!(!decoded.checksum_ok);
        assert_eq!(decoded.payload.len(), 0);
    }

    #[test]
    fn missing_header_is_rejected() {
        assert!(decode_frame(&[0, 1, 2, 3]).is_err());
    }

    #[test]
    fn missing_trailer_is_rejected() {
        let mut frame = encode_frame(b'O', b"abc").unwrap();
        frame.truncate(frame.len() - 4); // chop off DLE ETX LRC pad
        assert!(decode_frame(&frame).is_err());
    }
}
