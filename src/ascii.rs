//! 7-bit ASCII detection and host/OASIS line-ending translation (spec §2,
//! §4.6).
//!
//! OASIS sequential text files terminate lines with a bare CR and
//! terminate the file itself with a `SUB` (0x1A) sentinel. The host side
//! of this crate speaks Unix line endings (`\n`); Open Question: the
//! source spec does not name the host line convention explicitly, so this
//! is resolved here (see DESIGN.md) as "host = `\n`, OASIS = `\r`".

/// `SUB` control character OASIS uses to mark end-of-text.
pub const SUB: u8 = 0x1A;

const CR: u8 = 0x0D;
const LF: u8 = 0x0A;

/// True iff every byte in `data` has its high bit clear.
pub fn is_seven_bit_ascii(data: &[u8]) -> bool {
    data.iter().all(|&b| b & 0x80 == 0)
}

/// Translate host (`\n`-terminated) text into OASIS (`\r`-terminated,
/// `SUB`-sentineled) form, appending the `SUB` sentinel if not already
/// present. Also returns the longest line length observed (used by the
/// copy operation of spec §4.6 to populate FFD1).
pub fn host_to_oasis(data: &[u8]) -> (Vec<u8>, usize) {
    let mut out = Vec::with_capacity(data.len() + 1);
    let mut longest = 0usize;
    let mut current = 0usize;

    for &b in data {
        if b == LF {
            longest = longest.max(current);
            current = 0;
            out.push(CR);
        } else {
            current += 1;
            out.push(b);
        }
    }
    longest = longest.max(current);

    if out.last() != Some(&SUB) {
        out.push(SUB);
    }
    (out, longest)
}

/// Translate OASIS text back into host form: `\r` -> `\n`, and everything
/// from the first `SUB` sentinel onward is dropped.
pub fn oasis_to_host(data: &[u8]) -> Vec<u8> {
    let end = data.iter().position(|&b| b == SUB).unwrap_or(data.len());
    data[..end]
        .iter()
        .map(|&b| if b == CR { LF } else { b })
        .collect()
}
