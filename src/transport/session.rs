//! ACK-toggle send/receive session (spec §4.8 "Acknowledgement &
//! session retry").
//!
//! A packet is transmitted, then the sender waits for `DLE <toggle>`
//! where `<toggle>` is `'0'` or `'1'`, alternating each successful
//! round trip. Wrong-toggle and timeout both trigger a bounded retry
//! of the same frame; anything else is an invalid-sequence error.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::{OasisError, Result};
use crate::transport::codec::{self, DecodedFrame};

const DLE: u8 = 0x10;
const MAX_RETRIES: u32 = 5;
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// A byte-oriented half-duplex channel with a read timeout, abstracting
/// over a real serial device and an in-memory test double.
pub trait SerialPort {
    /// Read one byte, returning `Ok(None)` if `timeout` elapses first.
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>>;
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;
}

/// A real serial line, configured via `termios` for non-canonical,
/// raw, per-byte reads.
pub struct TermiosSerialPort {
    file: std::fs::File,
}

impl TermiosSerialPort {
    pub fn open(path: &std::path::Path, baud: u32) -> Result<Self> {
        use std::os::unix::io::AsRawFd;

        let file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
        let fd = file.as_raw_fd();
        let mut tio = termios::Termios::from_fd(fd).map_err(OasisError::Io)?;
        termios::cfmakeraw(&mut tio);
        let speed = baud_to_speed(baud);
        termios::cfsetspeed(&mut tio, speed).map_err(OasisError::Io)?;
        tio.c_cc[termios::VMIN] = 0;
        tio.c_cc[termios::VTIME] = 1; // deciseconds, overridden per-read below
        termios::tcsetattr(fd, termios::TCSANOW, &tio).map_err(OasisError::Io)?;
        Ok(Self { file })
    }
}

fn baud_to_speed(baud: u32) -> u32 {
    match baud {
        300 => termios::B300,
        1200 => termios::B1200,
        2400 => termios::B2400,
        4800 => termios::B4800,
        9600 => termios::B9600,
        19200 => termios::B19200,
        38400 => termios::B38400,
        _ => termios::B9600,
    }
}

impl SerialPort for TermiosSerialPort {
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        let deadline = Instant::now() + timeout;
        let mut byte = [0u8; 1];
        loop {
            match self.file.read(&mut byte) {
                Ok(1) => return Ok(Some(byte[0])),
                Ok(_) => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(OasisError::Io(e)),
            }
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).map_err(OasisError::Io)
    }
}

type Wire = Rc<RefCell<VecDeque<u8>>>;

/// An in-memory, `VecDeque`-backed loopback pair for tests: bytes
/// written by one side land in the queue read by the other.
pub struct ChannelSerialPort {
    inbox: Wire,
    outbox: Wire,
}

impl ChannelSerialPort {
    pub fn pair() -> (Self, Self) {
        let a_to_b: Wire = Rc::new(RefCell::new(VecDeque::new()));
        let b_to_a: Wire = Rc::new(RefCell::new(VecDeque::new()));
        (
            ChannelSerialPort {
                inbox: b_to_a.clone(),
                outbox: a_to_b.clone(),
            },
            ChannelSerialPort {
                inbox: a_to_b,
                outbox: b_to_a,
            },
        )
    }
}

impl SerialPort for ChannelSerialPort {
    fn read_byte(&mut self, _timeout: Duration) -> Result<Option<u8>> {
        Ok(self.inbox.borrow_mut().pop_front())
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.outbox.borrow_mut().extend(data.iter().copied());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckOutcome {
    Ok,
    WrongToggle,
    Timeout,
    Invalid,
}

pub struct SerialSession<P: SerialPort> {
    port: P,
    toggle: u8,
    timeout: Duration,
}

impl<P: SerialPort> SerialSession<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            toggle: b'0',
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(port: P, timeout: Duration) -> Self {
        Self {
            port,
            toggle: b'0',
            timeout,
        }
    }

    fn await_ack(&mut self) -> Result<AckOutcome> {
        let b1 = self.port.read_byte(self.timeout)?;
        let b2 = self.port.read_byte(self.timeout)?;
        match (b1, b2) {
            (Some(DLE), Some(c)) if c == self.toggle => Ok(AckOutcome::Ok),
            (Some(DLE), Some(b'0')) | (Some(DLE), Some(b'1')) => Ok(AckOutcome::WrongToggle),
            (None, _) | (_, None) => Ok(AckOutcome::Timeout),
            _ => Ok(AckOutcome::Invalid),
        }
    }

    fn flip_toggle(&mut self) {
        self.toggle = if self.toggle == b'0' { b'1' } else { b'0' };
    }

    /// Send one packet, retrying on wrong-toggle or timeout up to
    /// `MAX_RETRIES` times.
    pub fn send(&mut self, cmd: u8, payload: &[u8]) -> Result<()> {
        let frame = codec::encode_frame(cmd, payload)?;
        for attempt in 0..=MAX_RETRIES {
            self.port.write_bytes(&frame)?;
            match self.await_ack()? {
                AckOutcome::Ok => {
                    self.flip_toggle();
                    return Ok(());
                }
                AckOutcome::Invalid => return Err(OasisError::InvalidAck),
                AckOutcome::WrongToggle if attempt == MAX_RETRIES => return Err(OasisError::WrongToggle),
                AckOutcome::Timeout if attempt == MAX_RETRIES => return Err(OasisError::Timeout),
                AckOutcome::WrongToggle | AckOutcome::Timeout => continue,
            }
        }
        unreachable!("loop always returns by the final retry")
    }

    /// Read one frame byte-by-byte until `DLE ETX <lrc> 0xFF` and
    /// acknowledge it with the current toggle on checksum success.
    pub fn receive(&mut self) -> Result<DecodedFrame> {
        let mut buf = Vec::new();
        loop {
            let b = self
                .port
                .read_byte(self.timeout)?
                .ok_or(OasisError::Timeout)?;
            buf.push(b);
            if buf.len() >= 4 && buf[buf.len() - 4..buf.len() - 2] == [DLE, 0x03] {
                // DLE ETX <lrc> <pad> observed; frame is complete.
                break;
            }
        }
        let decoded = codec::decode_frame(&buf)?;
        if decoded.checksum_ok {
            self.port.write_bytes(&[DLE, self.toggle])?;
            self.flip_toggle();
        }
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_receive_round_trip_over_channel() {
        let (sender_port, receiver_port) = ChannelSerialPort::pair();
        let frame = codec::encode_frame(b'O', b"hello").unwrap();
        sender_port.outbox.borrow_mut().extend(frame.iter().copied());

        let mut receiver = SerialSession::new(receiver_port);
        let decoded = receiver.receive().unwrap();
        assert!(decoded.checksum_ok);
        assert_eq!(decoded.payload, b"hello");
        assert_eq!(receiver.toggle, b'1');

        let ack: Vec<u8> = sender_port.inbox.borrow_mut().drain(..).collect();
        assert_eq!(ack, vec![DLE, b'0']);
    }

    #[test]
    fn send_succeeds_on_matching_ack() {
        let (sender_port, _unused) = ChannelSerialPort::pair();
        sender_port.inbox.borrow_mut().push_back(DLE);
        sender_port.inbox.borrow_mut().push_back(b'0');
        let mut sender = SerialSession::new(sender_port);
        sender.send(b'O', b"x").unwrap();
        assert_eq!(sender.toggle, b'1');
    }

    #[test]
    fn send_retries_then_fails_on_repeated_timeout() {
        let (sender_port, _unused) = ChannelSerialPort::pair();
        let mut sender = SerialSession::with_timeout(sender_port, Duration::from_millis(1));
        let result = sender.send(b'O', b"x");
        assert!(matches!(result, Err(OasisError::Timeout)));
    }
}
