//! OASIS disk-image toolkit: filesystem engine, sector I/O, and serial
//! transport codec.

pub mod ascii;
pub mod bitmap;
pub mod config;
pub mod deb;
pub mod endian;
pub mod error;
pub mod file_io;
pub mod geometry;
pub mod initdisk;
pub mod layout;
pub mod ops;
pub mod sector_io;
pub mod timestamp;
pub mod transport;
pub mod wildcard;

pub use deb::{Deb, FileFormat};
pub use error::{OasisError, Result};
pub use layout::{DiskLayout, Header};
