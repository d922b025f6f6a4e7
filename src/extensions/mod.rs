//! Compression transform
//!
//! Compresses WRITE requests and decompresses READ replies using the SMB2
//! compression transform header.
//!
//! ## Algorithms
//!
//! | ID     | Algorithm      | Provided by                                   |
//! |--------|----------------|-----------------------------------------------|
//! | 0x0000 | NONE           | literal payloads in [`CompressionCodec`]      |
//! | 0x0001 | LZNT1          | [`lznt1`]                                     |
//! | 0x0002 | LZ77           | [`lz77`]                                      |
//! | 0x0003 | LZ77+Huffman   | caller, via [`CompressionCodec::register`]    |
//! | 0x0004 | Pattern_V1     | repeated-byte runs in [`CompressionCodec`]    |
//!
//! ## Framing
//!
//! Chained framing is used unless the peer negotiated it off, in which case
//! the whole write payload goes out as one compressed region behind a
//! non-chained header.

mod compression;
pub mod lz77;
pub mod lznt1;

pub use compression::*;
pub use lz77::Lz77;
pub use lznt1::Lznt1;
