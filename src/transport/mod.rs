//! Message buffers and wire framing
//!
//! This module provides the byte-level plumbing every transform works on:
//!
//! - **Segmented buffers**: [`MessageBuffer`] and its bounds-checked [`BufCursor`]
//! - **Headers**: [`Smb2Header`] and [`Smb1Header`] views and builders
//! - **Requests**: [`Request`], compound chain linking and splitting
//! - **Transform frames**: [`TransformFrame`], the output of encryption and compression
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     request/reply encoding (caller)     │
//! ├─────────────────────────────────────────┤
//! │  compression → signing → encryption     │
//! ├─────────────────────────────────────────┤
//! │      MessageBuffer / framing            │  ← This module
//! ├─────────────────────────────────────────┤
//! │          socket (caller)                │
//! └─────────────────────────────────────────┘
//! ```

mod buffer;
mod header;
mod request;

pub use buffer::*;
pub use header::*;
pub use request::*;
