//! Helper types shared across the workspace.

pub mod b64;

pub use b64::{HeaderBytes, HeaderCodecError, MAX_HEADER_BYTES};
