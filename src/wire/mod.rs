//! Transport-facing layer: frame extraction and envelope decryption

pub mod cipher;
pub mod frame;

pub use cipher::{CipherUnwrapper, Envelope};
pub use frame::{decode, DecodedFrame, RawFrame};
