//! Shared wire and domain definitions for `ChatSync`.

pub mod codec;
pub mod media;
pub mod message;
pub mod wire;
