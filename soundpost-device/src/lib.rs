//! Soundpost Device - the resources the control plane sees
//!
//! A microphone captures host audio into a bounded history and streams
//! encoded chunks to clients; a speaker accepts client audio, decodes
//! and rate-matches it, and plays it out synchronously. Discovery maps
//! the host's device list to resource config records.

pub mod discovery;
pub mod factory;
pub mod microphone;
pub mod speaker;
pub mod volume;

pub use microphone::Microphone;
pub use speaker::Speaker;
