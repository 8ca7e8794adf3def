//! # mf-av
//!
//! External encoder invocation for the mtsforge batch engine.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with optional
//!   timeout for running external processes.
//! - **Encoder boundary** ([`EncodeInvoker`], [`Outcome`]) -- the success or
//!   failure contract consumed by the dispatcher, with the ffmpeg-backed
//!   [`FfmpegInvoker`].

pub mod command;
pub mod invoker;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use invoker::{EncodeInvoker, FfmpegInvoker, Outcome};
pub use tools::{ToolInfo, ToolRegistry};
