//! Translation of decoded Dalvik bytecode into JVM class files.
//!
//! Each method body is lifted into an SSA intermediate form, simplified by a fixed pass
//! pipeline, lowered onto the operand stack and assembled into a version 50 class file.

mod builder;
mod classfile;
pub mod config;
pub mod context;
mod descriptor;
pub mod dex;
pub mod driver;
pub mod error;
pub mod handler;
pub mod hooks;
pub mod ir;
mod lower;
mod opcodes;
pub mod output;
mod passes;
mod pipeline;
pub mod report;
pub mod telemetry;
#[cfg(test)]
mod test_harness;

pub use config::Config;
pub use driver::{ConversionSummary, Converter};
pub use error::ConversionError;
