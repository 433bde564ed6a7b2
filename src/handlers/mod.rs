pub mod transcribe;

pub use transcribe::{transcribe, transcribe_raw};
