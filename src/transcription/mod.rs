// transcription/mod.rs
//
// Worker output parsing, segment merging, and result normalization.

pub mod merge;
pub mod normalize;
pub mod parser;
pub mod types;
