//! Source side of the pipeline: tokenizing uploaded extracts.

pub mod reader;

pub use reader::{DelimitedReader, estimate_rows};
