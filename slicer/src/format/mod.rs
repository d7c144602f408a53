//! Output formats besides G-code.

pub mod svg;
