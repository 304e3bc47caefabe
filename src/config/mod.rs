//! Configuration parsing and types.
//!
//! - `types` - the root [`Config`] and its sections
//! - `duration` - human-readable duration strings ("500ms", "3s", "1m")
//! - `parser` - YAML discovery and loading

mod duration;
mod parser;
mod types;

pub use duration::*;
pub use parser::*;
pub use types::*;
