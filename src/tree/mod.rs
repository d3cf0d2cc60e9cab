//! B+Tree node engine.
//!
//! An archive file is a sequence of fixed-size blocks:
//! ```text
//! ┌──────────┬──────────┬──────────┬─────┐
//! │ Block 0  │ Block 1  │ Block 2  │ ... │
//! │ header   │ node     │ node     │     │
//! └──────────┴──────────┴──────────┴─────┘
//! ```
//! Leaves hold sorted `(key, value)` records; index nodes above them route
//! lookups. Both are chained left to right at each level.
//!
//! - [`SortedTree`] - the single writer: lookup, insert, split
//! - [`TreeScanner`] - a reader: point lookup and forward range scan

mod header;
mod node;
mod scanner;
mod sorted_tree;

pub use header::{NodeHeader, TreeHeader, FORMAT_VERSION};
pub use node::Layout;
pub use scanner::TreeScanner;
pub use sorted_tree::{SeekResult, SortedTree};
