//! Data models: the input source inventory and the output graph document.

pub mod graph;
pub mod inventory;
