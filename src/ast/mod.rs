//! Abstract Syntax Tree for the permission-oriented scripting language.
//!
//! The parser (`crate::parser`) produces these node types. The surface
//! syntax they come from is this crate's own concern; spec compliance only
//! cares that the tree is tagged, positioned, and arena-indexed rather than
//! pointer-linked (see DESIGN.md, "Back-references in the AST").

pub mod types;

pub use types::*;
