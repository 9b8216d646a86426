// crates/clipshift-core/src/helpers/mod.rs
//
// Small pure helpers shared by clipshift-media and the CLI.

pub mod geometry;
pub mod sequence;
pub mod time;
