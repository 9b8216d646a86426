// crates/clipshift-media/src/helpers/mod.rs
//
// ffmpeg-facing helpers shared by the decode and encode paths.
// Not re-exported from lib.rs.

pub mod frame;
pub mod seek;
