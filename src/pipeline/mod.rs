//! Pipeline stages for turning scanned pages into one published PNG.
//!
//! Each submodule implements exactly one transformation step so each can be
//! tested on its own and the two external collaborators (quantizer, blob
//! store) can be replaced behind their traits.
//!
//! ## Data Flow
//!
//! ```text
//! keys ──▶ input ──▶ normalize ──▶ compress ──▶ upload
//! (paths)  (PNG gate) (trim/pad/stack) (pngquant) (object store)
//! ```
//!
//! 1. [`keys`]      derive the local path and remote key from a coordinate
//! 2. [`input`]     refuse anything that is not a decodable PNG
//! 3. [`normalize`] trim margins, add a uniform border, stack pages
//! 4. [`compress`]  quantize through temp files into the local destination;
//!    blocking, so callers use `spawn_blocking`
//! 5. [`upload`]    put the local file into the bucket on its own task

pub mod compress;
pub mod input;
pub mod keys;
pub mod normalize;
pub mod upload;
