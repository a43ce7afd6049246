//! bloomfield - procedural point-and-link field animation with a bloom renderer.
//!
//! A cube of randomly placed nodes, joined by a fixed set of links, drifts
//! toward a freshly generated layout every cycle while the whole group turns
//! slowly about its vertical axis. Frames are drawn through a pass chain of
//! scene, bloom extraction and bloom composite.
//!
//! The crate is split along the frame's data flow:
//!
//! - [`field`] generates nodes and links
//! - [`scheduler`] blends displayed positions toward each new target
//! - [`buffer`] flattens positions into vertex buffers
//! - [`pipeline`] owns the camera, controls and passes and drives a renderer
//! - `gpu` (feature `gpu`) renders with wgpu

pub mod buffer;
pub mod config;
pub mod error;
pub mod field;
pub mod pipeline;
pub mod scheduler;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use error::{Error, Result};
