// The coordination internals, in dependency order: progress aggregation and
// the backend trait seams at the bottom, then the loader and the acquisition
// ladder, then the single-flight cache and the composite encoder on top.

pub mod acquisition;
pub mod backend;
pub mod compositor;
pub mod depth_cache;
pub mod loader;
pub mod progress;
