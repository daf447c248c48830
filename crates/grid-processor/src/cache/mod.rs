//! Cache implementations for grid processing.

mod scene_cache;

pub use scene_cache::SceneCache;
