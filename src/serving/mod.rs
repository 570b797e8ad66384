//! Serving path: the active version snapshot and the prediction service.

mod cache;
mod predict;

pub use cache::ActiveVersionCache;
pub use predict::PredictionService;
