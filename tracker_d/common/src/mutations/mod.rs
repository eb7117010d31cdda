pub mod normalization;
pub mod shaping;
pub mod smoothing;

pub use normalization::NormalizationMutation;
pub use shaping::ShapingMutation;
pub use smoothing::SmoothingMutation;
