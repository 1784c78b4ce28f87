pub mod model;

#[cfg(feature = "dataset")]
pub mod dataset;

pub use model::{UNet, UNetConfig, UNetDepth};

#[cfg(feature = "dataset")]
pub use dataset::{
    AugmentationConfig, InputMode, Manifest, ManifestEntry, SegmentationConfig,
    SegmentationDataset,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
