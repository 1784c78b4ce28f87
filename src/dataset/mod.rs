mod augmentation;
mod error;
mod manifest;
mod segmentation;

pub use augmentation::{AugmentationConfig, AugmentationPlan, PairedAugmentor};
pub use error::{DatasetError, DatasetResult};
pub use manifest::{Manifest, ManifestEntry, SUPPORTED_FILES};
pub use segmentation::{
    InputMode, SegmentationBatch, SegmentationBatcher, SegmentationConfig, SegmentationDataset,
    SegmentationItem,
};
