use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use burn::{data::dataloader::batcher::Batcher, prelude::*};
use derive_new::new;
use image::{DynamicImage, GrayImage, ImageBuffer, ImageReader, Pixel, imageops::FilterType};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{error, info};

use super::augmentation::{AugmentationConfig, PairedAugmentor};
use super::error::{DatasetError, DatasetResult};
use super::manifest::Manifest;

#[derive(Config, Debug)]
pub enum InputMode {
    Grayscale,
    RGB,
}

impl InputMode {
    pub fn channels(&self) -> usize {
        match self {
            InputMode::Grayscale => 1,
            InputMode::RGB => 3,
        }
    }
}

#[derive(Config, Debug)]
pub struct SegmentationConfig {
    #[config(default = "InputMode::RGB")]
    pub input_mode: InputMode,
    /// Output `[height, width]` of every image and mask tensor.
    #[config(default = "[256, 256]")]
    pub image_size: [usize; 2],
    /// `None` disables augmentation, as for validation and test splits.
    pub augmentation: Option<AugmentationConfig>,
    /// Makes augmentation reproducible: each index gets its own generator
    /// seeded from this value.
    pub seed: Option<u64>,
}

/// One decoded sample as channel-first `f32` data in `[0, 1]`.
///
/// `image` has shape `[channels, height, width]`, `mask` has shape
/// `[1, height, width]`.
#[derive(new, Clone, Debug)]
pub struct SegmentationItem {
    pub image: TensorData,
    pub mask: TensorData,
}

impl SegmentationItem {
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let image = Tensor::from_data(self.image.clone().convert::<B::FloatElem>(), device);
        let mask = Tensor::from_data(self.mask.clone().convert::<B::FloatElem>(), device);

        (image, mask)
    }
}

/// Image/mask pairs listed by a [`Manifest`] and read from two directories.
///
/// Every call decodes from disk and only reads `self`, so samples can be
/// fetched in any order from any number of loader workers.
pub struct SegmentationDataset {
    manifest: Manifest,
    image_dir: PathBuf,
    mask_dir: PathBuf,
    config: SegmentationConfig,
    augmentor: Option<PairedAugmentor>,
}

impl SegmentationDataset {
    pub fn new<P: AsRef<Path>>(
        manifest: Manifest,
        image_dir: P,
        mask_dir: P,
        config: SegmentationConfig,
    ) -> Self {
        let augmentor = config.augmentation.as_ref().map(AugmentationConfig::init);

        info!(
            "Segmentation dataset with {} samples (augmentation {})",
            manifest.len(),
            if augmentor.is_some() { "on" } else { "off" }
        );

        Self {
            manifest,
            image_dir: image_dir.as_ref().to_path_buf(),
            mask_dir: mask_dir.as_ref().to_path_buf(),
            config,
            augmentor,
        }
    }

    /// Builds the manifest by pairing files in the two directories by stem.
    pub fn from_folders<P: AsRef<Path>>(
        image_dir: P,
        mask_dir: P,
        config: SegmentationConfig,
    ) -> DatasetResult<Self> {
        let manifest = Manifest::scan(&image_dir, &mask_dir)?;

        Ok(Self::new(manifest, image_dir, mask_dir, config))
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Loads sample `index`, drawing augmentation decisions from a generator
    /// owned by this call.
    pub fn try_get(&self, index: usize) -> DatasetResult<SegmentationItem> {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(sample_seed(seed, index)),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        self.get_with_rng(index, &mut rng)
    }

    pub fn get_with_rng<R: Rng>(
        &self,
        index: usize,
        rng: &mut R,
    ) -> DatasetResult<SegmentationItem> {
        let entry = self
            .manifest
            .get(index)
            .ok_or(DatasetError::IndexOutOfRange {
                index,
                len: self.manifest.len(),
            })?;

        let image = decode(&self.image_dir.join(&entry.image))?;
        let mask = decode(&self.mask_dir.join(&entry.mask))?.into_luma8();

        let item = match self.config.input_mode {
            InputMode::RGB => self.prepare(image.into_rgb8(), mask, rng),
            InputMode::Grayscale => self.prepare(image.into_luma8(), mask, rng),
        };

        Ok(item)
    }

    fn prepare<P, R>(
        &self,
        image: ImageBuffer<P, Vec<u8>>,
        mask: GrayImage,
        rng: &mut R,
    ) -> SegmentationItem
    where
        P: Pixel<Subpixel = u8> + Send + Sync + 'static,
        R: Rng,
    {
        let (image, mask) = match &self.augmentor {
            Some(augmentor) => augmentor.augment(image, mask, rng),
            None => (image, mask),
        };

        let [height, width] = self.config.image_size;

        SegmentationItem::new(
            to_tensor_data(&resize(&image, height, width)),
            to_tensor_data(&resize(&mask, height, width)),
        )
    }
}

impl Dataset<SegmentationItem> for SegmentationDataset {
    /// Returns `None` past the end of the manifest. A missing or corrupt file
    /// is fatal for the batch being assembled and panics.
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        match self.try_get(index) {
            Ok(item) => Some(item),
            Err(DatasetError::IndexOutOfRange { .. }) => None,
            Err(err) => {
                error!("Failed to load sample {index}: {err}");
                panic!("Failed to load sample {index}: {err}");
            }
        }
    }

    fn len(&self) -> usize {
        self.manifest.len()
    }
}

/// Per-sample seed. Multiplying the index by an odd 64-bit constant keeps
/// nearby `(seed, index)` pairs from colliding.
fn sample_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

fn decode(path: &Path) -> DatasetResult<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| DatasetError::from_io(path.to_path_buf(), e))?
        .with_guessed_format()
        .map_err(|e| DatasetError::from_io(path.to_path_buf(), e))?
        .decode()
        .map_err(|source| DatasetError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

fn resize<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    height: usize,
    width: usize,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    image::imageops::resize(image, width as u32, height as u32, FilterType::Triangle)
}

/// Interleaved 8-bit pixels to planar `[channels, height, width]` floats.
fn to_tensor_data<P>(image: &ImageBuffer<P, Vec<u8>>) -> TensorData
where
    P: Pixel<Subpixel = u8>,
{
    let (width, height) = image.dimensions();
    let channels = usize::from(P::CHANNEL_COUNT);
    let raw = image.as_raw();

    let data: Vec<f32> = (0..channels)
        .flat_map(|c| {
            raw.iter()
                .skip(c)
                .step_by(channels)
                .map(|&v| f32::from(v) / 255.0)
        })
        .collect();

    TensorData::new(data, [channels, height as usize, width as usize])
}

#[derive(Clone)]
pub struct SegmentationBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

#[derive(Clone, Debug)]
pub struct SegmentationBatch<B: Backend> {
    /// `[batch, channels, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch, 1, height, width]`
    pub masks: Tensor<B, 4>,
}

impl<B: Backend> Batcher<SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    fn batch(&self, items: Vec<SegmentationItem>) -> SegmentationBatch<B> {
        let (images, masks): (Vec<_>, Vec<_>) = items
            .iter()
            .map(|item| item.to_tensors::<B>(&self.device))
            .unzip();

        SegmentationBatch {
            images: Tensor::stack(images, 0),
            masks: Tensor::stack(masks, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ManifestEntry;
    use burn::backend::NdArray;
    use burn::data::dataloader::DataLoaderBuilder;
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use rstest::rstest;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    type TestBackend = NdArray;

    struct Fixture {
        _root: TempDir,
        images: PathBuf,
        masks: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = tempdir().unwrap();
        let images = root.path().join("images");
        let masks = root.path().join("masks");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&masks).unwrap();

        Fixture {
            _root: root,
            images,
            masks,
        }
    }

    fn write_solid_pair(fixture: &Fixture, name: &str, color: [u8; 3], mask_value: u8) {
        RgbImage::from_pixel(4, 4, Rgb(color))
            .save(fixture.images.join(format!("{name}.png")))
            .unwrap();
        GrayImage::from_pixel(4, 4, Luma([mask_value]))
            .save(fixture.masks.join(format!("{name}_mask.png")))
            .unwrap();
    }

    fn single_entry(name: &str) -> Manifest {
        Manifest::new(vec![ManifestEntry::new(
            format!("{name}.png"),
            format!("{name}_mask.png"),
        )])
    }

    fn values(data: &TensorData) -> Vec<f32> {
        data.to_vec::<f32>().unwrap()
    }

    #[test]
    fn solid_pair_stays_constant_after_resize() {
        let fixture = fixture();
        write_solid_pair(&fixture, "a", [51, 102, 204], 255);
        let dataset = SegmentationDataset::new(
            single_entry("a"),
            &fixture.images,
            &fixture.masks,
            SegmentationConfig::new(),
        );

        let item = dataset.try_get(0).unwrap();

        assert_eq!(item.image.shape, vec![3, 256, 256]);
        assert_eq!(item.mask.shape, vec![1, 256, 256]);

        let image = values(&item.image);
        let plane = 256 * 256;
        for (channel, expected) in [51.0f32, 102.0, 204.0].into_iter().enumerate() {
            for value in &image[channel * plane..(channel + 1) * plane] {
                approx::assert_relative_eq!(*value, expected / 255.0, epsilon = 1e-6);
            }
        }
        assert!(values(&item.mask).iter().all(|&v| v == 1.0));
    }

    #[rstest]
    #[case(InputMode::RGB, 3)]
    #[case(InputMode::Grayscale, 1)]
    fn input_mode_sets_channel_count(#[case] input_mode: InputMode, #[case] channels: usize) {
        let fixture = fixture();
        write_solid_pair(&fixture, "a", [10, 20, 30], 0);
        let config = SegmentationConfig::new()
            .with_input_mode(input_mode)
            .with_image_size([32, 48]);
        let dataset =
            SegmentationDataset::new(single_entry("a"), &fixture.images, &fixture.masks, config);

        let item = dataset.try_get(0).unwrap();

        assert_eq!(item.image.shape, vec![channels, 32, 48]);
        assert_eq!(item.mask.shape, vec![1, 32, 48]);
    }

    #[test]
    fn unaugmented_get_is_repeatable() {
        let fixture = fixture();
        let mut image = RgbImage::new(8, 8);
        image.put_pixel(1, 2, Rgb([255, 0, 0]));
        image.save(fixture.images.join("a.png")).unwrap();
        let mut mask = GrayImage::new(8, 8);
        mask.put_pixel(1, 2, Luma([255]));
        mask.save(fixture.masks.join("a_mask.png")).unwrap();

        let dataset = SegmentationDataset::new(
            single_entry("a"),
            &fixture.images,
            &fixture.masks,
            SegmentationConfig::new(),
        );

        let first = dataset.try_get(0).unwrap();
        let second = dataset.try_get(0).unwrap();

        first.image.assert_eq(&second.image, true);
        first.mask.assert_eq(&second.mask, true);
    }

    #[test]
    fn seeded_augmentation_is_reproducible() {
        let fixture = fixture();
        let mut image = RgbImage::new(16, 16);
        image.put_pixel(3, 5, Rgb([255, 255, 255]));
        image.save(fixture.images.join("a.png")).unwrap();
        let mut mask = GrayImage::new(16, 16);
        mask.put_pixel(3, 5, Luma([255]));
        mask.save(fixture.masks.join("a_mask.png")).unwrap();

        let config = SegmentationConfig::new()
            .with_image_size([16, 16])
            .with_augmentation(Some(AugmentationConfig::new()))
            .with_seed(Some(9));
        let dataset =
            SegmentationDataset::new(single_entry("a"), &fixture.images, &fixture.masks, config);

        let first = dataset.try_get(0).unwrap();
        let second = dataset.try_get(0).unwrap();

        first.image.assert_eq(&second.image, true);
        first.mask.assert_eq(&second.mask, true);
    }

    #[test]
    fn adjacent_seeds_do_not_share_plans() {
        let augmentor = AugmentationConfig::new().init();
        let plans = |seed: u64, indices: std::ops::Range<usize>| -> Vec<_> {
            indices
                .map(|index| {
                    let mut rng = StdRng::seed_from_u64(sample_seed(seed, index));
                    (0..4)
                        .map(|_| augmentor.sample_plan(&mut rng))
                        .collect::<Vec<_>>()
                })
                .collect()
        };

        for index in 0..8 {
            assert_ne!(sample_seed(9, index + 1), sample_seed(10, index));
        }
        assert_ne!(plans(9, 1..6), plans(10, 0..5));
        assert_eq!(plans(9, 0..5), plans(9, 0..5));
    }

    #[test]
    fn augmentation_moves_image_and_mask_together() {
        let fixture = fixture();
        let mut image = GrayImage::new(16, 16);
        image.put_pixel(11, 4, Luma([255]));
        image.save(fixture.images.join("a.png")).unwrap();
        image.save(fixture.masks.join("a_mask.png")).unwrap();

        let config = SegmentationConfig::new()
            .with_input_mode(InputMode::Grayscale)
            .with_image_size([16, 16])
            .with_augmentation(Some(AugmentationConfig::new().with_rotation(0.0)));
        let dataset =
            SegmentationDataset::new(single_entry("a"), &fixture.images, &fixture.masks, config);

        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..16 {
            let item = dataset.get_with_rng(0, &mut rng).unwrap();
            assert_eq!(values(&item.image), values(&item.mask));
        }
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let fixture = fixture();
        write_solid_pair(&fixture, "a", [0, 0, 0], 0);
        let dataset = SegmentationDataset::new(
            single_entry("a"),
            &fixture.images,
            &fixture.masks,
            SegmentationConfig::new(),
        );

        assert_eq!(dataset.len(), 1);
        assert!(matches!(
            dataset.try_get(1),
            Err(DatasetError::IndexOutOfRange { index: 1, len: 1 })
        ));
        assert!(dataset.get(1).is_none());
    }

    #[test]
    fn missing_file_is_reported() {
        let fixture = fixture();
        let dataset = SegmentationDataset::new(
            single_entry("ghost"),
            &fixture.images,
            &fixture.masks,
            SegmentationConfig::new(),
        );

        let result = dataset.try_get(0);

        assert!(
            matches!(&result, Err(DatasetError::FileNotFound { path }) if path.ends_with("ghost.png"))
        );
    }

    #[test]
    fn corrupt_file_is_a_decode_error() {
        let fixture = fixture();
        write_solid_pair(&fixture, "a", [0, 0, 0], 0);
        fs::write(fixture.images.join("a.png"), b"definitely not a png").unwrap();
        let dataset = SegmentationDataset::new(
            single_entry("a"),
            &fixture.images,
            &fixture.masks,
            SegmentationConfig::new(),
        );

        assert!(matches!(
            dataset.try_get(0),
            Err(DatasetError::Decode { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "Failed to load sample 0")]
    fn dataset_get_panics_on_missing_file() {
        let fixture = fixture();
        let dataset = SegmentationDataset::new(
            single_entry("ghost"),
            &fixture.images,
            &fixture.masks,
            SegmentationConfig::new(),
        );

        let _ = dataset.get(0);
    }

    #[test]
    fn from_folders_pairs_by_stem() {
        let fixture = fixture();
        RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))
            .save(fixture.images.join("x.png"))
            .unwrap();
        GrayImage::from_pixel(4, 4, Luma([255]))
            .save(fixture.masks.join("x.png"))
            .unwrap();

        let dataset = SegmentationDataset::from_folders(
            &fixture.images,
            &fixture.masks,
            SegmentationConfig::new().with_image_size([8, 8]),
        )
        .unwrap();

        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.try_get(0).unwrap().image.shape, vec![3, 8, 8]);
    }

    #[test]
    fn dataloader_stacks_samples_into_batches() {
        let fixture = fixture();
        let names = ["a", "b", "c"];
        for (i, name) in names.iter().enumerate() {
            write_solid_pair(&fixture, name, [i as u8 * 40; 3], 255);
        }
        let manifest = names
            .iter()
            .map(|name| ManifestEntry::new(format!("{name}.png"), format!("{name}_mask.png")))
            .collect();
        let dataset = SegmentationDataset::new(
            manifest,
            &fixture.images,
            &fixture.masks,
            SegmentationConfig::new().with_image_size([16, 16]),
        );

        let loader = DataLoaderBuilder::new(SegmentationBatcher::<TestBackend>::new(
            Default::default(),
        ))
        .batch_size(2)
        .num_workers(2)
        .build(dataset);

        let mut sizes = Vec::new();
        for batch in loader.iter() {
            let [size, channels, height, width] = batch.images.dims();
            assert_eq!([channels, height, width], [3, 16, 16]);
            assert_eq!(batch.masks.dims(), [size, 1, 16, 16]);
            sizes.push(size);
        }

        assert_eq!(sizes.iter().sum::<usize>(), 3);
        assert!(sizes.iter().all(|&size| size <= 2));
    }
}
