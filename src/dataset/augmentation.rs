use burn::prelude::*;
use image::{GrayImage, ImageBuffer, Pixel, imageops};
use imageproc::geometric_transformations::{Interpolation, rotate};
use rand::Rng;
use tracing::debug;

/// Probabilities of the three independent augmentation decisions.
#[derive(Config, Debug)]
pub struct AugmentationConfig {
    #[config(default = 0.5)]
    pub horizontal_flip: f64,
    #[config(default = 0.5)]
    pub vertical_flip: f64,
    #[config(default = 0.5)]
    pub rotation: f64,
}

impl AugmentationConfig {
    pub fn init(&self) -> PairedAugmentor {
        self.assertions();
        PairedAugmentor {
            horizontal_flip: self.horizontal_flip,
            vertical_flip: self.vertical_flip,
            rotation: self.rotation,
        }
    }

    fn assertions(&self) {
        for (name, p) in [
            ("horizontal flip", self.horizontal_flip),
            ("vertical flip", self.vertical_flip),
            ("rotation", self.rotation),
        ] {
            assert!(
                (0.0..=1.0).contains(&p),
                "The {name} probability must be within [0, 1]. Got {p}"
            );
        }
    }
}

/// Geometric transforms drawn for one sample.
///
/// Applying the same plan to an image and its mask keeps them pixel aligned.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AugmentationPlan {
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    /// Counter-clockwise rotation in degrees.
    pub rotation_degrees: Option<f32>,
}

impl AugmentationPlan {
    pub fn is_identity(&self) -> bool {
        !self.horizontal_flip && !self.vertical_flip && self.rotation_degrees.is_none()
    }

    /// Flips, then rotates about the center keeping the input size.
    /// Pixels rotated in from outside the image are set to zero.
    pub fn apply<P>(&self, mut image: ImageBuffer<P, Vec<u8>>) -> ImageBuffer<P, Vec<u8>>
    where
        P: Pixel<Subpixel = u8> + Send + Sync + 'static,
    {
        if self.horizontal_flip {
            imageops::flip_horizontal_in_place(&mut image);
        }
        if self.vertical_flip {
            imageops::flip_vertical_in_place(&mut image);
        }
        if let Some(degrees) = self.rotation_degrees {
            let fill = *P::from_slice(&[0u8; 4][..usize::from(P::CHANNEL_COUNT)]);
            let (width, height) = image.dimensions();
            let center = ((width as f32 - 1.0) / 2.0, (height as f32 - 1.0) / 2.0);
            // imageproc turns clockwise for positive angles
            image = rotate(
                &image,
                center,
                -degrees.to_radians(),
                Interpolation::Nearest,
                fill,
            );
        }

        image
    }
}

/// Draws an [`AugmentationPlan`] per sample and applies it to both members of
/// an image/mask pair.
#[derive(Clone, Debug)]
pub struct PairedAugmentor {
    horizontal_flip: f64,
    vertical_flip: f64,
    rotation: f64,
}

impl PairedAugmentor {
    /// Decisions are drawn in a fixed order: horizontal flip, vertical flip,
    /// rotation, and the angle only when rotation fires.
    pub fn sample_plan<R: Rng>(&self, rng: &mut R) -> AugmentationPlan {
        let horizontal_flip = rng.random_bool(self.horizontal_flip);
        let vertical_flip = rng.random_bool(self.vertical_flip);
        let rotation_degrees = rng
            .random_bool(self.rotation)
            .then(|| rng.random_range(0..360u16) as f32);

        AugmentationPlan {
            horizontal_flip,
            vertical_flip,
            rotation_degrees,
        }
    }

    pub fn augment<P, R>(
        &self,
        image: ImageBuffer<P, Vec<u8>>,
        mask: GrayImage,
        rng: &mut R,
    ) -> (ImageBuffer<P, Vec<u8>>, GrayImage)
    where
        P: Pixel<Subpixel = u8> + Send + Sync + 'static,
        R: Rng,
    {
        let plan = self.sample_plan(rng);
        debug!("Applying augmentation plan {plan:?}");

        if plan.is_identity() {
            return (image, mask);
        }

        (plan.apply(image), plan.apply(mask))
    }
}
