use burn::{
    nn::conv::{Conv2d, Conv2dConfig},
    prelude::*,
};

use nn::Sigmoid;
use tracing::debug;

use super::blocks::{
    DecoderBlock, DecoderBlockConfig, DoubleConvBlock, DoubleConvBlockConfig, EncoderBlock,
    EncoderBlockConfig,
};

/// Number of pooling levels (and skip connections) in the network.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum UNetDepth {
    /// Four encoder stages, three skip connections.
    Three,
    /// Five encoder stages, four skip connections.
    Four,
}

impl UNetDepth {
    pub fn levels(&self) -> usize {
        match self {
            UNetDepth::Three => 3,
            UNetDepth::Four => 4,
        }
    }
}

/// U-Net with same-padded double convolutions, so the output keeps the
/// input's height and width whenever both are divisible by `2^levels`.
///
/// Skip buffers are pushed while descending the encoder and consumed in
/// reverse by the decoder, all within a single [`UNet::forward`] call.
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    encoder_blocks: Vec<EncoderBlock<B>>,
    bottleneck: DoubleConvBlock<B>,
    decoder_blocks: Vec<DecoderBlock<B>>,
    conv_1x1: Conv2d<B>,
    activation: Sigmoid,
}

#[derive(Config, Debug)]
pub struct UNetConfig {
    in_channels: usize,
    #[config(default = "1")]
    out_channels: usize,
    #[config(default = "UNetDepth::Four")]
    depth: UNetDepth,
    #[config(default = "64")]
    base_channels: usize,
}

impl UNetConfig {
    /// Feature channels per encoder level, bottleneck last.
    ///
    /// With the defaults this is `[64, 128, 256, 512, 1024]`.
    pub fn channel_schedule(&self) -> Vec<usize> {
        (0..=self.depth.levels())
            .map(|level| self.base_channels << level)
            .collect()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        self.assertions();

        let channels = self.channel_schedule();
        let levels = self.depth.levels();

        let mut input_channels = self.in_channels;
        let encoder_blocks = channels[..levels]
            .iter()
            .map(|&num_filters| {
                let block = EncoderBlockConfig::new(DoubleConvBlockConfig::new(
                    input_channels,
                    num_filters,
                ))
                .init(device);
                input_channels = num_filters;
                block
            })
            .collect();

        let bottleneck =
            DoubleConvBlockConfig::new(channels[levels - 1], channels[levels]).init(device);

        let decoder_blocks = channels
            .windows(2)
            .rev()
            .map(|pair| {
                let (skip_channels, deeper_channels) = (pair[0], pair[1]);
                DecoderBlockConfig::new(
                    deeper_channels,
                    skip_channels,
                    DoubleConvBlockConfig::new(skip_channels * 2, skip_channels),
                )
                .init(device)
            })
            .collect();

        debug!("Built {levels}-level U-Net with channel schedule {channels:?}");

        UNet {
            encoder_blocks,
            bottleneck,
            decoder_blocks,
            conv_1x1: Conv2dConfig::new([self.base_channels, self.out_channels], [1, 1])
                .init(device),
            activation: Sigmoid::new(),
        }
    }

    fn assertions(&self) {
        assert!(
            self.in_channels > 0,
            "Number of input channels must be positive. Got {}",
            self.in_channels
        );
        assert!(
            self.out_channels > 0,
            "Number of output channels must be positive. Got {}",
            self.out_channels
        );
        assert!(
            self.base_channels > 0,
            "Number of base channels must be positive. Got {}",
            self.base_channels
        );
    }
}

impl<B: Backend> UNet<B> {
    /// Maps `[batch, in_channels, height, width]` images to per-pixel
    /// foreground probabilities of shape `[batch, out_channels, height, width]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skip_features = Vec::with_capacity(self.encoder_blocks.len());
        let mut x = images;

        for block in &self.encoder_blocks {
            let (pooled, skip) = block.forward(x);
            skip_features.push(skip);
            x = pooled;
        }

        let mut x = self.bottleneck.forward(x);

        for (block, skip) in self
            .decoder_blocks
            .iter()
            .zip(skip_features.into_iter().rev())
        {
            x = block.forward(x, skip);
        }

        let x = self.conv_1x1.forward(x);

        self.activation.forward(x)
    }

    pub fn levels(&self) -> usize {
        self.encoder_blocks.len()
    }
}
