mod blocks;
mod unet;

pub use blocks::{
    DecoderBlock, DecoderBlockConfig, DoubleConvBlock, DoubleConvBlockConfig, EncoderBlock,
    EncoderBlockConfig, match_spatial_size,
};

pub use unet::{UNet, UNetConfig, UNetDepth};
