//! # Modem
//!
//! Line coding for outbound frames: FCS, HDLC bitstream and AFSK upsampling.

pub mod crc;
pub mod encoder;
pub mod upsampler;

pub use encoder::{BitstreamEncoder, EncoderConfig, LineBits};
pub use upsampler::Upsampler;
