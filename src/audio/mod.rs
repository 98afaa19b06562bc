pub mod codec;
pub mod pcm;

pub use codec::CodecConfig;
