pub mod hash;
pub mod hex_codec;
