mod compress;
mod compressors;
mod decompress;

pub use compressors::Compressor;
pub(crate) use decompress::decompress;

pub(crate) const SNAPPY_COMPRESSOR_ID: u8 = 1;
pub(crate) const ZLIB_COMPRESSOR_ID: u8 = 2;
pub(crate) const ZSTD_COMPRESSOR_ID: u8 = 3;
