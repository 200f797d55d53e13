use super::Compressor;
use crate::error::Result;

#[allow(unused_variables, unreachable_code)]
impl Compressor {
    /// Compresses the given message payload bytes.
    pub(crate) fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        match *self {
            #[cfg(feature = "zstd-compression")]
            Compressor::Zstd { level } => {
                let level = level.unwrap_or(zstd::DEFAULT_COMPRESSION_LEVEL);
                let compressed = zstd::encode_all(bytes, level).map_err(|e| {
                    crate::error::ErrorKind::Internal {
                        message: format!("an error occurred during zstd compression: {}", e),
                    }
                })?;
                Ok(compressed)
            }
            #[cfg(feature = "zlib-compression")]
            Compressor::Zlib { level } => {
                use std::io::Write;

                let level = match level {
                    Some(level) => flate2::Compression::new(level),
                    None => flate2::Compression::default(),
                };
                let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), level);
                encoder
                    .write_all(bytes)
                    .and_then(|()| encoder.finish())
                    .map_err(|e| {
                        crate::error::ErrorKind::Internal {
                            message: format!("an error occurred during zlib compression: {}", e),
                        }
                        .into()
                    })
            }
            #[cfg(feature = "snappy-compression")]
            Compressor::Snappy => snap::raw::Encoder::new()
                .compress_vec(bytes)
                .map_err(|e| {
                    crate::error::ErrorKind::Internal {
                        message: format!("an error occurred during snappy compression: {}", e),
                    }
                    .into()
                }),
        }
    }
}

#[cfg(all(test, feature = "zlib-compression"))]
mod tests {
    use super::*;
    use crate::compression::decompress;

    #[test]
    fn zlib_round_trip() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let compressor = Compressor::Zlib { level: Some(6) };
        let compressed = compressor.compress(&payload).unwrap();
        assert!(compressed.len() < payload.len());

        let decompressed = decompress(compressor.id(), &compressed).unwrap();
        assert_eq!(decompressed, payload);
    }
}
