use crate::error::{Error, ErrorKind, Result};

/// Decompresses a message payload with the compressor named by
/// `compressor_id`. Responses are decompressed with whatever compressor the
/// server chose, independent of what the request was compressed with.
#[allow(unused_variables)]
pub(crate) fn decompress(compressor_id: u8, source: &[u8]) -> Result<Vec<u8>> {
    match compressor_id {
        #[cfg(feature = "zstd-compression")]
        super::ZSTD_COMPRESSOR_ID => zstd::decode_all(source).map_err(|e| {
            ErrorKind::Internal {
                message: format!("an error occurred during zstd decompression: {}", e),
            }
            .into()
        }),

        #[cfg(feature = "zlib-compression")]
        super::ZLIB_COMPRESSOR_ID => {
            use std::io::Read;

            let mut decoder = flate2::read::ZlibDecoder::new(source);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| {
                Error::from(ErrorKind::Internal {
                    message: format!("an error occurred during zlib decompression: {}", e),
                })
            })?;
            Ok(out)
        }

        #[cfg(feature = "snappy-compression")]
        super::SNAPPY_COMPRESSOR_ID => snap::raw::Decoder::new()
            .decompress_vec(source)
            .map_err(|e| {
                Error::from(ErrorKind::Internal {
                    message: format!("an error occurred during snappy decompression: {}", e),
                })
            }),

        other => Err(ErrorKind::InvalidResponse {
            message: format!(
                "the server replied with compressor id {}, which the driver was not built to \
                 decompress",
                other
            ),
        }
        .into()),
    }
}
