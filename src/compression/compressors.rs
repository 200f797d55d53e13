use std::str::FromStr;

use serde::Serialize;

use crate::error::{Error, ErrorKind, Result};

/// The compressors that may be used to compress messages sent to and
/// decompress messages returned from the server. Note that each variant
/// requires enabling a corresponding feature flag.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[non_exhaustive]
pub enum Compressor {
    /// `zstd` compression. See [the `zstd` manual](http://facebook.github.io/zstd/zstd_manual.html)
    /// for more information.
    #[cfg(feature = "zstd-compression")]
    Zstd {
        /// The compression level to use. It is an error to specify a value
        /// outside of the supported compression levels returned by
        /// [zstd::compression_level_range]. Higher levels correlate to
        /// smaller compression but slower performance.
        level: Option<i32>,
    },

    /// `zlib` compression. See [the `zlib` documentation](https://zlib.net/) for more information.
    #[cfg(feature = "zlib-compression")]
    Zlib {
        /// The compression level to use, between 0 and 9 inclusive. Higher
        /// levels correlate to smaller compression but slower performance.
        level: Option<u32>,
    },

    /// `snappy` compression. See [the `snappy` documentation](http://google.github.io/snappy/)
    /// for more information.
    #[cfg(feature = "snappy-compression")]
    Snappy,
}

#[allow(unreachable_code, unused_variables)]
impl Compressor {
    pub(crate) fn name(&self) -> &'static str {
        match *self {
            #[cfg(feature = "zstd-compression")]
            Compressor::Zstd { .. } => "zstd",
            #[cfg(feature = "zlib-compression")]
            Compressor::Zlib { .. } => "zlib",
            #[cfg(feature = "snappy-compression")]
            Compressor::Snappy => "snappy",
        }
    }

    pub(crate) fn id(&self) -> u8 {
        match *self {
            #[cfg(feature = "zstd-compression")]
            Compressor::Zstd { .. } => super::ZSTD_COMPRESSOR_ID,
            #[cfg(feature = "zlib-compression")]
            Compressor::Zlib { .. } => super::ZLIB_COMPRESSOR_ID,
            #[cfg(feature = "snappy-compression")]
            Compressor::Snappy => super::SNAPPY_COMPRESSOR_ID,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        #[cfg(feature = "zstd-compression")]
        if let Compressor::Zstd { level: Some(level) } = self {
            let valid_levels = zstd::compression_level_range();
            if !valid_levels.contains(level) {
                return Err(ErrorKind::InvalidArgument {
                    message: format!(
                        "invalid zstd compression level {}: compression level must be within the \
                         range {:?}",
                        level, valid_levels
                    ),
                }
                .into());
            }
        }

        #[cfg(feature = "zlib-compression")]
        if let Compressor::Zlib { level: Some(level) } = self {
            if *level > 9 {
                return Err(ErrorKind::InvalidArgument {
                    message: format!(
                        "invalid zlib compression level {}: compression level must be between 0 \
                         and 9 (inclusive)",
                        level
                    ),
                }
                .into());
            }
        }

        Ok(())
    }

    #[cfg(feature = "zlib-compression")]
    pub(crate) fn write_zlib_level(&mut self, uri_level: i32) -> Result<()> {
        #[allow(irrefutable_let_patterns)]
        if let Compressor::Zlib { ref mut level } = *self {
            if uri_level == -1 {
                *level = None;
            } else {
                let zlib_compression_level =
                    u32::try_from(uri_level).map_err(|_| ErrorKind::InvalidArgument {
                        message: format!(
                            "invalid zlib compression level specified: {}; zlib compression \
                             level must be a nonnegative integer or -1 to use the default level",
                            uri_level
                        ),
                    })?;
                *level = Some(zlib_compression_level);
            }
        }
        Ok(())
    }
}

impl FromStr for Compressor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "zstd-compression")]
            "zstd" => Ok(Compressor::Zstd { level: None }),
            #[cfg(feature = "zlib-compression")]
            "zlib" => Ok(Compressor::Zlib { level: None }),
            #[cfg(feature = "snappy-compression")]
            "snappy" => Ok(Compressor::Snappy),
            other if matches!(other, "zstd" | "zlib" | "snappy") => {
                Err(ErrorKind::InvalidArgument {
                    message: format!(
                        "enable the {}-compression feature flag to use {} compression",
                        other, other
                    ),
                }
                .into())
            }
            other => Err(ErrorKind::InvalidArgument {
                message: format!("unsupported compressor: {}", other),
            }
            .into()),
        }
    }
}
