pub(crate) mod handshake;

use std::time::Duration;

use self::handshake::{Handshaker, HandshakerOptions};
use crate::{
    client::options::ClientOptions,
    cmap::Connection,
    error::Result,
    hello::HelloReply,
    options::ServerAddress,
    runtime::{self, AsyncStream},
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Contains the logic to establish a connection, including the handshake,
/// compression negotiation, and authentication.
#[derive(Clone, Debug)]
pub(crate) struct ConnectionEstablisher {
    handshaker: Handshaker,
    tls_config: Option<runtime::TlsConfig>,
    connect_timeout: Duration,
}

impl ConnectionEstablisher {
    /// Creates a new ConnectionEstablisher from the given options.
    pub(crate) fn from_client_options(options: &ClientOptions) -> Result<Self> {
        let handshaker = Handshaker::new(HandshakerOptions {
            app_name: options.app_name.clone(),
            compressors: options.compressors.clone(),
            credential: options.credential.clone(),
        });

        #[cfg(feature = "rustls-tls")]
        let tls_config = options
            .tls_options()
            .map(runtime::TlsConfig::new)
            .transpose()?;

        #[cfg(not(feature = "rustls-tls"))]
        let tls_config = match options.tls_options() {
            Some(_) => {
                return Err(crate::error::ErrorKind::InvalidTlsConfig {
                    message: "a TLS feature flag must be enabled to connect over TLS".to_string(),
                }
                .into());
            }
            None => None,
        };

        let connect_timeout = match options.connect_timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => DEFAULT_CONNECT_TIMEOUT,
        };

        Ok(Self {
            handshaker,
            tls_config,
            connect_timeout,
        })
    }

    async fn make_stream(&self, address: ServerAddress) -> Result<AsyncStream> {
        AsyncStream::connect(address, Some(self.connect_timeout), self.tls_config.as_ref()).await
    }

    /// Establishes an application connection: connects, handshakes, and
    /// authenticates.
    pub(crate) async fn establish_connection(
        &self,
        address: ServerAddress,
        id: u32,
        generation: u32,
    ) -> Result<Connection> {
        let stream = self.make_stream(address.clone()).await?;

        let mut connection = Connection::new(id, address, generation, stream);
        self.handshaker.handshake(&mut connection).await?;

        Ok(connection)
    }

    /// Establishes a monitoring connection, skipping authentication. The
    /// initial hello reply is returned alongside the connection so the
    /// monitor can publish it.
    pub(crate) async fn establish_monitoring_connection(
        &self,
        address: ServerAddress,
    ) -> Result<(Connection, HelloReply)> {
        let stream = self.make_stream(address.clone()).await?;

        let mut connection = Connection::new(0, address, 0, stream);
        let hello_reply = self.handshaker.handshake_without_auth(&mut connection).await?;

        Ok((connection, hello_reply))
    }
}
