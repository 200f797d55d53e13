use std::{
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};

use crate::{
    error::{Error, ErrorKind, Result},
    options::ServerAddress,
    runtime,
};

pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_TIME: Duration = Duration::from_secs(120);

/// A runtime-agnostic async stream possibly using TLS.
#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
pub(crate) enum AsyncStream {
    /// Stand-in for a stream that has been moved out of a dropped
    /// connection. Reads EOF and discards writes.
    Null,

    /// A basic TCP connection to the server.
    Tcp(TcpStream),

    /// A TLS connection over TCP.
    #[cfg(feature = "rustls-tls")]
    Tls(super::tls_rustls::AsyncTlsStream),

    /// A Unix domain socket connection.
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

/// Stub hit when a TLS connection is requested without a TLS feature flag.
#[cfg(not(feature = "rustls-tls"))]
#[derive(Debug, Clone)]
pub(crate) struct NoTlsConfig;

impl AsyncStream {
    /// Creates a new stream connected to `address` as specified by
    /// `options`, performing the TLS handshake if configured.
    pub(crate) async fn connect(
        address: ServerAddress,
        connect_timeout: Option<Duration>,
        #[allow(unused)] tls_config: Option<&runtime::TlsConfig>,
    ) -> Result<Self> {
        match address {
            ServerAddress::Tcp { ref host, .. } => {
                let inner = tcp_connect(&address, connect_timeout).await?;

                #[cfg(feature = "rustls-tls")]
                match tls_config {
                    Some(cfg) => {
                        let host = host.to_string();
                        let tls_stream =
                            super::tls_rustls::AsyncTlsStream::connect(&host, inner, cfg).await?;
                        Ok(Self::Tls(tls_stream))
                    }
                    None => Ok(Self::Tcp(inner)),
                }

                #[cfg(not(feature = "rustls-tls"))]
                {
                    let _ = host;
                    match tls_config {
                        Some(_) => Err(ErrorKind::InvalidTlsConfig {
                            message: "a TLS feature flag must be enabled to connect with TLS"
                                .to_string(),
                        }
                        .into()),
                        None => Ok(Self::Tcp(inner)),
                    }
                }
            }
            #[cfg(unix)]
            ServerAddress::Unix { ref path } => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok(Self::Unix(stream))
            }
        }
    }
}

async fn tcp_connect(
    address: &ServerAddress,
    connect_timeout: Option<Duration>,
) -> Result<TcpStream> {
    let timeout = match connect_timeout {
        Some(timeout) if !timeout.is_zero() => timeout,
        _ => DEFAULT_CONNECT_TIMEOUT,
    };

    let mut socket_addrs: Vec<SocketAddr> = runtime::timeout(timeout, async {
        tokio::net::lookup_host(address.to_socket_addr_format()).await
    })
    .await??
    .collect();

    if socket_addrs.is_empty() {
        return Err(ErrorKind::DnsResolve {
            message: format!("address {} did not resolve to any hosts", address),
        }
        .into());
    }

    // Try each resolved address in sequence, preferring IPv4, and return the
    // first successful connection.
    socket_addrs.sort_by_key(|addr| if addr.is_ipv4() { 0 } else { 1 });

    let mut connect_error = None;

    for socket_addr in &socket_addrs {
        match runtime::timeout(timeout, try_connect(socket_addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(err)) | Err(err) => connect_error = Some(err),
        }
    }

    Err(connect_error.unwrap_or_else(|| {
        Error::from(ErrorKind::DnsResolve {
            message: format!("could not connect to any host resolved for {}", address),
        })
    }))
}

async fn try_connect(address: &SocketAddr) -> Result<TcpStream> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;

    // enable TCP keepalive so dead peers are detected even when idle
    let socket = socket2::Socket::from(stream.into_std()?);
    let conf = socket2::TcpKeepalive::new().with_time(KEEPALIVE_TIME);
    socket.set_tcp_keepalive(&conf)?;
    let std_stream = std::net::TcpStream::from(socket);
    Ok(TcpStream::from_std(std_stream)?)
}

impl AsyncRead for AsyncStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Null => Poll::Ready(Ok(())),
            Self::Tcp(ref mut inner) => Pin::new(inner).poll_read(cx, buf),
            #[cfg(feature = "rustls-tls")]
            Self::Tls(ref mut inner) => Pin::new(inner).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(ref mut inner) => Pin::new(inner).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AsyncStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Null => Poll::Ready(Ok(buf.len())),
            Self::Tcp(ref mut inner) => Pin::new(inner).poll_write(cx, buf),
            #[cfg(feature = "rustls-tls")]
            Self::Tls(ref mut inner) => Pin::new(inner).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(ref mut inner) => Pin::new(inner).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Null => Poll::Ready(Ok(())),
            Self::Tcp(ref mut inner) => Pin::new(inner).poll_flush(cx),
            #[cfg(feature = "rustls-tls")]
            Self::Tls(ref mut inner) => Pin::new(inner).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(ref mut inner) => Pin::new(inner).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Null => Poll::Ready(Ok(())),
            Self::Tcp(ref mut inner) => Pin::new(inner).poll_shutdown(cx),
            #[cfg(feature = "rustls-tls")]
            Self::Tls(ref mut inner) => Pin::new(inner).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(ref mut inner) => Pin::new(inner).poll_shutdown(cx),
        }
    }
}
