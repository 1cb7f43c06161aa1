use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::address::Address;
use crate::error::Result;

/// The stream under a connection: a Unix domain socket or a TCP socket,
/// selected by the address scheme. In tests an in-memory duplex pipe stands
/// in for either.
pub(crate) enum Transport {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
    #[cfg(test)]
    Mem(tokio::io::DuplexStream),
}

impl Transport {
    /// Open a transport for the given address.
    pub(crate) async fn connect(address: &Address) -> Result<Self> {
        match address {
            #[cfg(unix)]
            Address::Unix { path } => Ok(Transport::Unix(UnixStream::connect(path).await?)),
            #[cfg(not(unix))]
            Address::Unix { .. } => Err(crate::error::Error::new(
                crate::error::ErrorKind::InvalidAddress(
                    "unix sockets are not supported on this platform".into(),
                ),
            )),
            Address::UnixAbstract { name } => Self::connect_abstract(name).await,
            Address::Tcp { host, port } => Ok(Transport::Tcp(
                TcpStream::connect((host.as_str(), *port)).await?,
            )),
        }
    }

    #[cfg(target_os = "linux")]
    async fn connect_abstract(name: &str) -> Result<Self> {
        use std::os::linux::net::SocketAddrExt;

        let address = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
        let stream = std::os::unix::net::UnixStream::connect_addr(&address)?;
        stream.set_nonblocking(true)?;
        Ok(Transport::Unix(UnixStream::from_std(stream)?))
    }

    #[cfg(not(target_os = "linux"))]
    async fn connect_abstract(name: &str) -> Result<Self> {
        Err(crate::error::Error::new(
            crate::error::ErrorKind::InvalidAddress(
                format!("unix:abstract={name} requires the Linux abstract namespace").into(),
            ),
        ))
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(test)]
            Transport::Mem(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(test)]
            Transport::Mem(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(test)]
            Transport::Mem(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(test)]
            Transport::Mem(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
