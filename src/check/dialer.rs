//! Interface-bound dialer and TLS client setup
//!
//! Every probe socket is forced onto a named interface with
//! `SO_BINDTODEVICE` before the connect is initiated, so the kernel's
//! routing never gets a say in which uplink a leg uses.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, RootCertStore};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use super::error::{CheckError, CheckResult};

/// Connect deadline, kept well under the per-leg probe deadline
pub const DIAL_TIMEOUT: Duration = Duration::from_millis(500);

/// rustls client configuration with the Mozilla root set
#[must_use]
pub fn tls_client_config() -> ClientConfig {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

/// TCP dialer pinned to one network interface
#[derive(Debug, Clone)]
pub struct BoundDialer {
    device: String,
}

impl BoundDialer {
    /// Create a dialer for the named interface
    #[must_use]
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }

    /// The interface this dialer binds to
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Connect to `target` through the bound interface
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::Dial`] on socket setup, bind or connect
    /// failure, including the connect deadline.
    pub async fn dial(&self, target: SocketAddr) -> CheckResult<TcpStream> {
        let domain = if target.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| self.dial_err(target, format!("socket: {e}")))?;

        self.bind_device(&socket)
            .map_err(|e| self.dial_err(target, e.to_string()))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| self.dial_err(target, format!("O_NONBLOCK: {e}")))?;

        // EINPROGRESS is the expected outcome of a non-blocking connect
        match socket.connect(&target.into()) {
            Ok(()) => {}
            Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => return Err(self.dial_err(target, e.to_string())),
        }

        let std_stream: std::net::TcpStream = socket.into();
        let stream = TcpStream::from_std(std_stream)
            .map_err(|e| self.dial_err(target, e.to_string()))?;

        timeout(DIAL_TIMEOUT, async {
            stream
                .writable()
                .await
                .map_err(|e| self.dial_err(target, e.to_string()))?;

            // a failed connect parks the error in SO_ERROR
            match stream.take_error() {
                Ok(None) => Ok(()),
                Ok(Some(e)) => Err(self.dial_err(target, e.to_string())),
                Err(e) => Err(self.dial_err(target, e.to_string())),
            }
        })
        .await
        .map_err(|_| self.dial_err(target, format!("connect timed out after {DIAL_TIMEOUT:?}")))??;

        trace!(device = %self.device, target = %target, "probe socket connected");
        Ok(stream)
    }

    /// Apply `SO_BINDTODEVICE`
    fn bind_device(&self, socket: &Socket) -> io::Result<()> {
        // IFNAMSIZ allows 15 bytes plus the terminator
        if self.device.len() > 15 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("interface name too long: {}", self.device),
            ));
        }

        let fd = socket.as_raw_fd();
        let mut ifname = [0u8; 16];
        ifname[..self.device.len()].copy_from_slice(self.device.as_bytes());

        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_BINDTODEVICE,
                ifname.as_ptr().cast::<libc::c_void>(),
                ifname.len() as libc::socklen_t,
            )
        };

        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn dial_err(&self, target: SocketAddr, reason: String) -> CheckError {
        CheckError::Dial {
            device: self.device.clone(),
            target,
            reason,
        }
    }
}

/// Shared TLS connector for probe legs
#[must_use]
pub fn tls_connector() -> tokio_rustls::TlsConnector {
    tokio_rustls::TlsConnector::from(Arc::new(tls_client_config()))
}
