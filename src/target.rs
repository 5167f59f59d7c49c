use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_READ_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a FastCGI application listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Address::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// A FastCGI application to send requests to
///
/// ```
/// use relic::Target;
/// use std::time::Duration;
///
/// let php_fpm = Target::tcp("127.0.0.1", 9000)
///     .connect_timeout(Duration::from_secs(1))
///     .read_write_timeout(Duration::from_secs(30));
///
/// let local = Target::unix("/run/php/php-fpm.sock");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub(crate) address: Address,
    pub(crate) connect_timeout: Duration,
    pub(crate) read_write_timeout: Duration,
}

impl Target {
    fn new(address: Address) -> Self {
        Self {
            address,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_write_timeout: DEFAULT_READ_WRITE_TIMEOUT,
        }
    }

    /// An application listening on a TCP port
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(Address::Tcp {
            host: host.into(),
            port,
        })
    }

    /// An application listening on a Unix domain socket
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::new(Address::Unix(path.into()))
    }

    /// Sets how long establishing the connection may take
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets how long writing a request, and waiting for its response, may take
    pub fn read_write_timeout(mut self, timeout: Duration) -> Self {
        self.read_write_timeout = timeout;
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.address.fmt(f)
    }
}
