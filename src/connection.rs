use crate::error::Error;
use crate::record::{self, Record, HEADER_LEN, MAX_PADDING_LEN};
use crate::target::{Address, Target};
use bufstream::BufStream;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

// The OS treats a zero socket timeout as "no timeout", so never hand one out.
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

pub(crate) const READ_CHUNK_LEN: usize = 8192;

/// A buffered stream to a FastCGI application
///
/// Every operation is bounded by a timeout. Nothing here blocks indefinitely.
#[derive(Debug)]
pub enum Connection {
    Tcp(BufStream<TcpStream>),
    UnixSocket(BufStream<UnixStream>),
}

impl From<TcpStream> for Connection {
    fn from(value: TcpStream) -> Self {
        Connection::Tcp(BufStream::new(value))
    }
}

impl From<UnixStream> for Connection {
    fn from(value: UnixStream) -> Self {
        Connection::UnixSocket(BufStream::new(value))
    }
}

impl Connection {
    /// Opens a connection to `target`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the connection is refused, the host or path does not exist,
    /// or `timeout` elapses first.
    pub fn connect(target: &Target, timeout: Duration) -> Result<Self, Error> {
        let connect_error = |source: io::Error| Error::Connect {
            target: target.to_string(),
            source,
        };

        let connection = match target.address() {
            Address::Tcp { host, port } => {
                let addresses = (host.as_str(), *port)
                    .to_socket_addrs()
                    .map_err(connect_error)?;

                let mut last_error = io::Error::new(
                    io::ErrorKind::NotFound,
                    "host did not resolve to any address",
                );
                let mut stream = None;

                for address in addresses {
                    match TcpStream::connect_timeout(&address, timeout.max(MIN_TIMEOUT)) {
                        Ok(s) => {
                            stream = Some(s);
                            break;
                        }
                        Err(err) => last_error = err,
                    }
                }

                let stream = stream.ok_or_else(|| connect_error(last_error))?;
                // Requests are written in one go, waiting for more data gains nothing
                let _ = stream.set_nodelay(true);
                Connection::from(stream)
            }
            // Connecting to a local socket either succeeds or fails right away
            Address::Unix(path) => Connection::from(UnixStream::connect(path).map_err(connect_error)?),
        };

        log::debug!(address:% = target; "Connected to FastCGI application");
        Ok(connection)
    }

    fn set_write_timeout(&self, timeout: Duration) -> io::Result<()> {
        let timeout = Some(timeout.max(MIN_TIMEOUT));
        match self {
            Connection::Tcp(s) => s.get_ref().set_write_timeout(timeout),
            Connection::UnixSocket(s) => s.get_ref().set_write_timeout(timeout),
        }
    }

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        let timeout = Some(timeout.max(MIN_TIMEOUT));
        match self {
            Connection::Tcp(s) => s.get_ref().set_read_timeout(timeout),
            Connection::UnixSocket(s) => s.get_ref().set_read_timeout(timeout),
        }
    }

    /// Writes and flushes all of `bytes`, returning how many were written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WriteFailed`] if the peer went away or the write did not complete within
    /// `timeout`.
    pub fn write_all(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, Error> {
        self.set_write_timeout(timeout)
            .map_err(Error::WriteFailed)?;

        let result = match self {
            Connection::Tcp(s) => s.write_all(bytes).and_then(|_| s.flush()),
            Connection::UnixSocket(s) => s.write_all(bytes).and_then(|_| s.flush()),
        };

        result.map_err(Error::WriteFailed)?;
        Ok(bytes.len())
    }

    /// Reads at most `buf.len()` bytes.
    ///
    /// Returns `Ok(0)` if nothing arrived within `timeout`; the caller decides whether that is
    /// fatal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadFailed`] if the read fails, which includes the peer closing the
    /// connection.
    pub fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.set_read_timeout(timeout).map_err(Error::ReadFailed)?;

        loop {
            let result = match self {
                Connection::Tcp(s) => s.read(buf),
                Connection::UnixSocket(s) => s.read(buf),
            };

            return match result {
                Ok(0) => Err(Error::ReadFailed(io::ErrorKind::UnexpectedEof.into())),
                Ok(n) => Ok(n),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    Ok(0)
                }
                Err(err) => Err(Error::ReadFailed(err)),
            };
        }
    }

    /// Appends to `out` whatever has already arrived, without blocking.
    ///
    /// Returns `true` if the peer closed the connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadFailed`] if the read fails for any reason other than having nothing
    /// left to read.
    pub fn read_available(&mut self, out: &mut Vec<u8>) -> Result<bool, Error> {
        self.set_nonblocking(true).map_err(Error::ReadFailed)?;
        let drained = self.drain_into(out);
        let restored = self.set_nonblocking(false);

        let closed = drained?;
        restored.map_err(Error::ReadFailed)?;
        Ok(closed)
    }

    fn drain_into(&mut self, out: &mut Vec<u8>) -> Result<bool, Error> {
        let mut chunk = [0u8; READ_CHUNK_LEN];

        loop {
            let result = match self {
                Connection::Tcp(s) => s.read(&mut chunk),
                Connection::UnixSocket(s) => s.read(&mut chunk),
            };

            match result {
                Ok(0) => return Ok(true),
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) => return Err(Error::ReadFailed(err)),
            }
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Connection::Tcp(s) => s.get_ref().set_nonblocking(nonblocking),
            Connection::UnixSocket(s) => s.get_ref().set_nonblocking(nonblocking),
        }
    }

    /// Fills `buf` completely, or fails with [`Error::Timedout`] once `deadline` passes.
    pub fn read_exact(&mut self, buf: &mut [u8], deadline: Instant) -> Result<(), Error> {
        let mut filled = 0;

        while filled < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timedout);
            }
            filled += self.read(&mut buf[filled..], remaining)?;
        }

        Ok(())
    }

    /// Reads exactly one record: its header, its content, and its padding.
    pub fn read_record(&mut self, deadline: Instant) -> Result<Record, Error> {
        let mut header = [0u8; HEADER_LEN];
        self.read_exact(&mut header, deadline)?;
        let header = record::decode_header(header)?;

        let mut content = vec![0u8; header.content_length as usize];
        self.read_exact(&mut content, deadline)?;

        let mut padding = [0u8; MAX_PADDING_LEN];
        self.read_exact(&mut padding[..header.padding_length as usize], deadline)?;

        Ok(Record {
            record_type: header.record_type,
            request_id: header.request_id,
            content,
        })
    }

    /// The OS-level handle of the underlying socket
    ///
    /// Only meant for readiness polling. Reading from or writing to it directly would bypass the
    /// buffers.
    pub fn raw_fd(&self) -> RawFd {
        match self {
            Connection::Tcp(s) => s.get_ref().as_raw_fd(),
            Connection::UnixSocket(s) => s.get_ref().as_raw_fd(),
        }
    }

    /// Shuts down both halves of the connection
    pub fn close(&mut self) {
        let _ = match self {
            Connection::Tcp(s) => s.flush().and_then(|_| s.get_ref().shutdown(Shutdown::Both)),
            Connection::UnixSocket(s) => {
                s.flush().and_then(|_| s.get_ref().shutdown(Shutdown::Both))
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{encode_record, RecordType};
    use assert_matches::assert_matches;
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (Connection, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        (Connection::from(ours), theirs)
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn read_returns_zero_on_timeout() {
        let (mut connection, _peer) = pair();
        let mut buf = [0u8; 16];
        let n = connection
            .read(&mut buf, Duration::from_millis(20))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn peer_close_is_a_read_failure() {
        let (mut connection, peer) = pair();
        drop(peer);
        let mut buf = [0u8; 16];
        assert_matches!(
            connection.read(&mut buf, Duration::from_millis(100)),
            Err(Error::ReadFailed(_))
        );
    }

    #[test]
    fn read_exact_times_out() {
        let (mut connection, mut peer) = pair();
        peer.write_all(b"abc").unwrap();

        let mut buf = [0u8; 8];
        let deadline = Instant::now() + Duration::from_millis(50);
        assert_matches!(
            connection.read_exact(&mut buf, deadline),
            Err(Error::Timedout)
        );
    }

    #[test]
    fn records_delivered_in_pieces() {
        let (mut connection, mut peer) = pair();

        let mut bytes = vec![];
        encode_record(RecordType::Stdout, 4, b"Hello, World", &mut bytes).unwrap();

        let writer = thread::spawn(move || {
            for piece in bytes.chunks(3) {
                peer.write_all(piece).unwrap();
                thread::sleep(Duration::from_millis(2));
            }
            peer
        });

        let record = connection.read_record(soon()).unwrap();
        assert_eq!(record.record_type, RecordType::Stdout);
        assert_eq!(record.request_id, 4);
        assert_eq!(record.content, b"Hello, World");

        writer.join().unwrap();
    }

    #[test]
    fn record_cut_short() {
        let (mut connection, mut peer) = pair();

        let mut bytes = vec![];
        encode_record(RecordType::Stdout, 1, b"truncated", &mut bytes).unwrap();
        peer.write_all(&bytes[..10]).unwrap();
        drop(peer);

        assert_matches!(connection.read_record(soon()), Err(Error::ReadFailed(_)));
    }

    #[test]
    fn read_available_takes_what_is_there() {
        let (mut connection, mut peer) = pair();
        let mut out = vec![];

        assert!(!connection.read_available(&mut out).unwrap());
        assert!(out.is_empty());

        peer.write_all(b"first").unwrap();
        peer.write_all(b" second").unwrap();
        assert!(!connection.read_available(&mut out).unwrap());
        assert_eq!(out, b"first second");

        // Back in blocking mode: a timed read still waits
        let mut buf = [0u8; 4];
        assert_eq!(connection.read(&mut buf, Duration::from_millis(20)).unwrap(), 0);
    }

    #[test]
    fn read_available_reports_peer_close() {
        let (mut connection, mut peer) = pair();
        peer.write_all(b"bye").unwrap();
        drop(peer);

        let mut out = vec![];
        assert!(connection.read_available(&mut out).unwrap());
        assert_eq!(out, b"bye");
    }

    #[test]
    fn unix_listener_connection() {
        let path = std::env::temp_dir().join(format!("relic-conn-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let listener = std::os::unix::net::UnixListener::bind(&path).unwrap();

        let target = Target::unix(&path);
        let mut connection = Connection::connect(&target, Duration::from_secs(1)).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        connection.write_all(b"ping", Duration::from_secs(1)).unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        peer.write_all(b"pong").unwrap();
        connection.read_exact(&mut buf, soon()).unwrap();
        assert_eq!(&buf, b"pong");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn write_reaches_the_peer() {
        let (mut connection, mut peer) = pair();
        let written = connection
            .write_all(b"payload", Duration::from_secs(1))
            .unwrap();
        assert_eq!(written, 7);

        let mut buf = [0u8; 7];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"payload");
    }

    #[test]
    fn missing_unix_socket() {
        let target = Target::unix("/nonexistent/relic/php-fpm.sock");
        assert_matches!(
            Connection::connect(&target, Duration::from_millis(100)),
            Err(Error::Connect { .. })
        );
    }

    #[test]
    fn refused_tcp_connection() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let target = Target::tcp("127.0.0.1", port);
        assert_matches!(
            Connection::connect(&target, Duration::from_millis(500)),
            Err(Error::Connect { .. })
        );
    }

    #[test]
    fn tcp_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let target = Target::tcp("127.0.0.1", port);
        let mut connection = Connection::connect(&target, Duration::from_secs(1)).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        peer.write_all(b"pong").unwrap();
        let mut buf = [0u8; 4];
        connection.read_exact(&mut buf, soon()).unwrap();
        assert_eq!(&buf, b"pong");
        assert!(connection.raw_fd() >= 0);
    }
}
