use crate::connection::{Connection, READ_CHUNK_LEN};
use crate::error::Error;
use crate::record::{self, pairs, BeginRequest, EndRequest, Record, RecordType, Role};
use crate::request::{Callbacks, Request};
use crate::response::Response;
use crate::target::Target;
use std::collections::BTreeMap;
use std::io;
use std::num::NonZeroU16;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

/// Where a [`Socket`] is in its request/response cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Idle,
    Sending,
    AwaitingResponse,
    Complete,
    Failed,
}

impl SocketState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::AwaitingResponse => "awaiting a response",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

/// One connection to a FastCGI application, carrying one request at a time
///
/// The socket id doubles as the FastCGI request id of everything sent over the connection.
///
/// A socket goes through `Idle -> Sending -> AwaitingResponse -> Complete`. Any error moves it to
/// `Failed`, after which it cannot be used again. A completed socket can carry another request
/// only if the previous one asked for the connection to be kept alive.
pub struct Socket {
    id: NonZeroU16,
    target: Target,
    connection: Option<Connection>,
    state: SocketState,
    keep_alive: bool,
    read_write_timeout: Duration,
    started_at: Instant,
    sent_at: Option<Instant>,
    // Received bytes not yet decoded into records
    pending: Vec<u8>,
    output: Vec<u8>,
    error: Vec<u8>,
    response: Option<Response>,
    callbacks: Callbacks,
}

impl Socket {
    /// Creates an idle socket. The connection is only opened when a request is sent.
    pub fn new(id: NonZeroU16, target: Target) -> Self {
        let read_write_timeout = target.read_write_timeout;
        Self {
            id,
            target,
            connection: None,
            state: SocketState::Idle,
            keep_alive: false,
            read_write_timeout,
            started_at: Instant::now(),
            sent_at: None,
            pending: Vec::new(),
            output: Vec::new(),
            error: Vec::new(),
            response: None,
            callbacks: Callbacks::default(),
        }
    }

    pub fn id(&self) -> u16 {
        self.id.get()
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Whether [`Socket::send_request`] may be called
    pub fn is_usable(&self) -> bool {
        match self.state {
            SocketState::Idle => true,
            SocketState::Complete => self.keep_alive && self.connection.is_some(),
            _ => false,
        }
    }

    /// How much of the read/write timeout is left for the request in flight
    pub fn remaining(&self) -> Duration {
        match self.sent_at {
            Some(sent_at) => {
                (sent_at + self.read_write_timeout).saturating_duration_since(Instant::now())
            }
            None => Duration::ZERO,
        }
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            id: self.id(),
            operation,
            state: self.state.as_str(),
        }
    }

    // The connection is shut down but stays open until the socket is dropped, so that its handle
    // can still be deregistered.
    fn close(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            connection.close();
        }
    }

    fn fail(&mut self) {
        self.state = SocketState::Failed;
        self.close();
    }

    /// Sends `request` to the application, connecting first if needed.
    ///
    /// Returns as soon as the request has been written. The response is collected with
    /// [`Socket::fetch_response`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if no connection could be established and
    /// [`Error::WriteFailed`] if the request could not be written. Either leaves the socket
    /// `Failed`.
    pub fn send_request(&mut self, request: Request) -> Result<(), Error> {
        if !self.is_usable() {
            return Err(self.invalid_state("send a request"));
        }

        self.state = SocketState::Sending;
        self.pending.clear();
        self.output.clear();
        self.error.clear();
        self.response = None;
        self.sent_at = None;
        self.started_at = Instant::now();
        self.keep_alive = request.keep_alive();
        self.read_write_timeout = request
            .read_write_timeout
            .unwrap_or(self.target.read_write_timeout);

        let connect_timeout = request
            .connect_timeout
            .unwrap_or(self.target.connect_timeout);

        if let Err(err) = self.transmit(&request, connect_timeout) {
            log::warn!(request_id = self.id(), error:err = err; "Sending FastCGI request failed");
            self.fail();
            return Err(err);
        }

        log::debug!(
            request_id = self.id(),
            method = request.method(),
            script = request.script_filename();
            "FastCGI request sent"
        );

        self.callbacks = request.callbacks;
        self.sent_at = Some(Instant::now());
        self.state = SocketState::AwaitingResponse;
        Ok(())
    }

    fn transmit(&mut self, request: &Request, connect_timeout: Duration) -> Result<(), Error> {
        let bytes = encode_request(self.id(), request)?;

        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => Connection::connect(&self.target, connect_timeout)?,
        };

        self.connection
            .insert(connection)
            .write_all(&bytes, self.read_write_timeout)?;
        Ok(())
    }

    /// Waits at most `timeout` for the response to the request in flight.
    ///
    /// Once the response is complete, further calls return the same response without touching
    /// the connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timedout`] if `timeout` elapses first. This, or any read or decoding
    /// error, leaves the socket `Failed`.
    pub fn fetch_response(&mut self, timeout: Duration) -> Result<&Response, Error> {
        match self.state {
            SocketState::AwaitingResponse => self.receive(timeout)?,
            SocketState::Complete => {}
            _ => return Err(self.invalid_state("fetch a response")),
        }

        self.response
            .as_ref()
            .ok_or_else(|| self.invalid_state("fetch a response"))
    }

    fn receive(&mut self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;

        match self.read_until_end(deadline) {
            Ok(response) => {
                self.complete(response);
                Ok(())
            }
            Err(err) => {
                log::warn!(request_id = self.id(), error:err = err; "Receiving FastCGI response failed");
                self.fail();
                Err(err)
            }
        }
    }

    fn read_until_end(&mut self, deadline: Instant) -> Result<Response, Error> {
        let mut chunk = [0u8; READ_CHUNK_LEN];

        loop {
            if let Some(response) = self.decode_pending()? {
                return Ok(response);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                // Whatever already arrived still counts
                let closed = self.drain()?;
                return match self.decode_pending()? {
                    Some(response) => Ok(response),
                    None if closed => Err(Error::ReadFailed(io::ErrorKind::UnexpectedEof.into())),
                    None => Err(Error::Timedout),
                };
            }

            let connection = self.connection.as_mut().ok_or_else(not_connected)?;
            let n = connection.read(&mut chunk, remaining)?;
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    fn drain(&mut self) -> Result<bool, Error> {
        let connection = self.connection.as_mut().ok_or_else(not_connected)?;
        connection.read_available(&mut self.pending)
    }

    /// Decodes what has arrived so far, without waiting for more.
    ///
    /// Returns `true` once the response is complete. A request whose read/write timeout has run
    /// out without a complete response fails with [`Error::Timedout`].
    ///
    /// # Errors
    ///
    /// Any error leaves the socket `Failed`.
    pub(crate) fn advance(&mut self) -> Result<bool, Error> {
        match self.state {
            SocketState::AwaitingResponse => {}
            SocketState::Complete => return Ok(true),
            _ => return Err(self.invalid_state("read a response")),
        }

        let result = self.drain().and_then(|closed| {
            match self.decode_pending()? {
                Some(response) => Ok(Some(response)),
                None if closed => Err(Error::ReadFailed(io::ErrorKind::UnexpectedEof.into())),
                None if self.remaining().is_zero() => Err(Error::Timedout),
                None => Ok(None),
            }
        });

        match result {
            Ok(Some(response)) => {
                self.complete(response);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(err) => {
                log::warn!(request_id = self.id(), error:err = err; "Receiving FastCGI response failed");
                self.fail();
                Err(err)
            }
        }
    }

    // Consumes every complete record in the pending bytes, up to the end of the request
    fn decode_pending(&mut self) -> Result<Option<Response>, Error> {
        let id = self.id();
        let mut consumed = 0;
        let mut end = None;

        while let Some((record, used)) = Record::decode(&self.pending[consumed..])? {
            consumed += used;

            if record.request_id != id {
                log::debug!(
                    request_id = id,
                    record_request_id = record.request_id;
                    "Skipping record for another request"
                );
                continue;
            }

            match record.record_type {
                RecordType::Stdout => self.output.extend_from_slice(&record.content),
                RecordType::Stderr => self.error.extend_from_slice(&record.content),
                RecordType::EndRequest => {
                    end = Some(EndRequest::from_record_bytes(&record.content)?);
                    break;
                }
                other => {
                    log::debug!(request_id = id, record_type = other.id(); "Skipping record");
                }
            }
        }

        self.pending.drain(..consumed);

        Ok(end.map(|end| {
            Response::new(
                id,
                std::mem::take(&mut self.output),
                std::mem::take(&mut self.error),
                end,
                self.started_at.elapsed(),
            )
        }))
    }

    fn complete(&mut self, response: Response) {
        if !response.error().is_empty() {
            log::warn!(
                request_id = self.id(),
                stderr = String::from_utf8_lossy(response.error()).as_ref();
                "FastCGI application wrote to stderr"
            );
        }

        log::debug!(
            request_id = self.id(),
            app_status = response.app_status(),
            elapsed = response.duration().as_micros();
            "FastCGI response received"
        );

        if !self.keep_alive {
            self.close();
        }

        self.response = Some(response);
        self.state = SocketState::Complete;
    }

    /// Inserts the OS handle of the connection into `registry`, keyed by the socket id.
    ///
    /// Nothing is inserted while the socket has no open connection.
    pub fn collect_resource(&self, registry: &mut BTreeMap<u16, RawFd>) {
        if let Some(connection) = &self.connection {
            registry.insert(self.id(), connection.raw_fd());
        }
    }

    /// Hands `response` to the response callbacks of the request that was sent
    pub fn notify_response_callbacks(&mut self, response: &Response) {
        self.callbacks.notify_response(response);
    }

    /// Hands `error` to the failure callbacks of the request that was sent
    pub fn notify_failure_callbacks(&mut self, error: &Error) {
        self.callbacks.notify_failure(error);
    }

    fn take_response(&mut self, timeout: Duration) -> Result<Response, Error> {
        self.fetch_response(timeout)?;
        self.response
            .take()
            .ok_or_else(|| self.invalid_state("take the response"))
    }

    /// Waits for the response and retires the socket, without invoking any callback
    pub(crate) fn retire(mut self, timeout: Duration) -> Result<Response, Error> {
        self.take_response(timeout)
    }

    /// Waits for the response, hands the outcome to the matching callbacks, and retires the socket
    pub(crate) fn finish(mut self, timeout: Duration) -> Result<Response, Error> {
        match self.take_response(timeout) {
            Ok(response) => {
                self.notify_response_callbacks(&response);
                Ok(response)
            }
            Err(err) => {
                self.notify_failure_callbacks(&err);
                Err(err)
            }
        }
    }
}

fn not_connected() -> Error {
    Error::ReadFailed(io::ErrorKind::NotConnected.into())
}

// BEGIN_REQUEST, then the PARAMS stream, then the STDIN stream.
fn encode_request(id: u16, request: &Request) -> Result<Vec<u8>, Error> {
    let mut out = vec![];

    let begin = BeginRequest::new(Role::Responder, request.keep_alive());
    record::encode_record(
        RecordType::BeginRequest,
        id,
        &begin.to_record_bytes(),
        &mut out,
    )?;

    let params = pairs::encode(request.params())?;
    record::encode_stream(RecordType::Params, id, &params, &mut out)?;
    record::encode_stream(RecordType::Stdin, id, request.content(), &mut out)?;

    Ok(out)
}
