use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::socket::Socket;
use crate::target::Target;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::num::NonZeroU16;
use std::time::Duration;

/// Sends requests to FastCGI applications and collects their responses
///
/// Every request travels on its own connection, so any number of requests can be in flight at
/// once, to one or several applications. Each request is identified by the id returned from
/// [`Client::send_async_request`] until its response is collected.
///
/// Responses are collected one at a time with [`Client::wait_for_response`], or in whatever order
/// they arrive with [`Client::handle_ready_responses`] and [`Client::wait_for_responses`]. The
/// callbacks registered on a request run when its response, or its failure, is collected that way.
pub struct Client {
    next_id: NonZeroU16,
    sockets: BTreeMap<u16, Socket>,
    poll: Poll,
    events: Events,
}

impl Client {
    pub fn new() -> Result<Self, Error> {
        let poll = Poll::new().map_err(Error::Poll)?;
        let events = Events::with_capacity(128);
        Ok(Client {
            next_id: NonZeroU16::MIN,
            sockets: BTreeMap::new(),
            poll,
            events,
        })
    }

    // Ids count up from 1, wrap after 65535, and skip the ones still in flight
    fn allocate_id(&mut self) -> Result<NonZeroU16, Error> {
        for _ in 0..u16::MAX {
            let id = self.next_id;
            self.next_id = id.checked_add(1).unwrap_or(NonZeroU16::MIN);
            if !self.sockets.contains_key(&id.get()) {
                return Ok(id);
            }
        }

        Err(Error::IdsExhausted)
    }

    /// Sends `request` to `target` without waiting for the response.
    ///
    /// If sending fails, the error is returned right away and the request's failure callbacks are
    /// not invoked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] or [`Error::WriteFailed`] if the request could not be delivered,
    /// and [`Error::IdsExhausted`] if 65535 requests are already in flight.
    pub fn send_async_request(&mut self, target: &Target, request: Request) -> Result<u16, Error> {
        let id = self.allocate_id()?;
        let mut socket = Socket::new(id, target.clone());
        socket.send_request(request)?;

        let mut resources = BTreeMap::new();
        socket.collect_resource(&mut resources);
        for (key, fd) in resources {
            self.poll
                .registry()
                .register(&mut SourceFd(&fd), Token(key as usize), Interest::READABLE)
                .map_err(Error::Poll)?;
        }

        self.sockets.insert(id.get(), socket);
        Ok(id.get())
    }

    /// Sends `request` to `target` and waits for its response.
    ///
    /// This is [`Client::send_async_request`] followed by [`Client::wait_for_response`].
    pub fn send_request(&mut self, target: &Target, request: Request) -> Result<Response, Error> {
        let id = self.send_async_request(target, request)?;
        self.wait_for_response(id, None)
    }

    // Removes the socket from the registry and stops watching it
    fn take_socket(&mut self, id: u16) -> Result<Socket, Error> {
        let socket = self.sockets.remove(&id).ok_or(Error::UnknownRequest(id))?;

        let mut resources = BTreeMap::new();
        socket.collect_resource(&mut resources);
        for (id, fd) in resources {
            if let Err(err) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
                log::warn!(request_id = id, error:err = err; "Failed to stop polling a socket");
            }
        }

        Ok(socket)
    }

    /// Waits for the response to request `id` and hands it over without invoking any callback.
    ///
    /// `timeout` defaults to what is left of the request's read/write timeout. Either way, the
    /// request is no longer tracked afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRequest`] if no request with this id is in flight, or the error
    /// that made the request fail.
    pub fn read_response(&mut self, id: u16, timeout: Option<Duration>) -> Result<Response, Error> {
        let socket = self.take_socket(id)?;
        let timeout = timeout.unwrap_or_else(|| socket.remaining());
        socket.retire(timeout)
    }

    /// Like [`Client::read_response`], but also invokes the request's response or failure
    /// callbacks.
    pub fn wait_for_response(
        &mut self,
        id: u16,
        timeout: Option<Duration>,
    ) -> Result<Response, Error> {
        let socket = self.take_socket(id)?;
        let timeout = timeout.unwrap_or_else(|| socket.remaining());
        socket.finish(timeout)
    }

    /// Collects every response that is ready, waiting at most `timeout` for one to be.
    ///
    /// Sockets that turned readable are read without blocking. A response that has only partly
    /// arrived stays in flight. Requests whose read/write timeout ran out are collected too, as
    /// failures. Each collected
    /// request gets its callbacks invoked. Successful responses are also returned, keyed by request
    /// id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Poll`] if the OS readiness facility fails. Failures of individual
    /// requests only go to their failure callbacks.
    pub fn handle_ready_responses(
        &mut self,
        timeout: Duration,
    ) -> Result<BTreeMap<u16, Response>, Error> {
        let mut responses = BTreeMap::new();

        let Some(earliest_deadline) = self.sockets.values().map(Socket::remaining).min() else {
            return Ok(responses);
        };

        match self.poll.poll(&mut self.events, Some(timeout.min(earliest_deadline))) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(Error::Poll(err)),
        }

        let mut ready: BTreeSet<u16> = self
            .events
            .iter()
            .map(|event| event.token().0 as u16)
            .collect();

        let expired = self
            .sockets
            .iter()
            .filter(|(_, socket)| socket.remaining().is_zero())
            .map(|(id, _)| *id);
        ready.extend(expired);

        for id in ready {
            let Some(socket) = self.sockets.get_mut(&id) else {
                continue;
            };

            // Only what has already arrived is read, so a slow application holds up nobody else
            let failure = match socket.advance() {
                Ok(false) => continue,
                Ok(true) => None,
                Err(err) => Some(err),
            };

            let Ok(mut socket) = self.take_socket(id) else {
                continue;
            };

            match failure {
                None => match socket.finish(Duration::ZERO) {
                    Ok(response) => {
                        responses.insert(id, response);
                    }
                    Err(err) => {
                        log::debug!(request_id = id, error:err = err; "FastCGI request failed");
                    }
                },
                Some(err) => {
                    log::debug!(request_id = id, error:err = err; "FastCGI request failed");
                    socket.notify_failure_callbacks(&err);
                }
            }
        }

        Ok(responses)
    }

    /// Collects the responses of all requests in flight, blocking until every one has completed
    /// or failed.
    pub fn wait_for_responses(&mut self) -> Result<BTreeMap<u16, Response>, Error> {
        let mut responses = BTreeMap::new();

        while let Some(latest_deadline) = self.sockets.values().map(Socket::remaining).max() {
            responses.append(&mut self.handle_ready_responses(latest_deadline)?);
        }

        Ok(responses)
    }

    /// Whether any request is still waiting to be collected
    pub fn has_unhandled_responses(&self) -> bool {
        !self.sockets.is_empty()
    }

    /// The ids of all requests still waiting to be collected, in ascending order
    pub fn unhandled_request_ids(&self) -> Vec<u16> {
        self.sockets.keys().copied().collect()
    }
}
