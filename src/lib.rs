//! A FastCGI client that keeps any number of requests in flight at once.
//!
//! [FastCGI](https://www.mit.edu/~yandros/doc/specs/fcgi-spec.html) is the binary protocol web
//! servers use to talk to long-running application servers such as PHP-FPM. This crate plays the
//! web server's part: it frames requests as FastCGI records, sends them to an application, and
//! reassembles the application's output into a [`Response`].
//!
//! ```no_run
//! use relic::{Client, Request, Target, UrlEncodedFormData};
//!
//! let php_fpm = Target::tcp("127.0.0.1", 9000);
//! let mut client = Client::new()?;
//!
//! // One request, waiting for the response
//! let response = client.send_request(&php_fpm, Request::get("/var/www/status.php"))?;
//! println!("{}", String::from_utf8_lossy(response.body()));
//!
//! // Several requests, handled in whatever order they complete
//! for user in ["ada", "grace", "edsger"] {
//!     let form = UrlEncodedFormData::default().add("user", user);
//!     let request = Request::post("/var/www/worker.php", form)
//!         .on_response(move |r| println!("{user}: {:?}", r.status()))
//!         .on_failure(move |e| eprintln!("{user}: {e}"));
//!     client.send_async_request(&php_fpm, request)?;
//! }
//! client.wait_for_responses()?;
//! # Ok::<(), relic::Error>(())
//! ```
//!
//! # Terminology
//!
//! - FastCGI application: a program listening on a socket and answering FastCGI requests.
//! - Record: the unit of the FastCGI wire format. An 8-byte header followed by up to 65535 bytes
//!   of content and some padding.
//! - Stream: a payload (`FCGI_PARAMS`, `FCGI_STDIN`, `FCGI_STDOUT`, `FCGI_STDERR`) carried by a
//!   series of records of the same type, ended by an empty one.
//! - Request id: the number tying records to a request. Here every request gets its own
//!   connection, and the id is unique among the requests a [`Client`] has in flight.
//!
//! # Limitations
//!
//! - Only the responder role is supported.
//! - A connection carries one request at a time. Concurrency comes from opening several
//!   connections, not from multiplexing requests over one.
//! - Requests cannot be aborted once sent. A request that outlives its timeout is dropped along
//!   with its connection.

mod client;
mod connection;
mod content;
mod error;
pub mod record;
mod request;
mod response;
mod socket;
mod target;

#[cfg(test)]
mod test_util;

pub use client::Client;
pub use connection::Connection;
pub use content::{JsonData, RawContent, RequestContent, UrlEncodedFormData};
pub use error::Error;
pub use record::ProtocolStatus;
pub use request::Request;
pub use response::Response;
pub use socket::{Socket, SocketState};
pub use target::{Address, Target};
