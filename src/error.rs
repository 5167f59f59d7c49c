use std::io;

/// Everything that can go wrong while talking to a FastCGI application
///
/// Problems reported by the application itself through the `FCGI_END_REQUEST` protocol status
/// (overloaded, unknown role, ...) are not errors. They are available on the
/// [`Response`](crate::Response).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to connect to FastCGI application at '{target}'")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Timed out waiting for the FastCGI application")]
    Timedout,

    #[error("Failed to write request to the FastCGI application")]
    WriteFailed(#[source] io::Error),

    #[error("Failed to read response from the FastCGI application")]
    ReadFailed(#[source] io::Error),

    #[error("Unable to encode FastCGI record: {0}")]
    Encoding(String),

    #[error("Could not encode data to JSON")]
    Json(#[source] serde_json::Error),

    #[error("Received malformed FastCGI data: {0}")]
    Decoding(String),

    #[error("No request with id '{0}' is in flight")]
    UnknownRequest(u16),

    #[error("Socket '{id}' cannot {operation} while {state}")]
    InvalidState {
        id: u16,
        operation: &'static str,
        state: &'static str,
    },

    #[error("All FastCGI request ids are in use")]
    IdsExhausted,

    #[error("Polling sockets for readiness failed")]
    Poll(#[source] io::Error),
}
