use crate::error::Error;

/// How the FastCGI application says it handled a request
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ProtocolStatus {
    /// Normal end of request.
    #[default]
    RequestComplete,
    /// The application processes one request at a time per connection and the client tried to
    /// send concurrent requests over one connection.
    MultiplexingUnsupported,
    /// The application ran out of some resource, e.g. database connections.
    Overloaded,
    /// The application does not support the role the client asked for.
    UnknownRole,
}

impl ProtocolStatus {
    pub fn id(&self) -> u8 {
        match self {
            Self::RequestComplete => 0,
            Self::MultiplexingUnsupported => 1,
            Self::Overloaded => 2,
            Self::UnknownRole => 3,
        }
    }

    pub(super) fn from_record_byte(byte: u8) -> Result<Self, Error> {
        let status = match byte {
            0 => Self::RequestComplete,
            1 => Self::MultiplexingUnsupported,
            2 => Self::Overloaded,
            3 => Self::UnknownRole,
            _ => {
                return Err(Error::Decoding(format!(
                    "unsupported FastCGI protocol status '{byte}'"
                )))
            }
        };

        Ok(status)
    }
}
