#[cfg(test)]
use crate::error::Error;

/// The role a FastCGI application is asked to play. Only responders are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Responder,
}

impl Role {
    pub fn id(&self) -> u16 {
        match self {
            Self::Responder => 1,
        }
    }

    pub fn to_record_bytes(&self) -> [u8; 2] {
        self.id().to_be_bytes()
    }
}

// The application side of the protocol, for the test application
#[cfg(test)]
impl Role {
    pub fn from_record_bytes(bytes: [u8; 2]) -> Result<Self, Error> {
        match u16::from_be_bytes(bytes) {
            1 => Ok(Self::Responder),
            id => Err(Error::Decoding(format!("unsupported FastCGI role '{id}'"))),
        }
    }
}
