use super::protocol_status::ProtocolStatus;
use crate::error::Error;

/// The body of a `FCGI_END_REQUEST` record
///
/// The last record an application sends for a request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EndRequest {
    app_status: i32,
    protocol_status: ProtocolStatus,
}

impl EndRequest {
    pub fn new(app_status: i32, protocol_status: ProtocolStatus) -> Self {
        Self {
            app_status,
            protocol_status,
        }
    }

    pub fn from_record_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let [s3, s2, s1, s0, status, ..]: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::Decoding("malformed EndRequest body".into()))?;

        Ok(Self {
            app_status: i32::from_be_bytes([s3, s2, s1, s0]),
            protocol_status: ProtocolStatus::from_record_byte(status)?,
        })
    }

    pub fn to_record_bytes(&self) -> [u8; 8] {
        let [s3, s2, s1, s0] = self.app_status.to_be_bytes();
        [s3, s2, s1, s0, self.protocol_status.id(), 0, 0, 0]
    }

    pub fn app_status(&self) -> i32 {
        self.app_status
    }

    pub fn protocol_status(&self) -> ProtocolStatus {
        self.protocol_status
    }
}
