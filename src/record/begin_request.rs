use super::role::Role;
#[cfg(test)]
use crate::error::Error;

const MASK_FCGI_KEEP_CONN: u8 = 0x01;

/// The body of a `FCGI_BEGIN_REQUEST` record
///
/// The first record a client sends for every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BeginRequest {
    role: Role,
    flags: u8,
}

impl BeginRequest {
    pub fn new(role: Role, keep_alive: bool) -> Self {
        let flags = if keep_alive { MASK_FCGI_KEEP_CONN } else { 0 };
        Self { role, flags }
    }

    pub fn to_record_bytes(&self) -> [u8; 8] {
        let [role_1, role_0] = self.role.to_record_bytes();
        [role_1, role_0, self.flags, 0, 0, 0, 0, 0]
    }
}

// The application side of the protocol, for the test application
#[cfg(test)]
impl BeginRequest {
    pub fn from_record_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let [role_1, role_0, flags, ..]: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::Decoding("malformed BeginRequest body".into()))?;

        let role = Role::from_record_bytes([role_1, role_0])?;

        Ok(BeginRequest { role, flags })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether the application should leave the connection open after responding
    pub fn keep_alive(&self) -> bool {
        self.flags & MASK_FCGI_KEEP_CONN == MASK_FCGI_KEEP_CONN
    }
}
