use crate::record::{EndRequest, ProtocolStatus};
use std::collections::BTreeMap;
use std::time::Duration;

/// The response of a FastCGI application
///
/// The application's `FCGI_STDOUT` stream starts with a block of CGI headers, separated from the
/// body by the first empty line (`\r\n\r\n` or `\n\n`). Output without such a block is treated as
/// all body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    request_id: u16,
    headers: BTreeMap<String, Vec<String>>,
    output: Vec<u8>,
    body_start: usize,
    error: Vec<u8>,
    app_status: i32,
    protocol_status: ProtocolStatus,
    duration: Duration,
}

impl Response {
    pub(crate) fn new(
        request_id: u16,
        output: Vec<u8>,
        error: Vec<u8>,
        end: EndRequest,
        duration: Duration,
    ) -> Self {
        let (headers, body_start) = parse_headers(&output);
        Self {
            request_id,
            headers,
            output,
            body_start,
            error,
            app_status: end.app_status(),
            protocol_status: end.protocol_status(),
            duration,
        }
    }

    /// The id of the request this response belongs to
    pub fn request_id(&self) -> u16 {
        self.request_id
    }

    /// Everything the application wrote to `FCGI_STDOUT`, headers included
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// The response body, without the header block
    pub fn body(&self) -> &[u8] {
        &self.output[self.body_start..]
    }

    /// Everything the application wrote to `FCGI_STDERR`
    pub fn error(&self) -> &[u8] {
        &self.error
    }

    /// All response headers. A header sent several times has several values.
    pub fn headers(&self) -> &BTreeMap<String, Vec<String>> {
        &self.headers
    }

    /// Returns the first value of header `name`, which is matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    /// The status code from the CGI `Status` header, if the application sent one
    pub fn status(&self) -> Option<u16> {
        self.header("Status")?
            .split_whitespace()
            .next()?
            .parse()
            .ok()
    }

    /// The application-level exit status from `FCGI_END_REQUEST`
    pub fn app_status(&self) -> i32 {
        self.app_status
    }

    /// The protocol-level status from `FCGI_END_REQUEST`
    pub fn protocol_status(&self) -> ProtocolStatus {
        self.protocol_status
    }

    /// Time between the start of the request and the arrival of `FCGI_END_REQUEST`
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

fn find_header_boundary(data: &[u8]) -> Option<(usize, usize)> {
    (0..data.len()).find_map(|i| {
        if data[i..].starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if data[i..].starts_with(b"\n\n") {
            Some((i, 2))
        } else {
            None
        }
    })
}

// Returns the headers and the offset at which the body starts
fn parse_headers(output: &[u8]) -> (BTreeMap<String, Vec<String>>, usize) {
    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();

    let Some((end, separator_len)) = find_header_boundary(output) else {
        return (headers, 0);
    };

    let block = String::from_utf8_lossy(&output[..end]);

    for line in block.lines() {
        // Not a header block after all
        let Some((name, value)) = line.split_once(':') else {
            return (BTreeMap::new(), 0);
        };
        headers
            .entry(name.trim().to_string())
            .or_default()
            .push(value.trim().to_string());
    }

    (headers, end + separator_len)
}
