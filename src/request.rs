use crate::content::RequestContent;
use crate::error::Error;
use crate::response::Response;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

type ResponseCallback = Box<dyn FnMut(&Response)>;
type FailureCallback = Box<dyn FnMut(&Error)>;

/// Callbacks registered on a request, invoked in registration order
#[derive(Default)]
pub(crate) struct Callbacks {
    on_response: Vec<ResponseCallback>,
    on_failure: Vec<FailureCallback>,
}

impl Callbacks {
    // A panicking callback is not caught; it unwinds into whoever drives the request.
    pub(crate) fn notify_response(&mut self, response: &Response) {
        for callback in self.on_response.iter_mut() {
            callback(response);
        }
    }

    pub(crate) fn notify_failure(&mut self, error: &Error) {
        for callback in self.on_failure.iter_mut() {
            callback(error);
        }
    }
}

/// A request for a FastCGI application in the responder role
///
/// The standard CGI variables get sensible defaults. Any of them can be overridden with
/// [`Request::with_var`].
///
/// ```
/// use relic::{Request, UrlEncodedFormData};
///
/// let form = UrlEncodedFormData::default().add("test-key", "unit");
///
/// let request = Request::post("/var/www/worker.php", form)
///     .with_var("HTTP_X_REQUEST_ID", "8a2c")
///     .on_response(|response| println!("{}", String::from_utf8_lossy(response.body())))
///     .on_failure(|error| eprintln!("{error}"));
/// ```
pub struct Request {
    method: String,
    script_filename: String,
    request_uri: String,
    content_type: String,
    content: Vec<u8>,
    vars: BTreeMap<String, String>,
    keep_alive: bool,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) read_write_timeout: Option<Duration>,
    pub(crate) callbacks: Callbacks,
}

impl Request {
    /// Creates a request without a body
    pub fn new(method: impl Into<String>, script_filename: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            script_filename: script_filename.into(),
            request_uri: String::new(),
            content_type: String::from("application/x-www-form-urlencoded"),
            content: Vec::new(),
            vars: BTreeMap::new(),
            keep_alive: false,
            connect_timeout: None,
            read_write_timeout: None,
            callbacks: Callbacks::default(),
        }
    }

    pub fn get(script_filename: impl Into<String>) -> Self {
        Self::new("GET", script_filename)
    }

    pub fn post(script_filename: impl Into<String>, content: impl RequestContent) -> Self {
        Self::new("POST", script_filename).with_content(content)
    }

    pub fn put(script_filename: impl Into<String>, content: impl RequestContent) -> Self {
        Self::new("PUT", script_filename).with_content(content)
    }

    pub fn patch(script_filename: impl Into<String>, content: impl RequestContent) -> Self {
        Self::new("PATCH", script_filename).with_content(content)
    }

    pub fn delete(script_filename: impl Into<String>) -> Self {
        Self::new("DELETE", script_filename)
    }

    /// Sets the body and its content type
    pub fn with_content(mut self, content: impl RequestContent) -> Self {
        self.content_type = content.content_type().to_string();
        self.content = content.content();
        self
    }

    /// Sets the `REQUEST_URI` parameter
    pub fn with_request_uri(mut self, uri: impl Into<String>) -> Self {
        self.request_uri = uri.into();
        self
    }

    /// Sets a custom parameter, overriding any default of the same name
    pub fn with_var(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.vars.insert(name.into(), value.to_string());
        self
    }

    /// Asks the application to keep the connection open after responding
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Overrides the connect timeout of the [`Target`](crate::Target) for this request
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Overrides the read/write timeout of the [`Target`](crate::Target) for this request
    pub fn with_read_write_timeout(mut self, timeout: Duration) -> Self {
        self.read_write_timeout = Some(timeout);
        self
    }

    /// Registers a callback invoked with the response once the request completes
    pub fn on_response<C>(mut self, callback: C) -> Self
    where
        C: FnMut(&Response) + 'static,
    {
        self.callbacks.on_response.push(Box::new(callback));
        self
    }

    /// Registers a callback invoked with the error if the request fails
    pub fn on_failure<C>(mut self, callback: C) -> Self
    where
        C: FnMut(&Error) + 'static,
    {
        self.callbacks.on_failure.push(Box::new(callback));
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn script_filename(&self) -> &str {
        &self.script_filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The complete set of parameters sent in the `FCGI_PARAMS` stream
    pub fn params(&self) -> BTreeMap<String, String> {
        let defaults = [
            ("GATEWAY_INTERFACE", "FastCGI/1.0".to_string()),
            ("REQUEST_METHOD", self.method.clone()),
            ("REQUEST_URI", self.request_uri.clone()),
            ("SCRIPT_FILENAME", self.script_filename.clone()),
            ("SERVER_SOFTWARE", concat!("relic/", env!("CARGO_PKG_VERSION")).to_string()),
            ("REMOTE_ADDR", "127.0.0.1".to_string()),
            ("REMOTE_PORT", "9985".to_string()),
            ("SERVER_ADDR", "127.0.0.1".to_string()),
            ("SERVER_PORT", "80".to_string()),
            ("SERVER_NAME", "localhost".to_string()),
            ("SERVER_PROTOCOL", "HTTP/1.1".to_string()),
            ("CONTENT_TYPE", self.content_type.clone()),
            ("CONTENT_LENGTH", self.content.len().to_string()),
        ];

        let mut params: BTreeMap<String, String> = defaults
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        params.extend(self.vars.clone());
        params
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("script_filename", &self.script_filename)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content.len())
            .field("vars", &self.vars)
            .field("keep_alive", &self.keep_alive)
            .field("response_callbacks", &self.callbacks.on_response.len())
            .field("failure_callbacks", &self.callbacks.on_failure.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{RawContent, UrlEncodedFormData};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn default_params() {
        let form = UrlEncodedFormData::default().add("test-key", "unit");
        let params = Request::post("/srv/worker.php", form)
            .with_request_uri("/worker")
            .params();

        assert_eq!(params["REQUEST_METHOD"], "POST");
        assert_eq!(params["SCRIPT_FILENAME"], "/srv/worker.php");
        assert_eq!(params["REQUEST_URI"], "/worker");
        assert_eq!(params["CONTENT_TYPE"], "application/x-www-form-urlencoded");
        assert_eq!(params["CONTENT_LENGTH"], "13");
        assert_eq!(params["GATEWAY_INTERFACE"], "FastCGI/1.0");
    }

    #[test]
    fn custom_vars_override_defaults() {
        let params = Request::get("/srv/index.php")
            .with_var("SERVER_NAME", "example.org")
            .with_var("HTTP_ACCEPT", "text/html")
            .with_var("SERVER_PORT", 8080)
            .params();

        assert_eq!(params["SERVER_NAME"], "example.org");
        assert_eq!(params["HTTP_ACCEPT"], "text/html");
        assert_eq!(params["SERVER_PORT"], "8080");
        assert_eq!(params["CONTENT_LENGTH"], "0");
    }

    #[test]
    fn content_replaces_type_and_body() {
        let request = Request::put("/srv/api.php", RawContent::new("application/json", "[]"));
        assert_eq!(request.method(), "PUT");
        assert_eq!(request.content_type(), "application/json");
        assert_eq!(request.content(), b"[]");
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let calls = Rc::new(RefCell::new(vec![]));

        let mut request = Request::get("/srv/index.php");
        for i in 0..3 {
            let calls = calls.clone();
            request = request.on_failure(move |_| calls.borrow_mut().push(i));
        }

        request.callbacks.notify_failure(&Error::Timedout);
        assert_eq!(*calls.borrow(), [0, 1, 2]);

        // Response callbacks were never registered, and nothing is invoked for them
        request.callbacks.notify_response(&Response::default());
        assert_eq!(calls.borrow().len(), 3);
    }
}
