use crate::error::Error;
use serde::Serialize;

/// The body of a request, along with its media type
///
/// The body is sent to the application as `FCGI_STDIN` and the media type as the `CONTENT_TYPE`
/// parameter. Neither is inspected.
pub trait RequestContent {
    fn content_type(&self) -> &str;
    fn content(&self) -> Vec<u8>;
}

/// A body of arbitrary bytes with an explicit content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContent {
    content_type: String,
    content: Vec<u8>,
}

impl RawContent {
    pub fn new(content_type: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            content: content.into(),
        }
    }
}

impl RequestContent for RawContent {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn content(&self) -> Vec<u8> {
        self.content.clone()
    }
}

/// An `application/x-www-form-urlencoded` body
///
/// ```
/// use relic::{RequestContent, UrlEncodedFormData};
///
/// let form = UrlEncodedFormData::default()
///     .add("name", "Ada Lovelace")
///     .add("lang", "en");
///
/// assert_eq!(form.content(), b"name=Ada+Lovelace&lang=en");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlEncodedFormData {
    fields: Vec<(String, String)>,
}

impl UrlEncodedFormData {
    pub fn add(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }
}

impl<K, V> FromIterator<(K, V)> for UrlEncodedFormData
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        iter.into_iter()
            .fold(Self::default(), |form, (k, v)| form.add(k, v))
    }
}

impl RequestContent for UrlEncodedFormData {
    fn content_type(&self) -> &str {
        "application/x-www-form-urlencoded"
    }

    fn content(&self) -> Vec<u8> {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.fields.iter())
            .finish()
            .into_bytes()
    }
}

/// An `application/json` body
///
/// ```
/// use relic::{JsonData, RequestContent};
/// use std::collections::BTreeMap;
///
/// let json = JsonData::new(BTreeMap::from([("value", 1)]))?;
/// assert_eq!(json.content(), br#"{"value":1}"#);
/// # Ok::<(), relic::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonData {
    content: Vec<u8>,
}

impl JsonData {
    /// Serializes `data` right away.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `data` has no JSON representation, e.g. a map with non-string
    /// keys.
    pub fn new(data: impl Serialize) -> Result<Self, Error> {
        let content = serde_json::to_vec(&data).map_err(Error::Json)?;
        Ok(Self { content })
    }
}

impl RequestContent for JsonData {
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn content(&self) -> Vec<u8> {
        self.content.clone()
    }
}
