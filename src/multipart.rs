//! Translation of typed requests into multipart payloads.
//!
//! A [`MultipartForm`] is an ordered, cloneable description of the fields a
//! request sends. The client turns it into a fresh `reqwest` form for every
//! attempt, because `reqwest::multipart::Form` is consumed when sent.

use crate::request::{InputImage, Selector};
use crate::{Error, Result};

/// Field carrying the comma-joined selector codes.
pub const SERVICE_FIELD: &str = "service";
/// Field carrying image bytes; repeated once per image.
pub const IMAGE_FIELD: &str = "image";
/// Field carrying the location hint.
pub const LOCATION_FIELD: &str = "location";
/// Field carrying the region of interest.
pub const ROI_FIELD: &str = "roi";
/// Field carrying the maximum number of reads.
pub const MAXREADS_FIELD: &str = "maxreads";

/// A typed request that can be sent to a recognition service.
pub trait RecognitionRequest {
    /// The raw routing segment (`region` or document type), before normalization.
    fn subpath(&self) -> Option<&str>;

    /// Validates the request and assembles its multipart fields.
    fn to_form(&self) -> Result<MultipartForm>;
}

/// The value of one multipart field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// A plain text part.
    Text(String),
    /// A binary file part.
    File {
        bytes: Vec<u8>,
        filename: String,
        content_type: String,
    },
}

impl FieldValue {
    /// Returns the text of a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::File { .. } => None,
        }
    }
}

/// A named multipart field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub value: FieldValue,
}

/// An ordered set of multipart fields.
///
/// ```
/// use carmen_cloud::{InputImage, MultipartForm, RecognitionRequest, Selector, VehicleRequest};
///
/// let request = VehicleRequest::new()
///     .services([Selector::Anpr, Selector::Mmr])
///     .image(InputImage::new(vec![0xFF, 0xD8, 0xFF], "plate.jpg", "jpeg"))
///     .region("eur");
///
/// let form = request.to_form().unwrap();
/// assert_eq!(form.text("service"), Some("ANPR,MMR"));
/// assert_eq!(form.count("image"), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    fields: Vec<FormField>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a text field.
    pub fn push_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(FormField {
            name: name.into(),
            value: FieldValue::Text(value.into()),
        });
    }

    /// Appends a text field if `value` is present.
    pub fn push_optional_text(&mut self, name: &str, value: Option<impl ToString>) {
        if let Some(value) = value {
            self.push_text(name, value.to_string());
        }
    }

    /// Appends the `service` field if any selectors were requested.
    pub fn push_selectors(&mut self, selectors: &[Selector]) {
        if selectors.is_empty() {
            return;
        }

        let joined = selectors
            .iter()
            .map(|s| s.code())
            .collect::<Vec<_>>()
            .join(",");
        self.push_text(SERVICE_FIELD, joined);
    }

    /// Appends an `image` field after validating it.
    pub fn push_image(&mut self, image: &InputImage) -> Result<()> {
        image.validate()?;
        self.fields.push(FormField {
            name: IMAGE_FIELD.to_string(),
            value: FieldValue::File {
                bytes: image.bytes.clone(),
                filename: image.filename.clone(),
                content_type: image.content_type(),
            },
        });
        Ok(())
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the first field with the given name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| &field.value)
    }

    /// Returns the text of the first field with the given name.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_text()
    }

    /// Counts the fields with the given name.
    pub fn count(&self, name: &str) -> usize {
        self.fields.iter().filter(|field| field.name == name).count()
    }

    /// Builds the `reqwest` form that goes on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if a file part has an unparseable
    /// content type.
    pub fn to_reqwest(&self) -> Result<reqwest::multipart::Form> {
        let mut form = reqwest::multipart::Form::new();
        for field in &self.fields {
            form = match &field.value {
                FieldValue::Text(text) => form.text(field.name.clone(), text.clone()),
                FieldValue::File {
                    bytes,
                    filename,
                    content_type,
                } => {
                    let part = reqwest::multipart::Part::bytes(bytes.clone())
                        .file_name(filename.clone())
                        .mime_str(content_type)
                        .map_err(|e| {
                            Error::InvalidRequest(format!(
                                "Invalid content type {:?}: {}",
                                content_type, e
                            ))
                        })?;
                    form.part(field.name.clone(), part)
                }
            };
        }
        Ok(form)
    }
}

/// Normalizes a routing segment into a path suffix for the endpoint.
///
/// An absent or empty segment maps to no suffix, a segment starting with `/`
/// is kept as is, and anything else gets a leading `/`.
///
/// ```
/// use carmen_cloud::normalize_subpath;
///
/// assert_eq!(normalize_subpath(None), "");
/// assert_eq!(normalize_subpath(Some("")), "");
/// assert_eq!(normalize_subpath(Some("/us")), "/us");
/// assert_eq!(normalize_subpath(Some("us")), "/us");
/// ```
pub fn normalize_subpath(segment: Option<&str>) -> String {
    match segment {
        None | Some("") => String::new(),
        Some(segment) if segment.starts_with('/') => segment.to_string(),
        Some(segment) => format!("/{}", segment),
    }
}
