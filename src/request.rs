//! Typed requests for the recognition services.

use crate::multipart::{
    MultipartForm, RecognitionRequest, LOCATION_FIELD, MAXREADS_FIELD, ROI_FIELD,
};
use crate::{Error, Result};
use std::fmt;

/// Selects a sub-analysis the service should run on the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Automatic number plate recognition.
    Anpr,
    /// Make and model recognition.
    Mmr,
    /// Dangerous goods (ADR) plate recognition.
    Adr,
}

impl Selector {
    /// The code sent in the `service` field.
    pub const fn code(self) -> &'static str {
        match self {
            Selector::Anpr => "ANPR",
            Selector::Mmr => "MMR",
            Selector::Adr => "ADR",
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An image to upload.
///
/// `mime_type` is the subtype only (`"jpeg"`, `"png"`); it is sent as
/// `image/<mime_type>`.
#[derive(Clone, PartialEq, Eq)]
pub struct InputImage {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

impl InputImage {
    pub fn new(
        bytes: impl Into<Vec<u8>>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Shorthand for a JPEG image.
    pub fn jpeg(bytes: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        Self::new(bytes, filename, "jpeg")
    }

    /// The content type of the uploaded part.
    pub fn content_type(&self) -> String {
        format!("image/{}", self.mime_type)
    }

    /// Checks that the image has bytes and a mime type.
    pub fn validate(&self) -> Result<()> {
        if self.bytes.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "Image {:?} has no bytes",
                self.filename
            )));
        }
        if self.mime_type.trim().is_empty() {
            return Err(Error::InvalidRequest(format!(
                "Image {:?} has no mime type",
                self.filename
            )));
        }
        Ok(())
    }
}

// Image bytes are left out so logs stay readable.
impl fmt::Debug for InputImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputImage")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A request to the vehicle recognition API.
///
/// ```
/// use carmen_cloud::{InputImage, Selector, VehicleRequest};
///
/// let request = VehicleRequest::new()
///     .services([Selector::Anpr, Selector::Mmr])
///     .region("eur")
///     .location("HUN")
///     .image(InputImage::jpeg(vec![0xFF, 0xD8, 0xFF], "car.jpg"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleRequest {
    pub services: Vec<Selector>,
    pub image: Option<InputImage>,
    pub region: Option<String>,
    pub location: Option<String>,
    pub roi: Option<String>,
    pub maxreads: Option<u32>,
}

impl VehicleRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the selector list.
    pub fn services(mut self, services: impl IntoIterator<Item = Selector>) -> Self {
        self.services = services.into_iter().collect();
        self
    }

    pub fn image(mut self, image: InputImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Region of interest, in the service's textual polygon format.
    pub fn roi(mut self, roi: impl Into<String>) -> Self {
        self.roi = Some(roi.into());
        self
    }

    pub fn maxreads(mut self, maxreads: u32) -> Self {
        self.maxreads = Some(maxreads);
        self
    }
}

impl RecognitionRequest for VehicleRequest {
    fn subpath(&self) -> Option<&str> {
        self.region.as_deref()
    }

    fn to_form(&self) -> Result<MultipartForm> {
        let mut form = MultipartForm::new();
        form.push_selectors(&self.services);
        if let Some(image) = &self.image {
            form.push_image(image)?;
        }
        form.push_optional_text(LOCATION_FIELD, self.location.as_deref());
        form.push_optional_text(ROI_FIELD, self.roi.as_deref());
        form.push_optional_text(MAXREADS_FIELD, self.maxreads);
        Ok(form)
    }
}

/// A request to the plate-only ANPR API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnprRequest {
    pub services: Vec<Selector>,
    pub image: Option<InputImage>,
    pub region: Option<String>,
    pub location: Option<String>,
    pub maxreads: Option<u32>,
}

impl AnprRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services(mut self, services: impl IntoIterator<Item = Selector>) -> Self {
        self.services = services.into_iter().collect();
        self
    }

    pub fn image(mut self, image: InputImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn maxreads(mut self, maxreads: u32) -> Self {
        self.maxreads = Some(maxreads);
        self
    }
}

impl RecognitionRequest for AnprRequest {
    fn subpath(&self) -> Option<&str> {
        self.region.as_deref()
    }

    fn to_form(&self) -> Result<MultipartForm> {
        let mut form = MultipartForm::new();
        form.push_selectors(&self.services);
        if let Some(image) = &self.image {
            form.push_image(image)?;
        }
        form.push_optional_text(LOCATION_FIELD, self.location.as_deref());
        form.push_optional_text(MAXREADS_FIELD, self.maxreads);
        Ok(form)
    }
}

/// A request to the transport and cargo code recognition API.
///
/// Multi-sided documents are sent as several images, one `image` part each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportRequest {
    pub images: Vec<InputImage>,
    /// Code type routed to, e.g. `"container"`.
    pub code_type: Option<String>,
}

impl TransportRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an image.
    pub fn image(mut self, image: InputImage) -> Self {
        self.images.push(image);
        self
    }

    pub fn images(mut self, images: impl IntoIterator<Item = InputImage>) -> Self {
        self.images = images.into_iter().collect();
        self
    }

    pub fn code_type(mut self, code_type: impl Into<String>) -> Self {
        self.code_type = Some(code_type.into());
        self
    }
}

impl RecognitionRequest for TransportRequest {
    fn subpath(&self) -> Option<&str> {
        self.code_type.as_deref()
    }

    fn to_form(&self) -> Result<MultipartForm> {
        let mut form = MultipartForm::new();
        for image in &self.images {
            form.push_image(image)?;
        }
        Ok(form)
    }
}
