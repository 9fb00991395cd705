//! Upload validation: everything checked before a job is created.

use geofuse_core::ServerSettings;
use geofuse_estimators::ImageRef;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum IngressError {
    #[error("No image provided")]
    MissingImage,

    #[error("File format not supported. Allowed formats: {0}")]
    UnsupportedFormat(String),

    #[error("File too large. Maximum size: {0} bytes")]
    TooLarge(usize),

    #[error("Invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Both latitude and longitude are required for a GPS fix")]
    IncompleteFix,

    #[error("Malformed upload: {0}")]
    Malformed(String),
}

/// Raw multipart fields as received.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub filename: Option<String>,
    pub image: Option<Vec<u8>>,
    pub context: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
}

/// An upload that passed validation.
#[derive(Debug)]
pub struct ValidUpload {
    pub image: ImageRef,
    pub context: Option<String>,
    /// Coordinates read from the image's GPS tags upstream.
    pub gps_fix: Option<(f64, f64)>,
}

impl UploadForm {
    pub fn validate(self, settings: &ServerSettings) -> Result<ValidUpload, IngressError> {
        let bytes = self.image.ok_or(IngressError::MissingImage)?;

        let ext = self
            .filename
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_uppercase())
            .unwrap_or_default();
        if !settings.allowed_formats.iter().any(|f| f.eq_ignore_ascii_case(&ext)) {
            return Err(IngressError::UnsupportedFormat(settings.allowed_formats.join(", ")));
        }

        if bytes.is_empty() {
            return Err(IngressError::MissingImage);
        }
        if bytes.len() > settings.max_image_bytes {
            return Err(IngressError::TooLarge(settings.max_image_bytes));
        }

        let gps_fix = match (non_blank(self.latitude), non_blank(self.longitude)) {
            (Some(lat), Some(lon)) => {
                let lat = parse_coordinate("latitude", &lat, 90.0)?;
                let lon = parse_coordinate("longitude", &lon, 180.0)?;
                Some((lat, lon))
            }
            (None, None) => None,
            _ => return Err(IngressError::IncompleteFix),
        };

        Ok(ValidUpload {
            image: ImageRef::new(bytes, self.filename),
            context: non_blank(self.context),
            gps_fix,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_coordinate(field: &'static str, raw: &str, limit: f64) -> Result<f64, IngressError> {
    let invalid = || IngressError::InvalidField {
        field,
        value: raw.to_string(),
    };
    let value: f64 = raw.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() || value.abs() > limit {
        return Err(invalid());
    }
    Ok(value)
}
