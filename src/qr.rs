use std::io::Cursor;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use serde::Serialize;

pub const QR_PAYLOAD_VERSION: &str = "2.0";

/// What the check-in scanner reads off the code.
#[derive(Debug, Clone, Serialize)]
pub struct QrPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub version: &'static str,
    pub appointment_id: i64,
    pub appointment_num: Option<String>,
    pub patient_id: i64,
    pub referral_id: Option<i64>,
    pub facility_id: i64,
    pub facility_type: String,
    pub scheduled_date: NaiveDate,
    #[serde(serialize_with = "serialize_hhmm")]
    pub scheduled_time: NaiveTime,
    /// Booking time; keeps the rendered bytes stable across re-renders.
    pub issued_at: DateTime<Utc>,
}

fn serialize_hhmm<S: serde::Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.format("%H:%M").to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum QrError {
    #[error("qr payload encode failed: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("qr symbol build failed: {0}")]
    Symbol(#[from] qrcode::types::QrError),
    #[error("qr png encode failed: {0}")]
    Png(#[from] image::ImageError),
}

/// Renders the payload as a PNG QR code with error-correction level M.
pub fn render_png(payload: &QrPayload) -> Result<Vec<u8>, QrError> {
    let json = serde_json::to_vec(payload)?;
    let code = QrCode::with_error_correction_level(&json, EcLevel::M)?;

    let img = code
        .render::<Luma<u8>>()
        .min_dimensions(300, 300)
        .quiet_zone(true)
        .build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(img).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}
