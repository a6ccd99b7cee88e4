use chrono::NaiveDateTime;
use exif::{Exif, In, Reader, Tag, Value};
use std::io::Cursor;

/// Camera metadata shown in image notes. Every field is optional; a missing
/// field renders as an empty substitution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMetadata {
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens: Option<String>,
    pub date_taken: Option<NaiveDateTime>,
    /// Seconds
    pub exposure_time: Option<f64>,
    pub f_number: Option<f64>,
    pub iso: Option<u32>,
    /// Millimetres
    pub focal_length: Option<f64>,
    pub focal_length_35mm: Option<u32>,
    /// Signed decimal degrees, south negative
    pub latitude: Option<f64>,
    /// Signed decimal degrees, west negative
    pub longitude: Option<f64>,
    /// Metres, below sea level negative
    pub altitude: Option<f64>,
}

/// Substitution keys filled from [`ImageMetadata`].
pub const FIELDS: [&str; 12] = [
    "camera_make",
    "camera_model",
    "lens",
    "date_taken",
    "exposure_time",
    "f_number",
    "iso",
    "focal_length",
    "focal_length_35mm",
    "latitude",
    "longitude",
    "altitude",
];

impl ImageMetadata {
    /// One `(key, value)` pair per entry of [`FIELDS`], empty when unknown.
    pub fn substitutions(&self) -> Vec<(&'static str, String)> {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        let num = |v: Option<f64>, places: usize| v.map(|v| trim_decimal(v, places)).unwrap_or_default();
        let int = |v: Option<u32>| v.map(|v| v.to_string()).unwrap_or_default();
        vec![
            ("camera_make", text(&self.camera_make)),
            ("camera_model", text(&self.camera_model)),
            ("lens", text(&self.lens)),
            (
                "date_taken",
                self.date_taken
                    .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default(),
            ),
            ("exposure_time", self.exposure_time.map(format_exposure).unwrap_or_default()),
            ("f_number", num(self.f_number, 1)),
            ("iso", int(self.iso)),
            ("focal_length", num(self.focal_length, 1)),
            ("focal_length_35mm", int(self.focal_length_35mm)),
            ("latitude", self.latitude.map(|v| format!("{:.6}", v)).unwrap_or_default()),
            ("longitude", self.longitude.map(|v| format!("{:.6}", v)).unwrap_or_default()),
            ("altitude", num(self.altitude, 1)),
        ]
    }
}

/// Source of image metadata.
pub trait ImageMetadataSource {
    fn extract(&self, bytes: &[u8]) -> anyhow::Result<ImageMetadata>;
}

/// Reads EXIF from JPEG, TIFF, HEIF, PNG and WebP containers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExifReader;

impl ImageMetadataSource for ExifReader {
    fn extract(&self, bytes: &[u8]) -> anyhow::Result<ImageMetadata> {
        let exif = Reader::new().read_from_container(&mut Cursor::new(bytes))?;
        Ok(ImageMetadata {
            camera_make: ascii(&exif, Tag::Make),
            camera_model: ascii(&exif, Tag::Model),
            lens: ascii(&exif, Tag::LensModel),
            date_taken: [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
                .into_iter()
                .find_map(|tag| ascii(&exif, tag).and_then(|s| parse_exif_datetime(&s))),
            exposure_time: rational(&exif, Tag::ExposureTime, 0),
            f_number: rational(&exif, Tag::FNumber, 0),
            iso: uint(&exif, Tag::PhotographicSensitivity),
            focal_length: rational(&exif, Tag::FocalLength, 0),
            focal_length_35mm: uint(&exif, Tag::FocalLengthIn35mmFilm).filter(|v| *v > 0),
            latitude: gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, 'S'),
            longitude: gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, 'W'),
            altitude: rational(&exif, Tag::GPSAltitude, 0).map(|alt| {
                match exif.get_field(Tag::GPSAltitudeRef, In::PRIMARY).and_then(|f| f.value.get_uint(0)) {
                    Some(1) => -alt,
                    _ => alt,
                }
            }),
        })
    }
}

/// Exposure in seconds as photographers write it: a decimal from one second
/// up, otherwise the nearest `1/N` when that is within 2% of the real value.
pub fn format_exposure(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return String::new();
    }
    if seconds >= 1.0 {
        return trim_decimal(seconds, 1);
    }
    let denominator = (1.0 / seconds).round();
    if denominator >= 1.0 && ((1.0 / denominator) - seconds).abs() / seconds <= 0.02 {
        return format!("1/{}", denominator as u64);
    }
    trim_decimal(seconds, 3)
}

/// Fixed decimals with trailing zeros (and a bare point) removed.
fn trim_decimal(value: f64, places: usize) -> String {
    let s = format!("{:.*}", places, value);
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

fn ascii(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => {
            let s = String::from_utf8_lossy(parts.first()?)
                .trim_matches(char::from(0))
                .trim()
                .to_string();
            (!s.is_empty()).then_some(s)
        }
        _ => None,
    }
}

fn rational(exif: &Exif, tag: Tag, index: usize) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let value = match &field.value {
        Value::Rational(v) => v.get(index)?.to_f64(),
        Value::SRational(v) => v.get(index)?.to_f64(),
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn uint(exif: &Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY)?.value.get_uint(0)
}

fn gps_coordinate(exif: &Exif, tag: Tag, ref_tag: Tag, negative: char) -> Option<f64> {
    let degrees = rational(exif, tag, 0)?;
    let minutes = rational(exif, tag, 1).unwrap_or(0.0);
    let seconds = rational(exif, tag, 2).unwrap_or(0.0);
    let decimal = dms_to_decimal(degrees, minutes, seconds);
    let is_negative = ascii(exif, ref_tag)
        .and_then(|r| r.chars().next())
        .is_some_and(|c| c.eq_ignore_ascii_case(&negative));
    Some(if is_negative { -decimal } else { decimal })
}

fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}

fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let cleaned = s
        .replace('-', ":")
        .replace('/', ":")
        .replace('\\', ":")
        .replace('.', ":");

    if let Ok(dt) = NaiveDateTime::parse_from_str(&cleaned, "%Y:%m:%d %H:%M:%S") {
        return Some(dt);
    }

    if let Ok(d) = chrono::NaiveDate::parse_from_str(cleaned.split(' ').next()?, "%Y:%m:%d") {
        return d.and_hms_opt(0, 0, 0);
    }

    None
}
