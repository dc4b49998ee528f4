//! Image metadata model and private-field stripping.
//!
//! Metadata is kept the way platform image facilities expose it: top-level
//! properties (`PixelWidth`, `Orientation`, ...) plus named dictionaries
//! (`{Exif}`, `{GPS}`, ...).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

pub const GPS: &str = "{GPS}";
pub const EXIF: &str = "{Exif}";
pub const EXIF_AUX: &str = "{ExifAux}";
pub const IPTC: &str = "{IPTC}";
pub const PNG: &str = "{PNG}";
pub const TIFF: &str = "{TIFF}";
pub const DNG: &str = "{DNG}";
pub const CIFF: &str = "{CIFF}";
pub const MAKER_CANON: &str = "{MakerCanon}";
pub const MAKER_NIKON: &str = "{MakerNikon}";

/// Fields that identify people, places or devices, per dictionary.
const PRIVATE_FIELDS: &[(&str, &[&str])] = &[
    (
        EXIF,
        &[
            "UserComment",
            "SubjectLocation",
            "MakerNote",
            "CameraOwnerName",
            "BodySerialNumber",
            "LensSerialNumber",
        ],
    ),
    (EXIF_AUX, &["SerialNumber", "LensSerialNumber", "OwnerName"]),
    (
        IPTC,
        &[
            "ContentLocationCode",
            "ContentLocationName",
            "By-line",
            "By-line Title",
            "City",
            "Sub-location",
            "Province/State",
            "Country/PrimaryLocationCode",
            "Country/PrimaryLocationName",
            "OriginalTransmissionReference",
            "Headline",
            "Credit",
            "Source",
            "Contact",
            "Writer/Editor",
            "CreatorContactInfo",
        ],
    ),
    (PNG, &["Author"]),
    (TIFF, &["Artist"]),
    (DNG, &["CameraSerialNumber"]),
    (CIFF, &["OwnerName", "RecordID", "CameraSerialNumber"]),
    (MAKER_CANON, &["OwnerName", "CameraSerialNumber"]),
    (MAKER_NIKON, &["SerialNumber"]),
];

const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Metadata properties of one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageMetadata(pub Map<String, Value>);

impl ImageMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the value of `key` inside dictionary `group`.
    pub fn get(&self, group: &str, key: &str) -> Option<&Value> {
        self.0.get(group)?.as_object()?.get(key)
    }

    /// Sets `key` inside dictionary `group`, creating the dictionary if needed.
    pub fn set(&mut self, group: &str, key: &str, value: impl Into<Value>) {
        let entry = self
            .0
            .entry(group.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(dict) = entry {
            dict.insert(key.to_string(), value.into());
        }
    }

    /// Removes GPS data and the sharing-unsafe fields.
    ///
    /// Dimensions, orientation and color model are never touched. Returns
    /// true if anything was removed.
    pub fn strip_private(&mut self) -> bool {
        let mut changed = self.0.remove(GPS).is_some();

        for (group, keys) in PRIVATE_FIELDS {
            let Some(Value::Object(dict)) = self.0.get_mut(*group) else {
                continue;
            };
            for key in *keys {
                if let Some(value) = dict.remove(*key) {
                    debug!(group, key, %value, "removed private metadata");
                    changed = true;
                }
            }
        }

        changed
    }

    /// True if stripping would remove something.
    pub fn has_private(&self) -> bool {
        self.clone().strip_private()
    }

    /// Creation date from Exif `DateTimeOriginal`, falling back to `DateTimeDigitized`.
    pub fn creation_date(&self) -> Option<NaiveDateTime> {
        ["DateTimeOriginal", "DateTimeDigitized"]
            .iter()
            .filter_map(|key| self.get(EXIF, key)?.as_str())
            .find_map(|s| NaiveDateTime::parse_from_str(s, EXIF_DATE_FORMAT).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ImageMetadata {
        serde_json::from_value(json!({
            "PixelWidth": 4032,
            "PixelHeight": 3024,
            "Orientation": 6,
            "ColorModel": "RGB",
            "{GPS}": {"Latitude": 48.85, "Longitude": 2.35},
            "{Exif}": {
                "DateTimeOriginal": "2023:07:14 18:30:05",
                "ExposureTime": 0.01,
                "UserComment": "at home",
                "BodySerialNumber": "123456"
            },
            "{TIFF}": {"Artist": "Jo", "Make": "Apple"},
            "{IPTC}": {"City": "Paris", "Keywords": ["holiday"]},
            "{MakerCanon}": {"OwnerName": "Jo", "LensModel": "EF"}
        }))
        .unwrap()
    }

    #[test]
    fn strip_removes_gps_and_private_fields() {
        let mut meta = sample();
        assert!(meta.has_private());
        assert!(meta.strip_private());

        assert!(meta.0.get(GPS).is_none());
        assert!(meta.get(EXIF, "UserComment").is_none());
        assert!(meta.get(EXIF, "BodySerialNumber").is_none());
        assert!(meta.get(TIFF, "Artist").is_none());
        assert!(meta.get(IPTC, "City").is_none());
        assert!(meta.get(MAKER_CANON, "OwnerName").is_none());

        assert_eq!(meta.get(EXIF, "ExposureTime"), Some(&json!(0.01)));
        assert_eq!(meta.get(TIFF, "Make"), Some(&json!("Apple")));
        assert_eq!(meta.get(IPTC, "Keywords"), Some(&json!(["holiday"])));
        assert_eq!(meta.0.get("PixelWidth"), Some(&json!(4032)));
        assert_eq!(meta.0.get("Orientation"), Some(&json!(6)));
        assert_eq!(meta.0.get("ColorModel"), Some(&json!("RGB")));
    }

    #[test]
    fn strip_is_noop_on_clean_metadata() {
        let mut meta = sample();
        meta.strip_private();
        let before = meta.clone();
        assert!(!meta.strip_private());
        assert_eq!(meta, before);
        assert!(!meta.has_private());
    }

    #[test]
    fn set_creates_dictionary() {
        let mut meta = ImageMetadata::new();
        meta.set(PNG, "Author", "Jo");
        assert_eq!(meta.get(PNG, "Author"), Some(&json!("Jo")));
        assert!(meta.strip_private());
    }

    #[test]
    fn creation_date_from_exif() {
        let date = sample().creation_date().unwrap();
        assert_eq!(date.to_string(), "2023-07-14 18:30:05");

        let mut meta = ImageMetadata::new();
        meta.set(EXIF, "DateTimeOriginal", "garbage");
        meta.set(EXIF, "DateTimeDigitized", "2020:01:02 03:04:05");
        assert_eq!(
            meta.creation_date().unwrap().to_string(),
            "2020-01-02 03:04:05"
        );
        assert!(ImageMetadata::new().creation_date().is_none());
    }
}
