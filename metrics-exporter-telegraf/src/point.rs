use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;
use uuid::Uuid;

/// Tag key carrying the per-point unique identifier.
///
/// Telegraf (and InfluxDB behind it) keys a series by measurement, tag set and timestamp. Two
/// observations recorded within the same timestamp resolution would otherwise overwrite each other, so every point
/// is stamped with a freshly generated identifier under this key.
pub const GUID_TAG: &str = "__guid";

/// Errors that could occur while building a [`Point`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PointError {
    /// The measurement name was empty.
    #[error("measurement name must not be empty")]
    EmptyMeasurement,

    /// No fields were provided.
    #[error("point must have at least one field")]
    NoFields,

    /// A field was provided with an empty name.
    #[error("field name must not be empty")]
    EmptyFieldKey,

    /// A floating-point field was NaN or infinite, which line protocol cannot represent.
    #[error("field '{key}' is not a finite number")]
    NonFiniteField {
        /// Name of the offending field.
        key: String,
    },
}

/// A field value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Signed integer, written with an `i` suffix.
    Integer(i64),

    /// Floating-point number.
    Float(f64),

    /// String, written double-quoted.
    String(String),

    /// Boolean.
    Boolean(bool),
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    FieldValue::Integer(i64::from(value))
                }
            }
        )*
    };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        FieldValue::Float(f64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_owned())
    }
}

/// A single measurement observation.
///
/// Points are immutable once built, and can only be created through [`Point::builder`], which validates the point
/// and stamps it with the [`GUID_TAG`] tag.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    measurement: String,
    fields: BTreeMap<String, FieldValue>,
    tags: BTreeMap<String, String>,
    timestamp: Option<i64>,
}

impl Point {
    /// Starts building a point for the given measurement.
    pub fn builder<M>(measurement: M) -> PointBuilder
    where
        M: Into<String>,
    {
        PointBuilder {
            measurement: measurement.into(),
            fields: BTreeMap::new(),
            tags: BTreeMap::new(),
            timestamp: None,
        }
    }

    /// Returns the measurement name.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Returns the fields, ordered by name.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the tags, ordered by key.
    pub fn tags(&self) -> impl ExactSizeIterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the value of the given tag, if present.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns `true` if the point carries the given tag key.
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    /// Returns the explicit timestamp, in nanoseconds since the Unix epoch.
    ///
    /// When no timestamp is set, the collector assigns the arrival time.
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }
}

/// Builder for a [`Point`].
#[derive(Debug)]
pub struct PointBuilder {
    measurement: String,
    fields: BTreeMap<String, FieldValue>,
    tags: BTreeMap<String, String>,
    timestamp: Option<i64>,
}

impl PointBuilder {
    /// Adds a field, replacing any existing field with the same name.
    #[must_use]
    pub fn field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Adds a tag, replacing any existing tag with the same key.
    ///
    /// Tags with an empty key or an empty value cannot be expressed in line protocol and are ignored.
    #[must_use]
    pub fn tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let (key, value) = (key.into(), value.into());
        if !key.is_empty() && !value.is_empty() {
            self.tags.insert(key, value);
        }
        self
    }

    /// Adds every tag from the given iterator.
    #[must_use]
    pub fn tags<I, K, V>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        tags.into_iter().fold(self, |builder, (k, v)| builder.tag(k, v))
    }

    /// Sets an explicit timestamp in nanoseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp_nanos(mut self, nanos: i64) -> Self {
        self.timestamp = Some(nanos);
        self
    }

    /// Sets an explicit timestamp from a `SystemTime`.
    ///
    /// Times before the Unix epoch, or too far in the future to fit in 64 bits of nanoseconds, leave the timestamp
    /// unset.
    #[must_use]
    pub fn timestamp(mut self, time: SystemTime) -> Self {
        self.timestamp = time
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|d| i64::try_from(d.as_nanos()).ok());
        self
    }

    /// Validates the point and stamps it with a unique [`GUID_TAG`].
    ///
    /// # Errors
    ///
    /// Returns an error if the measurement name is empty, if there are no fields, if a field name is empty, or if a
    /// floating-point field is not finite.
    pub fn build(mut self) -> Result<Point, PointError> {
        if self.measurement.is_empty() {
            return Err(PointError::EmptyMeasurement);
        }
        if self.fields.is_empty() {
            return Err(PointError::NoFields);
        }
        for (key, value) in &self.fields {
            if key.is_empty() {
                return Err(PointError::EmptyFieldKey);
            }
            if let FieldValue::Float(v) = value {
                if !v.is_finite() {
                    return Err(PointError::NonFiniteField { key: key.clone() });
                }
            }
        }

        self.tags.insert(GUID_TAG.to_owned(), Uuid::new_v4().to_string());

        Ok(Point {
            measurement: self.measurement,
            fields: self.fields,
            tags: self.tags,
            timestamp: self.timestamp,
        })
    }
}
