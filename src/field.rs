//! Typed fixed-width field codecs.
//!
//! A [`FieldCodec`] is declared once per register field. During ingestion it
//! normalizes raw source cells into [`Value`]s, and a [`FieldStats`]
//! accumulator records the observed range of those values. Once every row has
//! been seen, the stats produce the final [`FieldLayout`]: the narrowest
//! on-disk encoding able to hold every normalized value.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

use crate::{Error, Result};

/// Largest decimal precision accepted by [`FieldCodec::decimal`].
pub const MAX_PRECISION: u8 = 9;

/// Largest text width, in bytes.
pub const MAX_TEXT_WIDTH: usize = u16::MAX as usize;

/// A normalized field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Whether the value equals the zero/empty value of its kind.
    pub fn is_default(&self) -> bool {
        match self {
            Value::Int(v) => *v == 0,
            Value::Float(v) => *v == 0.0,
            Value::Text(s) => s.is_empty(),
        }
    }

    /// Integer view of the value, if it is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating view of the value, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(_) => None,
        }
    }

    /// Text view of the value, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Text(s) => serializer.serialize_str(s),
        }
    }
}

/// Tie-breaking rule applied when a numeric value lies exactly halfway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Away from zero.
    HalfUp,
    /// Toward zero.
    #[default]
    HalfDown,
    /// Toward the nearest even digit.
    HalfEven,
    /// Toward the nearest odd digit.
    HalfOdd,
}

impl Rounding {
    /// Round `value` to `precision` decimal digits.
    pub fn round(self, value: f64, precision: u8) -> f64 {
        let factor = 10f64.powi(precision as i32);
        let scaled = value * factor;
        let lower = scaled.floor();
        let upper = lower + 1.0;
        let fraction = scaled - lower;

        let rounded = if (fraction - 0.5).abs() < 1e-9 {
            let (away, toward) = if value >= 0.0 {
                (upper, lower)
            } else {
                (lower, upper)
            };
            let lower_is_even = lower.rem_euclid(2.0) == 0.0;
            match self {
                Rounding::HalfUp => away,
                Rounding::HalfDown => toward,
                Rounding::HalfEven if lower_is_even => lower,
                Rounding::HalfEven => upper,
                Rounding::HalfOdd if lower_is_even => upper,
                Rounding::HalfOdd => lower,
            }
        } else if fraction < 0.5 {
            lower
        } else {
            upper
        };

        rounded / factor
    }
}

/// Case transform applied to text fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    #[default]
    None,
    Lower,
    Upper,
}

/// Declared kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Unsigned,
    Signed,
    Decimal { precision: u8 },
    Text {
        transform: Transform,
        max_length: Option<usize>,
    },
}

/// Declaration of a typed field: kind plus normalization options.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCodec {
    kind: FieldKind,
    min: Option<f64>,
    max: Option<f64>,
    rounding: Rounding,
}

impl FieldCodec {
    fn with_kind(kind: FieldKind) -> Self {
        Self {
            kind,
            min: None,
            max: None,
            rounding: Rounding::default(),
        }
    }

    /// Unsigned integer field.
    pub fn unsigned() -> Self {
        Self::with_kind(FieldKind::Unsigned)
    }

    /// Signed integer field.
    pub fn signed() -> Self {
        Self::with_kind(FieldKind::Signed)
    }

    /// Decimal field rounded to `precision` digits.
    ///
    /// Precision 0 stores a signed integer; anything above stores a 4-byte float.
    pub fn decimal(precision: u8) -> Result<Self> {
        if precision > MAX_PRECISION {
            return Err(Error::config(
                "precision",
                format!("must be at most {}, got {}", MAX_PRECISION, precision),
            ));
        }
        Ok(Self::with_kind(FieldKind::Decimal { precision }))
    }

    /// Fixed-width text field.
    pub fn text() -> Self {
        Self::with_kind(FieldKind::Text {
            transform: Transform::None,
            max_length: None,
        })
    }

    /// Clamp values below `min` up to `min`.
    pub fn with_min(mut self, min: f64) -> Result<Self> {
        self.require_numeric("min")?;
        if !min.is_finite() {
            return Err(Error::config("min", "must be a finite number"));
        }
        if let Some(max) = self.max {
            if min > max {
                return Err(Error::config("min", "min can not be greater than max"));
            }
        }
        self.min = Some(min);
        Ok(self)
    }

    /// Clamp values above `max` down to `max`.
    pub fn with_max(mut self, max: f64) -> Result<Self> {
        self.require_numeric("max")?;
        if !max.is_finite() {
            return Err(Error::config("max", "must be a finite number"));
        }
        if let Some(min) = self.min {
            if min > max {
                return Err(Error::config("max", "max can not be less than min"));
            }
        }
        self.max = Some(max);
        Ok(self)
    }

    /// Set the rounding mode of a numeric field.
    pub fn with_rounding(mut self, rounding: Rounding) -> Result<Self> {
        self.require_numeric("rounding")?;
        self.rounding = rounding;
        Ok(self)
    }

    /// Set the case transform of a text field.
    pub fn with_transform(mut self, transform: Transform) -> Result<Self> {
        match &mut self.kind {
            FieldKind::Text { transform: t, .. } => *t = transform,
            _ => return Err(Error::config("transform", "only text fields support transforms")),
        }
        Ok(self)
    }

    /// Truncate text values to at most `max_length` characters.
    pub fn with_max_length(mut self, max_length: usize) -> Result<Self> {
        if max_length == 0 {
            return Err(Error::config("max_length", "must be a positive integer"));
        }
        match &mut self.kind {
            FieldKind::Text { max_length: m, .. } => *m = Some(max_length),
            _ => return Err(Error::config("max_length", "only text fields have a length")),
        }
        Ok(self)
    }

    fn require_numeric(&self, argument: &str) -> Result<()> {
        if matches!(self.kind, FieldKind::Text { .. }) {
            return Err(Error::config(argument, "only numeric fields support this option"));
        }
        Ok(())
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn rounding(&self) -> Rounding {
        self.rounding
    }

    /// Normalize a raw source cell into its stored value.
    ///
    /// Missing or unparsable numbers become zero, missing text becomes empty.
    pub fn normalize(&self, raw: Option<&str>) -> Value {
        match self.kind {
            FieldKind::Text {
                transform,
                max_length,
            } => {
                let raw = raw.unwrap_or("");
                let mut text: String = match max_length {
                    Some(limit) => raw.chars().take(limit).collect(),
                    None => raw.to_string(),
                };
                text = match transform {
                    Transform::None => text,
                    Transform::Lower => text.to_lowercase(),
                    Transform::Upper => text.to_uppercase(),
                };
                truncate_to_bytes(&mut text, MAX_TEXT_WIDTH);
                Value::Text(text)
            }
            FieldKind::Unsigned => {
                let value = self.round(self.clamp(parse_number(raw)), 0);
                Value::Int(value.max(0.0).min(u32::MAX as f64) as i64)
            }
            FieldKind::Signed | FieldKind::Decimal { precision: 0 } => {
                let value = self.round(self.clamp(parse_number(raw)), 0);
                Value::Int(value.max(i32::MIN as f64).min(i32::MAX as f64) as i64)
            }
            FieldKind::Decimal { precision } => {
                let value = self.round(self.clamp(parse_number(raw)), precision);
                // Stored as f32; normalize now so reads reproduce the value exactly.
                Value::Float(value as f32 as f64)
            }
        }
    }

    fn clamp(&self, mut value: f64) -> f64 {
        if let Some(min) = self.min {
            if value < min {
                value = min;
            }
        }
        if let Some(max) = self.max {
            if value > max {
                value = max;
            }
        }
        value
    }

    fn round(&self, value: f64, precision: u8) -> f64 {
        self.rounding.round(value, precision)
    }
}

fn parse_number(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn truncate_to_bytes(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

/// Running statistics for one field, used to pick its final width.
#[derive(Debug, Clone, Default)]
pub struct FieldStats {
    min: i64,
    max: i64,
    text_len: usize,
}

impl FieldStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one normalized value.
    pub fn observe(&mut self, value: &Value) {
        match value {
            Value::Int(v) => {
                self.min = self.min.min(*v);
                self.max = self.max.max(*v);
            }
            Value::Float(_) => {}
            Value::Text(s) => self.text_len = self.text_len.max(s.len()),
        }
    }

    /// Narrowest layout able to hold every observed value.
    pub fn layout(&self, codec: &FieldCodec) -> FieldLayout {
        match codec.kind() {
            FieldKind::Unsigned => FieldLayout::new(Encoding::Unsigned, unsigned_width(self.max), 0),
            FieldKind::Signed | FieldKind::Decimal { precision: 0 } => {
                FieldLayout::new(Encoding::Signed, signed_width(self.min, self.max), 0)
            }
            FieldKind::Decimal { precision } => FieldLayout::new(Encoding::Float, 4, precision),
            FieldKind::Text { .. } => {
                FieldLayout::new(Encoding::Text, self.text_len.clamp(1, MAX_TEXT_WIDTH) as u16, 0)
            }
        }
    }
}

fn unsigned_width(max: i64) -> u16 {
    if max <= u8::MAX as i64 {
        1
    } else if max <= u16::MAX as i64 {
        2
    } else {
        4
    }
}

fn signed_width(min: i64, max: i64) -> u16 {
    if min >= i8::MIN as i64 && max <= i8::MAX as i64 {
        1
    } else if min >= i16::MIN as i64 && max <= i16::MAX as i64 {
        2
    } else {
        4
    }
}

/// On-disk encoding of a field.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Unsigned = 0x01,
    Signed = 0x02,
    Float = 0x03,
    Text = 0x04,
}

impl Encoding {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Unsigned),
            0x02 => Some(Self::Signed),
            0x03 => Some(Self::Float),
            0x04 => Some(Self::Text),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Final fixed-width layout of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    pub encoding: Encoding,
    pub width: u16,
    pub precision: u8,
}

impl FieldLayout {
    pub fn new(encoding: Encoding, width: u16, precision: u8) -> Self {
        Self {
            encoding,
            width,
            precision,
        }
    }

    /// Layout of an unsigned row offset able to address `items` rows.
    pub fn offset(items: u32) -> Self {
        Self::new(Encoding::Unsigned, Width::for_count(items as u64).bytes() as u16, 0)
    }

    /// Check that the width is legal for the encoding.
    pub fn is_valid(&self) -> bool {
        match self.encoding {
            Encoding::Unsigned | Encoding::Signed => matches!(self.width, 1 | 2 | 4),
            Encoding::Float => self.width == 4,
            Encoding::Text => self.width >= 1,
        }
    }

    /// Value stored in the all-default row.
    pub fn default_value(&self) -> Value {
        match self.encoding {
            Encoding::Unsigned | Encoding::Signed => Value::Int(0),
            Encoding::Float => Value::Float(0.0),
            Encoding::Text => Value::Text(String::new()),
        }
    }

    /// Append the fixed-width encoding of `value`.
    pub fn encode(&self, value: &Value, out: &mut Vec<u8>) {
        let width = self.width as usize;
        match self.encoding {
            Encoding::Unsigned | Encoding::Signed => {
                let v = value.as_i64().unwrap_or(0);
                out.extend_from_slice(&v.to_be_bytes()[8 - width..]);
            }
            Encoding::Float => {
                let v = value.as_f64().unwrap_or(0.0) as f32;
                out.extend_from_slice(&v.to_be_bytes());
            }
            Encoding::Text => {
                let bytes = value.as_str().unwrap_or("").as_bytes();
                let take = bytes.len().min(width);
                out.extend_from_slice(&bytes[..take]);
                out.resize(out.len() + (width - take), b' ');
            }
        }
    }

    /// Decode a value from exactly `width` bytes.
    pub fn decode(&self, bytes: &[u8]) -> Value {
        match self.encoding {
            Encoding::Unsigned => Value::Int(bytes.iter().fold(0i64, |acc, b| (acc << 8) | *b as i64)),
            Encoding::Signed => {
                let seed: i64 = if bytes.first().is_some_and(|b| b & 0x80 != 0) {
                    -1
                } else {
                    0
                };
                Value::Int(bytes.iter().fold(seed, |acc, b| (acc << 8) | *b as i64))
            }
            Encoding::Float => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&bytes[..4]);
                Value::Float(f32::from_be_bytes(raw) as f64)
            }
            Encoding::Text => {
                let end = bytes
                    .iter()
                    .rposition(|b| *b != b' ' && *b != 0)
                    .map_or(0, |pos| pos + 1);
                Value::Text(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
        }
    }
}

/// Width of unsigned counts and offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Width {
    U8,
    U16,
    U32,
}

impl Width {
    /// Narrowest width holding every value in `0..=max`.
    pub fn for_count(max: u64) -> Self {
        if max <= u8::MAX as u64 {
            Width::U8
        } else if max <= u16::MAX as u64 {
            Width::U16
        } else {
            Width::U32
        }
    }

    pub fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            1 => Some(Width::U8),
            2 => Some(Width::U16),
            4 => Some(Width::U32),
            _ => None,
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
        }
    }

    /// Append `value` big-endian; callers pick a width that fits.
    pub fn write(self, value: u64, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes()[8 - self.bytes()..]);
    }

    /// Read a big-endian value from the first `bytes()` bytes.
    pub fn read(self, bytes: &[u8]) -> u64 {
        bytes[..self.bytes()]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | *b as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout_for(codec: &FieldCodec, raws: &[&str]) -> FieldLayout {
        let mut stats = FieldStats::new();
        for raw in raws {
            stats.observe(&codec.normalize(Some(raw)));
        }
        stats.layout(codec)
    }

    #[test]
    fn test_rounding_modes_on_ties() {
        assert_eq!(Rounding::HalfUp.round(2.5, 0), 3.0);
        assert_eq!(Rounding::HalfDown.round(2.5, 0), 2.0);
        assert_eq!(Rounding::HalfEven.round(2.5, 0), 2.0);
        assert_eq!(Rounding::HalfOdd.round(2.5, 0), 3.0);

        assert_eq!(Rounding::HalfUp.round(-2.5, 0), -3.0);
        assert_eq!(Rounding::HalfDown.round(-2.5, 0), -2.0);
        assert_eq!(Rounding::HalfEven.round(-3.5, 0), -4.0);
        assert_eq!(Rounding::HalfOdd.round(-3.5, 0), -3.0);
    }

    #[test]
    fn test_rounding_off_tie() {
        assert_eq!(Rounding::HalfDown.round(2.6, 0), 3.0);
        assert_eq!(Rounding::HalfUp.round(2.4, 0), 2.0);
        assert!((Rounding::HalfUp.round(1.235, 2) - 1.24).abs() < 1e-9);
        assert!((Rounding::HalfDown.round(1.235, 2) - 1.23).abs() < 1e-9);
    }

    #[test]
    fn test_min_greater_than_max_rejected() {
        let err = FieldCodec::signed().with_max(10.0).unwrap().with_min(11.0);
        assert!(matches!(err, Err(Error::Config { argument, .. }) if argument == "min"));

        let err = FieldCodec::signed().with_min(5.0).unwrap().with_max(4.0);
        assert!(matches!(err, Err(Error::Config { argument, .. }) if argument == "max"));
    }

    #[test]
    fn test_options_on_wrong_kind_rejected() {
        assert!(FieldCodec::text().with_min(1.0).is_err());
        assert!(FieldCodec::unsigned().with_transform(Transform::Lower).is_err());
        assert!(FieldCodec::unsigned().with_max_length(3).is_err());
        assert!(FieldCodec::text().with_max_length(0).is_err());
        assert!(FieldCodec::decimal(MAX_PRECISION + 1).is_err());
    }

    #[test]
    fn test_numeric_normalization() {
        let codec = FieldCodec::signed()
            .with_min(-10.0)
            .unwrap()
            .with_max(100.0)
            .unwrap();
        assert_eq!(codec.normalize(Some("42")), Value::Int(42));
        assert_eq!(codec.normalize(Some("500")), Value::Int(100));
        assert_eq!(codec.normalize(Some("-50")), Value::Int(-10));
        assert_eq!(codec.normalize(Some("abc")), Value::Int(0));
        assert_eq!(codec.normalize(None), Value::Int(0));

        assert_eq!(FieldCodec::unsigned().normalize(Some("-7")), Value::Int(0));
        assert_eq!(FieldCodec::unsigned().normalize(Some("7.5")), Value::Int(7));

        let decimal = FieldCodec::decimal(2).unwrap();
        assert_eq!(decimal.normalize(Some("55.754")), Value::Float(55.75f32 as f64));
    }

    #[test]
    fn test_text_normalization() {
        let codec = FieldCodec::text()
            .with_transform(Transform::Lower)
            .unwrap()
            .with_max_length(2)
            .unwrap();
        assert_eq!(codec.normalize(Some("RUS")), Value::Text("ru".into()));
        assert_eq!(codec.normalize(None), Value::Text(String::new()));

        let upper = FieldCodec::text().with_transform(Transform::Upper).unwrap();
        assert_eq!(upper.normalize(Some("Москва")), Value::Text("МОСКВА".into()));
    }

    #[test]
    fn test_unsigned_width_selection() {
        let codec = FieldCodec::unsigned();
        assert_eq!(layout_for(&codec, &["0", "255"]).width, 1);
        assert_eq!(layout_for(&codec, &["256"]).width, 2);
        assert_eq!(layout_for(&codec, &["65535"]).width, 2);
        assert_eq!(layout_for(&codec, &["65536"]).width, 4);
    }

    #[test]
    fn test_signed_width_selection() {
        let codec = FieldCodec::signed();
        assert_eq!(layout_for(&codec, &["-128", "127"]).width, 1);
        assert_eq!(layout_for(&codec, &["128"]).width, 2);
        assert_eq!(layout_for(&codec, &["-129"]).width, 2);
        assert_eq!(layout_for(&codec, &["-32769"]).width, 4);
        assert_eq!(layout_for(&codec, &["-1"]).encoding, Encoding::Signed);
    }

    #[test]
    fn test_decimal_and_text_layouts() {
        let decimal = FieldCodec::decimal(3).unwrap();
        let layout = layout_for(&decimal, &["1.5"]);
        assert_eq!(layout, FieldLayout::new(Encoding::Float, 4, 3));

        let integral = FieldCodec::decimal(0).unwrap();
        assert_eq!(layout_for(&integral, &["12.4"]).encoding, Encoding::Signed);

        let text = FieldCodec::text();
        assert_eq!(layout_for(&text, &["ab", "abcd", "a"]).width, 4);
        assert_eq!(layout_for(&text, &[]).width, 1);
    }

    #[test]
    fn test_count_width_boundary() {
        assert_eq!(Width::for_count(250), Width::U8);
        assert_eq!(Width::for_count(255), Width::U8);
        assert_eq!(Width::for_count(256), Width::U16);
        assert_eq!(Width::for_count(65_536), Width::U32);
        assert_eq!(FieldLayout::offset(255).width, 1);
        assert_eq!(FieldLayout::offset(256).width, 2);
    }

    #[test]
    fn test_encode_decode_values() {
        let cases = [
            (FieldLayout::new(Encoding::Unsigned, 2, 0), Value::Int(40_000)),
            (FieldLayout::new(Encoding::Signed, 1, 0), Value::Int(-5)),
            (FieldLayout::new(Encoding::Signed, 4, 0), Value::Int(-2_000_000)),
            (FieldLayout::new(Encoding::Float, 4, 2), Value::Float(-12.25)),
            (FieldLayout::new(Encoding::Text, 6, 0), Value::Text("Moscow".into())),
            (FieldLayout::new(Encoding::Text, 10, 0), Value::Text("Omsk".into())),
        ];
        for (layout, value) in cases {
            let mut buf = Vec::new();
            layout.encode(&value, &mut buf);
            assert_eq!(buf.len(), layout.width as usize);
            assert_eq!(layout.decode(&buf), value);
        }
    }

    #[test]
    fn test_text_is_space_padded() {
        let layout = FieldLayout::new(Encoding::Text, 5, 0);
        let mut buf = Vec::new();
        layout.encode(&Value::Text("ru".into()), &mut buf);
        assert_eq!(&buf, b"ru   ");
    }

    #[test]
    fn test_width_read_write() {
        let mut buf = Vec::new();
        Width::U16.write(0x1234, &mut buf);
        Width::U32.write(7, &mut buf);
        assert_eq!(buf, vec![0x12, 0x34, 0, 0, 0, 7]);
        assert_eq!(Width::U16.read(&buf), 0x1234);
        assert_eq!(Width::U32.read(&buf[2..]), 7);
    }
}
