//! Leaf transcoding between live text and encoded scalars.
//!
//! The schema's logical type drives the conversion. The only exception is
//! shape sniffing: text headed for a plain `int`/`long` that is not itself an
//! integer but looks like a date or a date-time is turned into epoch days or
//! epoch seconds. Sniffing only ever applies on the way in; a sniffed value
//! decodes as a plain integer.
use chrono::{DateTime, NaiveDate, SecondsFormat, TimeDelta, Utc};
use once_cell::sync::Lazy;
use ordered_float::OrderedFloat;
use regex::Regex;

use crate::config::CodecOptions;
use crate::error::CodecError;
use crate::live::Primitive;
use crate::schema::{LogicalType, ScalarKind, ScalarSchema};
use crate::value::{DecimalText, EncodedValue};

// ------------------------------ Grammars ---------------------------------- //

/// FHIR `date`: year, year-month or full date.
pub const DATE_GRAMMAR: &str =
    r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1]))?)?$";

/// Full date-time with mandatory offset (FHIR `instant`).
pub const DATE_TIME_GRAMMAR: &str = r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)-(0[1-9]|1[0-2])-(0[1-9]|[1-2][0-9]|3[0-1])T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00))$";

/// FHIR `decimal`.
pub const DECIMAL_GRAMMAR: &str = r"^-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?$";

pub static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(DATE_GRAMMAR).expect("date grammar"));
pub static DATE_TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(DATE_TIME_GRAMMAR).expect("date-time grammar"));
pub static DECIMAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(DECIMAL_GRAMMAR).expect("decimal grammar"));

// ----------------------------- Transcoder --------------------------------- //

#[derive(Debug, Clone, Copy)]
pub struct ScalarTranscoder {
    shape_sniffing: bool,
}

impl Default for ScalarTranscoder {
    fn default() -> Self {
        Self::new(&CodecOptions::default())
    }
}

impl ScalarTranscoder {
    pub fn new(options: &CodecOptions) -> Self {
        Self { shape_sniffing: options.shape_sniffing }
    }

    pub fn encode(&self, text: &str, scalar: &ScalarSchema) -> Result<EncodedValue, CodecError> {
        match &scalar.logical {
            Some(LogicalType::Decimal { .. }) => DecimalText::parse(text).map(EncodedValue::Decimal),
            Some(LogicalType::Date) => integral(scalar.kind, epoch_days(text)?),
            Some(LogicalType::TimeMicros) => integral(scalar.kind, parse_instant(text)?.timestamp()),
            Some(LogicalType::TimestampMillis) => integral(scalar.kind, parse_instant(text)?.timestamp_millis()),
            Some(LogicalType::TimestampMicros) => {
                let micros = parse_instant(text)?.timestamp_micros();
                integral(scalar.kind, micros)
            }
            Some(LogicalType::Other(_)) | None => self.encode_plain(text, scalar.kind),
        }
    }

    fn encode_plain(&self, text: &str, kind: ScalarKind) -> Result<EncodedValue, CodecError> {
        match kind {
            ScalarKind::Null => Err(CodecError::shape(format!("`{text}` where null was expected"))),
            ScalarKind::String => Ok(EncodedValue::String(text.to_string())),
            ScalarKind::Bytes => Ok(EncodedValue::Bytes(text.as_bytes().to_vec())),
            ScalarKind::Int | ScalarKind::Long => {
                let n = match text.parse::<i64>() {
                    Ok(n) => n,
                    Err(_) => self
                        .sniff(text)
                        .ok_or_else(|| CodecError::shape(format!("`{text}` is not an integer")))?,
                };
                integral(kind, n)
            }
            ScalarKind::Float => parse_float::<f32>(text).map(|x| EncodedValue::Float(OrderedFloat(x))),
            ScalarKind::Double => parse_float::<f64>(text).map(|x| EncodedValue::Double(OrderedFloat(x))),
            ScalarKind::Boolean => match text {
                "true" => Ok(EncodedValue::Boolean(true)),
                "false" => Ok(EncodedValue::Boolean(false)),
                _ => Err(CodecError::shape(format!("`{text}` is not a boolean"))),
            },
        }
    }

    /// Epoch days for a full date, epoch seconds for a date-time.
    fn sniff(&self, text: &str) -> Option<i64> {
        if !self.shape_sniffing {
            return None;
        }
        if DATE_RE.is_match(text) {
            return epoch_days(text).ok();
        }
        if DATE_TIME_RE.is_match(text) {
            return parse_instant(text).ok().map(|t| t.timestamp());
        }
        None
    }

    pub fn decode(&self, value: &EncodedValue, scalar: &ScalarSchema) -> Result<Primitive, CodecError> {
        match &scalar.logical {
            Some(LogicalType::Decimal { .. }) => match value {
                EncodedValue::Decimal(d) => Ok(Primitive::number(d.as_str())),
                other => Err(unexpected("decimal", other)),
            },
            Some(LogicalType::Date) => format_epoch_days(integral_value(value)?).map(Primitive::text),
            Some(LogicalType::TimeMicros) => {
                let secs = integral_value(value)?;
                let t = DateTime::<Utc>::from_timestamp(secs, 0)
                    .ok_or_else(|| CodecError::shape(format!("{secs} is out of range for a timestamp")))?;
                Ok(Primitive::text(t.to_rfc3339_opts(SecondsFormat::Secs, true)))
            }
            Some(LogicalType::TimestampMillis) => {
                let ms = integral_value(value)?;
                let t = DateTime::<Utc>::from_timestamp_millis(ms)
                    .ok_or_else(|| CodecError::shape(format!("{ms} is out of range for a timestamp")))?;
                Ok(Primitive::text(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            }
            Some(LogicalType::TimestampMicros) => {
                let us = integral_value(value)?;
                let t = DateTime::<Utc>::from_timestamp_micros(us)
                    .ok_or_else(|| CodecError::shape(format!("{us} is out of range for a timestamp")))?;
                Ok(Primitive::text(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            }
            Some(LogicalType::Other(_)) | None => decode_plain(value, scalar.kind),
        }
    }
}

fn decode_plain(value: &EncodedValue, kind: ScalarKind) -> Result<Primitive, CodecError> {
    match (kind, value) {
        (ScalarKind::Boolean, EncodedValue::Boolean(b)) => Ok(Primitive::boolean(*b)),
        (ScalarKind::Int, EncodedValue::Int(n)) => Ok(Primitive::number(n.to_string())),
        (ScalarKind::Long, EncodedValue::Long(n)) => Ok(Primitive::number(n.to_string())),
        (ScalarKind::Float, EncodedValue::Float(x)) => Ok(Primitive::number(x.0.to_string())),
        (ScalarKind::Double, EncodedValue::Double(x)) => Ok(Primitive::number(x.0.to_string())),
        (ScalarKind::String, EncodedValue::String(s)) => Ok(Primitive::text(s.clone())),
        (ScalarKind::Bytes, EncodedValue::Bytes(b)) => String::from_utf8(b.clone())
            .map(Primitive::text)
            .map_err(|_| CodecError::shape("bytes are not valid UTF-8")),
        (kind, other) => Err(unexpected(kind.name(), other)),
    }
}

// ------------------------------- Helpers ---------------------------------- //

fn integral(kind: ScalarKind, n: i64) -> Result<EncodedValue, CodecError> {
    match kind {
        ScalarKind::Int => i32::try_from(n)
            .map(EncodedValue::Int)
            .map_err(|_| CodecError::shape(format!("{n} does not fit an int"))),
        ScalarKind::Long => Ok(EncodedValue::Long(n)),
        other => Err(CodecError::UnsupportedSchema(format!(
            "temporal logical type on a `{}` scalar",
            other.name()
        ))),
    }
}

fn integral_value(value: &EncodedValue) -> Result<i64, CodecError> {
    match value {
        EncodedValue::Int(n) => Ok(i64::from(*n)),
        EncodedValue::Long(n) => Ok(*n),
        other => Err(unexpected("int or long", other)),
    }
}

fn parse_float<T: std::str::FromStr + Copy + Into<f64>>(text: &str) -> Result<T, CodecError> {
    if !DECIMAL_RE.is_match(text) {
        return Err(CodecError::shape(format!("`{text}` is not a number")));
    }
    let x = text
        .parse::<T>()
        .map_err(|_| CodecError::shape(format!("`{text}` is not a number")))?;
    // overflow parses to infinity
    if !x.into().is_finite() {
        return Err(CodecError::shape(format!("`{text}` is out of range")));
    }
    Ok(x)
}

fn unix_epoch() -> NaiveDate {
    DateTime::<Utc>::UNIX_EPOCH.date_naive()
}

/// Calendar days since 1970-01-01 (proleptic Gregorian).
pub fn epoch_days(text: &str) -> Result<i64, CodecError> {
    if !DATE_RE.is_match(text) {
        return Err(CodecError::shape(format!("`{text}` is not a date")));
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| CodecError::shape(format!("`{text}` is not a full date: {e}")))?;
    Ok(date.signed_duration_since(unix_epoch()).num_days())
}

pub fn format_epoch_days(days: i64) -> Result<String, CodecError> {
    TimeDelta::try_days(days)
        .and_then(|delta| unix_epoch().checked_add_signed(delta))
        .map(|date| date.format("%Y-%m-%d").to_string())
        .ok_or_else(|| CodecError::shape(format!("{days} is out of range for a date")))
}

fn parse_instant(text: &str) -> Result<DateTime<chrono::FixedOffset>, CodecError> {
    DateTime::parse_from_rfc3339(text)
        .map_err(|e| CodecError::shape(format!("`{text}` is not an offset date-time: {e}")))
}

fn unexpected(expected: &str, found: &EncodedValue) -> CodecError {
    CodecError::shape(format!("expected {expected}, found {}", found.kind_name()))
}

// ------------------------------- Tests ------------------------------------ //
