//! Typed field values and the codec translating them to and from the
//! engine's wire representation.
//!
//! Encoding infers the wire type from the value's shape unless an explicit
//! [`FieldType`] is requested through [`EncodeOpts`], in which case the value
//! must be compatible with the requested tag. Three tags (`Str`, `Uri`,
//! `XmlLiteral`) accept an optional extra string at write time; on read, the
//! URI prefix is concatenated in front of the payload while the other two
//! extras are dropped. The codec touches no shared state and takes no locks;
//! record references are re-wrapped by the owning connection.

use std::fmt;

use crate::conn::Connection;
use crate::engine::WireField;
use crate::errors::{DbError, Result};
use crate::record::Record;

/// Fixpoint values carry 4 decimal digits and live in (-800, 800).
const FIXPOINT_BOUND: f64 = 800.0;

/// Calendar date payload of a date field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Date {
    year: i32,
    month: u8,
    day: u8,
}

impl Date {
    pub fn new(year: i32, month: u8, day: u8) -> Result<Date> {
        if !(1..=12).contains(&month) || day < 1 || day > days_in_month(year, month) {
            return Err(DbError::data("Invalid date."));
        }
        Ok(Date { year, month, day })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn day(&self) -> u8 {
        self.day
    }
}

fn days_in_month(year: i32, month: u8) -> u8 {
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        _ => 28,
    }
}

/// Wall-clock time payload of a time field, with hundredths of a second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time {
    hour: u8,
    minute: u8,
    second: u8,
    centisec: u8,
}

impl Time {
    pub fn new(hour: u8, minute: u8, second: u8) -> Result<Time> {
        Time::with_centisec(hour, minute, second, 0)
    }

    pub fn with_centisec(hour: u8, minute: u8, second: u8, centisec: u8) -> Result<Time> {
        if hour > 23 || minute > 59 || second > 59 || centisec > 99 {
            return Err(DbError::data("Invalid time."));
        }
        Ok(Time {
            hour,
            minute,
            second,
            centisec,
        })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn second(&self) -> u8 {
        self.second
    }

    pub fn centisec(&self) -> u8 {
        self.centisec
    }
}

/// Wire type tags, usable as the explicit encoding in [`EncodeOpts`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Null,
    Record,
    Int,
    Double,
    Str,
    Uri,
    XmlLiteral,
    Char,
    Fixpoint,
    Date,
    Time,
    Var,
}

/// One decoded field value.
///
/// `Var` doubles as the query wildcard; see [`FieldValue::wildcard`]. The
/// write-only tags (`Uri`, `XmlLiteral`, string language tags) have no
/// variant of their own: they are requested through [`EncodeOpts`] and read
/// back as plain strings.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue<'c> {
    Null,
    Int(i64),
    Double(f64),
    Fixpoint(f64),
    Char(char),
    Date(Date),
    Time(Time),
    Str(String),
    Record(Record<'c>),
    Var(i64),
}

impl<'c> FieldValue<'c> {
    /// The wildcard marker for match-record queries: matches any field.
    pub fn wildcard() -> FieldValue<'static> {
        FieldValue::Var(0)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn is_record(&self) -> bool {
        matches!(self, FieldValue::Record(_))
    }

    /// The wire type this value encodes to when no explicit type is given.
    pub fn natural_type(&self) -> FieldType {
        match self {
            FieldValue::Null => FieldType::Null,
            FieldValue::Int(_) => FieldType::Int,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::Fixpoint(_) => FieldType::Fixpoint,
            FieldValue::Char(_) => FieldType::Char,
            FieldValue::Date(_) => FieldType::Date,
            FieldValue::Time(_) => FieldType::Time,
            FieldValue::Str(_) => FieldType::Str,
            FieldValue::Record(_) => FieldType::Record,
            FieldValue::Var(_) => FieldType::Var,
        }
    }
}

impl<'c> From<()> for FieldValue<'c> {
    fn from(_: ()) -> Self {
        FieldValue::Null
    }
}

impl<'c> From<i64> for FieldValue<'c> {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl<'c> From<f64> for FieldValue<'c> {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl<'c> From<&str> for FieldValue<'c> {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl<'c> From<String> for FieldValue<'c> {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl<'c> From<char> for FieldValue<'c> {
    fn from(v: char) -> Self {
        FieldValue::Char(v)
    }
}

impl<'c> From<Record<'c>> for FieldValue<'c> {
    fn from(v: Record<'c>) -> Self {
        FieldValue::Record(v)
    }
}

/// Optional encoding controls for a field write, replacing positional
/// type/extra-string arguments: both default to "infer"/"none".
#[derive(Clone, Debug, Default)]
pub struct EncodeOpts {
    pub field_type: Option<FieldType>,
    pub ext_str: Option<String>,
}

/// A value paired with its encoding options; what bulk write operations and
/// query parameters accept.
#[derive(Clone, Debug)]
pub struct FieldArg<'c> {
    pub value: FieldValue<'c>,
    pub opts: EncodeOpts,
}

impl<'c> FieldArg<'c> {
    pub fn new(value: impl Into<FieldValue<'c>>) -> FieldArg<'c> {
        FieldArg {
            value: value.into(),
            opts: EncodeOpts::default(),
        }
    }

    pub fn typed(value: impl Into<FieldValue<'c>>, field_type: FieldType) -> FieldArg<'c> {
        FieldArg {
            value: value.into(),
            opts: EncodeOpts {
                field_type: Some(field_type),
                ext_str: None,
            },
        }
    }

    pub fn with_extra(
        value: impl Into<FieldValue<'c>>,
        field_type: FieldType,
        ext_str: impl Into<String>,
    ) -> FieldArg<'c> {
        FieldArg {
            value: value.into(),
            opts: EncodeOpts {
                field_type: Some(field_type),
                ext_str: Some(ext_str.into()),
            },
        }
    }
}

impl<'c> From<FieldValue<'c>> for FieldArg<'c> {
    fn from(value: FieldValue<'c>) -> Self {
        FieldArg::new(value)
    }
}

impl<'c> From<()> for FieldArg<'c> {
    fn from(v: ()) -> Self {
        FieldArg::new(v)
    }
}

impl<'c> From<i64> for FieldArg<'c> {
    fn from(v: i64) -> Self {
        FieldArg::new(v)
    }
}

impl<'c> From<f64> for FieldArg<'c> {
    fn from(v: f64) -> Self {
        FieldArg::new(v)
    }
}

impl<'c> From<&str> for FieldArg<'c> {
    fn from(v: &str) -> Self {
        FieldArg::new(v)
    }
}

impl<'c> From<char> for FieldArg<'c> {
    fn from(v: char) -> Self {
        FieldArg::new(v)
    }
}

impl<'c> From<Record<'c>> for FieldArg<'c> {
    fn from(v: Record<'c>) -> Self {
        FieldArg::new(v)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Null => "null",
            FieldType::Record => "record",
            FieldType::Int => "int",
            FieldType::Double => "double",
            FieldType::Str => "str",
            FieldType::Uri => "uri",
            FieldType::XmlLiteral => "xmlliteral",
            FieldType::Char => "char",
            FieldType::Fixpoint => "fixpoint",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::Var => "var",
        };
        f.write_str(name)
    }
}

/// Check that an explicitly requested wire type is reachable from the
/// value's shape. Mirrors the inference table used for writes: textual
/// values may become str/char/uri/xmlliteral, doubles may become fixpoint,
/// ints may become var, everything else only encodes as itself.
fn check_compat(value: &FieldValue<'_>, requested: FieldType) -> Result<FieldType> {
    let natural = value.natural_type();
    let ok = requested == natural
        || matches!(
            (natural, requested),
            (FieldType::Int, FieldType::Var)
                | (FieldType::Var, FieldType::Int)
                | (FieldType::Double, FieldType::Fixpoint)
                | (FieldType::Fixpoint, FieldType::Double)
                | (FieldType::Str, FieldType::Char)
                | (FieldType::Str, FieldType::Uri)
                | (FieldType::Str, FieldType::XmlLiteral)
                | (FieldType::Char, FieldType::Str)
        );
    if !ok {
        return Err(DbError::data(format!(
            "Requested encoding {} is not supported for a {} value.",
            requested, natural
        )));
    }
    Ok(requested)
}

fn encode_fixpoint(v: f64) -> Result<WireField> {
    if !v.is_finite() || v.abs() >= FIXPOINT_BOUND {
        return Err(DbError::data("Fixpoint value out of range."));
    }
    Ok(WireField::Fixpoint((v * 10_000.0).round() / 10_000.0))
}

fn first_char(s: &str) -> Result<char> {
    // A longer string is silently truncated to its first character;
    // only the empty string is rejected.
    s.chars()
        .next()
        .ok_or_else(|| DbError::data("Cannot encode an empty string as char."))
}

/// Encode a field value into its wire representation.
pub(crate) fn encode(value: &FieldValue<'_>, opts: &EncodeOpts) -> Result<WireField> {
    let ftype = match opts.field_type {
        Some(requested) => check_compat(value, requested)?,
        None => value.natural_type(),
    };
    if opts.ext_str.is_some()
        && !matches!(
            ftype,
            FieldType::Str | FieldType::Uri | FieldType::XmlLiteral
        )
    {
        return Err(DbError::data(
            "Extra string is only supported for str, uri and xmlliteral fields.",
        ));
    }

    let ext = || opts.ext_str.clone();
    match (value, ftype) {
        (FieldValue::Null, FieldType::Null) => Ok(WireField::Null),
        (FieldValue::Int(v), FieldType::Int) => Ok(WireField::Int(*v)),
        (FieldValue::Int(v), FieldType::Var) => Ok(WireField::Var(*v)),
        (FieldValue::Var(v), FieldType::Var) => Ok(WireField::Var(*v)),
        (FieldValue::Var(v), FieldType::Int) => Ok(WireField::Int(*v)),
        (FieldValue::Double(v), FieldType::Double) => Ok(WireField::Double(*v)),
        (FieldValue::Double(v), FieldType::Fixpoint) => encode_fixpoint(*v),
        (FieldValue::Fixpoint(v), FieldType::Fixpoint) => encode_fixpoint(*v),
        (FieldValue::Fixpoint(v), FieldType::Double) => Ok(WireField::Double(*v)),
        (FieldValue::Char(c), FieldType::Char) => Ok(WireField::Char(*c)),
        (FieldValue::Char(c), FieldType::Str) => Ok(WireField::Str {
            val: c.to_string(),
            lang: ext(),
        }),
        (FieldValue::Date(d), FieldType::Date) => Ok(WireField::Date(*d)),
        (FieldValue::Time(t), FieldType::Time) => Ok(WireField::Time(*t)),
        (FieldValue::Str(s), FieldType::Str) => Ok(WireField::Str {
            val: s.clone(),
            lang: ext(),
        }),
        (FieldValue::Str(s), FieldType::Char) => Ok(WireField::Char(first_char(s)?)),
        (FieldValue::Str(s), FieldType::Uri) => Ok(WireField::Uri {
            val: s.clone(),
            prefix: ext(),
        }),
        (FieldValue::Str(s), FieldType::XmlLiteral) => Ok(WireField::XmlLiteral {
            val: s.clone(),
            dtype: ext(),
        }),
        (FieldValue::Record(rec), FieldType::Record) => Ok(WireField::Record(rec.handle()?)),
        _ => Err(DbError::data("Value encoding error.")),
    }
}

/// Decode a wire field back into a typed value. Record references are
/// wrapped by `conn`, which fetches the field count under a read lock of
/// its own; the codec itself takes no locks.
pub(crate) fn decode<'c>(conn: &'c Connection, data: WireField) -> Result<FieldValue<'c>> {
    Ok(match data {
        WireField::Null => FieldValue::Null,
        WireField::Int(v) => FieldValue::Int(v),
        WireField::Double(v) => FieldValue::Double(v),
        WireField::Fixpoint(v) => FieldValue::Fixpoint(v),
        WireField::Char(c) => FieldValue::Char(c),
        WireField::Date(d) => FieldValue::Date(d),
        WireField::Time(t) => FieldValue::Time(t),
        WireField::Str { val, .. } => FieldValue::Str(val),
        WireField::Uri { val, prefix } => FieldValue::Str(match prefix {
            Some(p) => format!("{}{}", p, val),
            None => val,
        }),
        WireField::XmlLiteral { val, .. } => FieldValue::Str(val),
        WireField::Record(rec) => FieldValue::Record(conn.wrap_record(rec)?),
        WireField::Var(v) => FieldValue::Var(v),
    })
}
