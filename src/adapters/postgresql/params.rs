//! Binding criterion values as statement parameters
//!
//! Criterion values are loosely typed (TOML scalars), so conversion happens
//! at bind time against the parameter type the server inferred for the
//! placeholder. Text is parsed into dates, timestamps, numbers and UUIDs.

use crate::domain::cohort::CriterionValue;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::error::Error;
use std::fmt;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

/// A criterion value that cannot be converted to the column's type
#[derive(Debug)]
pub struct ParamConversionError {
    pub value: String,
    pub target: String,
    pub reason: String,
}

impl fmt::Display for ParamConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot use value '{}' as {}: {}",
            self.value, self.target, self.reason
        )
    }
}

impl Error for ParamConversionError {}

type BoxError = Box<dyn Error + Sync + Send>;

fn conversion_error(value: &CriterionValue, ty: &Type, reason: impl Into<String>) -> BoxError {
    Box::new(ParamConversionError {
        value: value.to_string(),
        target: ty.name().to_string(),
        reason: reason.into(),
    })
}

impl ToSql for CriterionValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match *ty {
            Type::BOOL => self.as_bool(ty)?.to_sql(ty, out),
            Type::INT2 => {
                let v = i16::try_from(self.as_i64(ty)?)
                    .map_err(|_| conversion_error(self, ty, "out of range"))?;
                v.to_sql(ty, out)
            }
            Type::INT4 => {
                let v = i32::try_from(self.as_i64(ty)?)
                    .map_err(|_| conversion_error(self, ty, "out of range"))?;
                v.to_sql(ty, out)
            }
            Type::INT8 => self.as_i64(ty)?.to_sql(ty, out),
            Type::FLOAT4 => (self.as_f64(ty)? as f32).to_sql(ty, out),
            Type::FLOAT8 => self.as_f64(ty)?.to_sql(ty, out),
            Type::NUMERIC => {
                let text = match self {
                    CriterionValue::Integer(i) => i.to_string(),
                    CriterionValue::Float(f) if f.is_finite() => f.to_string(),
                    CriterionValue::Text(s) => s.trim().to_string(),
                    _ => return Err(conversion_error(self, ty, "not a finite number")),
                };
                encode_numeric(&text, out).map_err(|reason| conversion_error(self, ty, reason))?;
                Ok(IsNull::No)
            }
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                self.to_string().as_str().to_sql(ty, out)
            }
            Type::UUID => {
                let uuid = uuid::Uuid::parse_str(self.as_text(ty)?)
                    .map_err(|e| conversion_error(self, ty, e.to_string()))?;
                uuid.to_sql(ty, out)
            }
            Type::DATE => parse_date(self.as_text(ty)?)
                .ok_or_else(|| conversion_error(self, ty, "expected YYYY-MM-DD"))?
                .to_sql(ty, out),
            Type::TIMESTAMP => parse_timestamp(self.as_text(ty)?)
                .ok_or_else(|| conversion_error(self, ty, "expected YYYY-MM-DD[ HH:MM:SS]"))?
                .to_sql(ty, out),
            Type::TIMESTAMPTZ => parse_timestamptz(self.as_text(ty)?)
                .ok_or_else(|| conversion_error(self, ty, "expected an RFC 3339 timestamp"))?
                .to_sql(ty, out),
            _ => Err(conversion_error(
                self,
                ty,
                format!("{} values cannot be compared with this column type", self.kind_name()),
            )),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl CriterionValue {
    fn as_bool(&self, ty: &Type) -> Result<bool, BoxError> {
        match self {
            CriterionValue::Boolean(b) => Ok(*b),
            CriterionValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "1" => Ok(true),
                "false" | "f" | "no" | "0" => Ok(false),
                _ => Err(conversion_error(self, ty, "expected true or false")),
            },
            _ => Err(conversion_error(self, ty, "expected a boolean")),
        }
    }

    fn as_i64(&self, ty: &Type) -> Result<i64, BoxError> {
        match self {
            CriterionValue::Integer(i) => Ok(*i),
            CriterionValue::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| conversion_error(self, ty, "expected an integer")),
            _ => Err(conversion_error(self, ty, "expected an integer")),
        }
    }

    fn as_f64(&self, ty: &Type) -> Result<f64, BoxError> {
        match self {
            CriterionValue::Integer(i) => Ok(*i as f64),
            CriterionValue::Float(f) => Ok(*f),
            CriterionValue::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| conversion_error(self, ty, "expected a number")),
            CriterionValue::Boolean(_) => Err(conversion_error(self, ty, "expected a number")),
        }
    }

    fn as_text(&self, ty: &Type) -> Result<&str, BoxError> {
        match self {
            CriterionValue::Text(s) => Ok(s.trim()),
            _ => Err(conversion_error(self, ty, "expected a string")),
        }
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn parse_timestamptz(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_timestamp(s).map(|naive| naive.and_utc()))
}

/// Writes a decimal string in the binary `numeric` wire format
///
/// Layout: ndigits, weight, sign, dscale (all 16 bit) followed by ndigits
/// base-10000 digits, most significant first.
fn encode_numeric(text: &str, out: &mut BytesMut) -> Result<(), String> {
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));

    if int_part.is_empty() && frac_part.is_empty() {
        return Err("expected a decimal number".to_string());
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err("expected a decimal number".to_string());
    }

    let dscale = u16::try_from(frac_part.len()).map_err(|_| "too many decimal places".to_string())?;

    let int_pad = (4 - int_part.len() % 4) % 4;
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let digits: String = "0"
        .repeat(int_pad)
        .chars()
        .chain(int_part.chars())
        .chain(frac_part.chars())
        .chain("0".repeat(frac_pad).chars())
        .collect();

    let mut groups: Vec<i16> = digits
        .as_bytes()
        .chunks(4)
        .map(|chunk| {
            chunk
                .iter()
                .fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'))
        })
        .collect();

    let mut weight = ((int_part.len() + int_pad) / 4) as i32 - 1;
    while groups.first() == Some(&0) {
        groups.remove(0);
        weight -= 1;
    }
    while groups.last() == Some(&0) {
        groups.pop();
    }

    let (weight, sign) = if groups.is_empty() {
        (0, 0x0000u16)
    } else if negative {
        (weight, 0x4000u16)
    } else {
        (weight, 0x0000u16)
    };

    let ndigits = i16::try_from(groups.len()).map_err(|_| "number too large".to_string())?;
    let weight = i16::try_from(weight).map_err(|_| "number out of range".to_string())?;

    out.put_i16(ndigits);
    out.put_i16(weight);
    out.put_u16(sign);
    out.put_u16(dscale);
    for group in groups {
        out.put_i16(group);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn encode(value: &CriterionValue, ty: &Type) -> Result<Vec<u8>, BoxError> {
        let mut buf = BytesMut::new();
        value.to_sql(ty, &mut buf)?;
        Ok(buf.to_vec())
    }

    #[test]
    fn test_integer_to_int4() {
        let bytes = encode(&CriterionValue::Integer(42), &Type::INT4).unwrap();
        assert_eq!(bytes, 42i32.to_be_bytes().to_vec());
    }

    #[test]
    fn test_integer_out_of_range_for_int2() {
        let err = encode(&CriterionValue::Integer(70_000), &Type::INT2).unwrap_err();
        assert!(err.downcast_ref::<ParamConversionError>().is_some());
    }

    #[test]
    fn test_text_to_integer() {
        let bytes = encode(&CriterionValue::Text(" 18 ".to_string()), &Type::INT8).unwrap();
        assert_eq!(bytes, 18i64.to_be_bytes().to_vec());
    }

    #[test]
    fn test_text_to_date() {
        let bytes = encode(&CriterionValue::Text("2000-01-02".to_string()), &Type::DATE).unwrap();
        // days since 2000-01-01
        assert_eq!(bytes, 1i32.to_be_bytes().to_vec());
    }

    #[test]
    fn test_invalid_date_rejected() {
        let err = encode(&CriterionValue::Text("01/02/2023".to_string()), &Type::DATE).unwrap_err();
        let conversion = err.downcast_ref::<ParamConversionError>().unwrap();
        assert_eq!(conversion.target, "date");
    }

    #[test]
    fn test_any_value_to_text() {
        let bytes = encode(&CriterionValue::Integer(7), &Type::TEXT).unwrap();
        assert_eq!(bytes, b"7".to_vec());
    }

    #[test]
    fn test_boolean_from_text() {
        let bytes = encode(&CriterionValue::Text("false".to_string()), &Type::BOOL).unwrap();
        assert_eq!(bytes, vec![0]);
    }

    #[test]
    fn test_unsupported_target_type() {
        assert!(encode(&CriterionValue::Integer(1), &Type::BYTEA).is_err());
    }

    #[test_case("2024-03-01 10:30:00", true ; "space separated")]
    #[test_case("2024-03-01T10:30:00.123", true ; "iso with fraction")]
    #[test_case("2024-03-01", true ; "date only")]
    #[test_case("yesterday", false ; "free text")]
    fn test_parse_timestamp(input: &str, ok: bool) {
        assert_eq!(parse_timestamp(input).is_some(), ok);
    }

    #[test]
    fn test_parse_timestamptz_offset() {
        let ts = parse_timestamptz("2024-03-01T10:00:00+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T08:00:00+00:00");
    }

    fn numeric(text: &str) -> Vec<i16> {
        let mut buf = BytesMut::new();
        encode_numeric(text, &mut buf).unwrap();
        buf.chunks(2)
            .map(|c| i16::from_be_bytes([c[0], c[1]]))
            .collect()
    }

    #[test_case("12345.678", vec![3, 1, 0, 3, 1, 2345, 6780] ; "mixed")]
    #[test_case("0.5", vec![1, -1, 0, 1, 5000] ; "fraction only")]
    #[test_case("-100", vec![1, 0, 0x4000, 0, 100] ; "negative")]
    #[test_case("10000", vec![1, 1, 0, 0, 1] ; "trailing zero group")]
    #[test_case("0", vec![0, 0, 0, 0] ; "zero")]
    fn test_encode_numeric(text: &str, expected: Vec<i16>) {
        assert_eq!(numeric(text), expected);
    }

    #[test]
    fn test_encode_numeric_rejects_garbage() {
        let mut buf = BytesMut::new();
        assert!(encode_numeric("12a", &mut buf).is_err());
        assert!(encode_numeric(".", &mut buf).is_err());
    }
}
