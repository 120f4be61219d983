//! Value coercion to declared parameter types.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use nimbus_core::ParamType;
use serde_json::{Number, Value};

/// Coercion failure: what was expected, what was found.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    /// Path inside the value (`[2]` for list items), empty at the top.
    pub path: String,
    pub expected: String,
    pub found: String,
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => format!("boolean {}", b),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string '{}'", s),
        Value::Array(_) => "a list".into(),
        Value::Object(_) => "an object".into(),
    }
}

fn mismatch(ty: &ParamType, value: &Value) -> Mismatch {
    Mismatch {
        path: String::new(),
        expected: ty.name(),
        found: describe(value),
    }
}

/// Coerce `value` to `ty`, returning the canonical form.
pub fn coerce(value: &Value, ty: &ParamType) -> Result<Value, Mismatch> {
    match ty {
        ParamType::Any => Ok(value.clone()),
        ParamType::String | ParamType::Blob => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(mismatch(ty, value)),
        },
        ParamType::Integer | ParamType::Long => to_integer(value).ok_or_else(|| mismatch(ty, value)),
        ParamType::Float | ParamType::Double => to_float(value).ok_or_else(|| mismatch(ty, value)),
        ParamType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            _ => Err(mismatch(ty, value)),
        },
        ParamType::Timestamp => to_timestamp(value).ok_or_else(|| mismatch(ty, value)),
        ParamType::Map | ParamType::Structure => match value {
            Value::Object(_) => Ok(value.clone()),
            _ => Err(mismatch(ty, value)),
        },
        ParamType::List(inner) => match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    coerce(item, inner).map_err(|mut m| {
                        m.path = format!("[{}]{}", i, m.path);
                        m
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Null => Err(mismatch(ty, value)),
            // A lone scalar becomes a one-element list.
            scalar => coerce(scalar, inner)
                .map(|v| Value::Array(vec![v]))
                .map_err(|_| mismatch(ty, value)),
        },
    }
}

fn to_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
            .map(|f| Value::from(f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

fn to_float(value: &Value) -> Option<Value> {
    let f = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    Number::from_f64(f).map(Value::Number)
}

/// RFC 3339 strings, plain dates and epoch seconds, normalised to RFC 3339 UTC.
fn to_timestamp(value: &Value) -> Option<Value> {
    let parsed: DateTime<Utc> = match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                dt.with_timezone(&Utc)
            } else if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                date.and_hms_opt(0, 0, 0)?.and_utc()
            } else {
                DateTime::from_timestamp(s.parse::<i64>().ok()?, 0)?
            }
        }
        Value::Number(n) => DateTime::from_timestamp(n.as_i64()?, 0)?,
        _ => return None,
    };
    Some(Value::String(
        parsed.to_rfc3339_opts(SecondsFormat::Secs, true),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn list_of(ty: ParamType) -> ParamType {
        ParamType::List(Box::new(ty))
    }

    #[test]
    fn test_scalars() {
        assert_eq!(coerce(&json!(5), &ParamType::String).unwrap(), json!("5"));
        assert_eq!(coerce(&json!("42"), &ParamType::Integer).unwrap(), json!(42));
        assert_eq!(coerce(&json!(3.0), &ParamType::Long).unwrap(), json!(3));
        assert!(coerce(&json!(3.5), &ParamType::Integer).is_err());
        assert!(coerce(&json!("lots"), &ParamType::Integer).is_err());
        assert_eq!(coerce(&json!("2.5"), &ParamType::Double).unwrap(), json!(2.5));
        assert_eq!(coerce(&json!("TRUE"), &ParamType::Boolean).unwrap(), json!(true));
        assert!(coerce(&json!(1), &ParamType::Boolean).is_err());
        assert!(coerce(&json!("x"), &ParamType::Structure).is_err());
    }

    #[test]
    fn test_lists() {
        let ty = list_of(ParamType::String);
        assert_eq!(coerce(&json!("i-1"), &ty).unwrap(), json!(["i-1"]));
        assert_eq!(coerce(&json!(["a", 2]), &ty).unwrap(), json!(["a", "2"]));

        let err = coerce(&json!([1, "x"]), &list_of(ParamType::Integer)).unwrap_err();
        assert_eq!(err.path, "[1]");
        assert_eq!(err.expected, "integer");
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(
            coerce(&json!("2024-03-01T10:00:00+02:00"), &ParamType::Timestamp).unwrap(),
            json!("2024-03-01T08:00:00Z")
        );
        assert_eq!(
            coerce(&json!("2024-03-01"), &ParamType::Timestamp).unwrap(),
            json!("2024-03-01T00:00:00Z")
        );
        assert_eq!(
            coerce(&json!(0), &ParamType::Timestamp).unwrap(),
            json!("1970-01-01T00:00:00Z")
        );
        assert!(coerce(&json!("yesterday"), &ParamType::Timestamp).is_err());
    }
}
