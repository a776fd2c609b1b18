//! Coercion rules from wire values to storage values.
//!
//! The infallible coercions (`to_number`, `to_flag`, `to_json_string`)
//! never reject input: anything they cannot interpret maps to a default.

use serde_json::{Number, Value};

/// Coerces a number or numeric string to a JSON number, `0` otherwise.
pub fn to_number(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(n.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(number_from_f64)
            .unwrap_or_else(zero),
        _ => zero(),
    }
}

/// Coerces a boolean-ish value to a `1`/`0` flag.
///
/// `true`, `1`, `"1"` and `"true"` are set; everything else is clear.
pub fn to_flag(value: &Value) -> Value {
    let set = match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() == Some(1.0),
        Value::String(s) => {
            let s = s.trim();
            s == "1" || s.eq_ignore_ascii_case("true")
        }
        _ => false,
    };
    Value::from(u8::from(set))
}

/// Serializes any value to a JSON string; strings pass through untouched.
pub fn to_json_string(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

/// Coerces a scalar to text.
pub(crate) fn to_text(value: &Value) -> Result<Value, &'static str> {
    match value {
        Value::String(s) => Ok(Value::String(s.clone())),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        Value::Null => Err("Required"),
        Value::Array(_) => Err("Expected string, received array"),
        Value::Object(_) => Err("Expected string, received object"),
    }
}

/// Coerces a row identifier (string or number) to text.
pub(crate) fn to_id(value: &Value) -> Result<Value, &'static str> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(Value::String(s.clone())),
        Value::String(_) | Value::Null => Err("Required"),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        _ => Err("Expected string or number"),
    }
}

/// Keeps a nullable date-like value as it is.
pub(crate) fn to_date(value: &Value) -> Result<Value, &'static str> {
    match value {
        Value::Null | Value::String(_) => Ok(value.clone()),
        _ => Err("Expected date string or null"),
    }
}

fn number_from_f64(f: f64) -> Value {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or_else(zero)
    }
}

fn zero() -> Value {
    Value::from(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn numbers() {
        assert_eq!(to_number(&json!(12.5)), json!(12.5));
        assert_eq!(to_number(&json!("12.5")), json!(12.5));
        assert_eq!(to_number(&json!(" 7 ")), json!(7));
        assert_eq!(to_number(&json!("")), json!(0));
        assert_eq!(to_number(&json!("abc")), json!(0));
        assert_eq!(to_number(&json!("NaN")), json!(0));
        assert_eq!(to_number(&json!(null)), json!(0));
        assert_eq!(to_number(&json!(true)), json!(0));
        assert_eq!(to_number(&json!({"a": 1})), json!(0));
    }

    #[test]
    fn flags() {
        for set in [json!(true), json!(1), json!("1"), json!("true"), json!("TRUE")] {
            assert_eq!(to_flag(&set), json!(1), "{set}");
        }
        for clear in [json!(false), json!(0), json!("0"), json!("yes"), json!(null), json!(2)] {
            assert_eq!(to_flag(&clear), json!(0), "{clear}");
        }
    }

    #[test]
    fn json_blobs() {
        assert_eq!(to_json_string(&json!("[1,2]")), json!("[1,2]"));
        assert_eq!(to_json_string(&json!([1, 2])), json!("[1,2]"));
        assert_eq!(to_json_string(&json!({"k": "v"})), json!(r#"{"k":"v"}"#));
        assert_eq!(to_json_string(&json!(null)), json!("null"));
    }

    #[test]
    fn text_and_ids() {
        assert_eq!(to_text(&json!(5)), Ok(json!("5")));
        assert_eq!(to_text(&json!(null)), Err("Required"));
        assert!(to_text(&json!([])).is_err());
        assert_eq!(to_id(&json!(9)), Ok(json!("9")));
        assert_eq!(to_id(&json!("")), Err("Required"));
        assert!(to_id(&json!({})).is_err());
    }

    #[test]
    fn dates() {
        assert_eq!(to_date(&json!(null)), Ok(json!(null)));
        assert_eq!(to_date(&json!("2024-01-01")), Ok(json!("2024-01-01")));
        assert!(to_date(&json!(5)).is_err());
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            any::<f64>().prop_map(|f| Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)),
            ".{0,12}".prop_map(Value::from),
            proptest::collection::vec(any::<i32>(), 0..3).prop_map(|v| json!(v)),
        ]
    }

    proptest! {
        #[test]
        fn number_coercion_is_total(v in arb_value()) {
            prop_assert!(to_number(&v).is_number());
        }

        #[test]
        fn flag_coercion_is_binary(v in arb_value()) {
            let flag = to_flag(&v);
            prop_assert!(flag == json!(0) || flag == json!(1));
        }

        #[test]
        fn json_coercion_always_yields_string(v in arb_value()) {
            prop_assert!(to_json_string(&v).is_string());
        }
    }
}
