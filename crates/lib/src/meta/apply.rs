use tracing::trace;

use super::MetaRule;
use crate::{
    Result,
    node::NodeError,
    path::Segment,
    value::{DataType, Value},
};

/// Validates and cleans a value about to be stored under `key`.
///
/// `block` wins over everything. Null on a nullable key and the key's default skip the
/// remaining checks. Otherwise the value must be accepted, coercible to the rule's type,
/// gets prepended, and finally passes through the cleaner.
pub fn apply_value(rule: &MetaRule, key: &Segment, value: Value) -> Result<Value> {
    if rule.block {
        return Err(NodeError::Illegal {
            key: key.to_key(),
            reason: "key is blocked and cannot be set".to_string(),
        }
        .into());
    }
    if (rule.nullable && value.is_null()) || rule.default.as_ref() == Some(&value) {
        return Ok(value);
    }

    if let Some(accepted) = &rule.accepted {
        if !accepted.contains(&value) {
            return Err(NodeError::NotAccepted {
                key: key.to_key(),
                value: value.to_string(),
            }
            .into());
        }
    }

    let mut value = match rule.data_type {
        Some(data_type) => coerce(data_type, value)?,
        None => value,
    };

    if let Some(prefix) = &rule.prepend {
        if let Value::Text(text) = &value {
            if !text.starts_with(prefix.as_str()) {
                value = Value::Text(format!("{prefix}{text}"));
            }
        }
    }

    if let Some(clean) = &rule.clean {
        value = match clean(value, key) {
            Ok(Some(cleaned)) => cleaned,
            Ok(None) => {
                return Err(NodeError::Cleaner {
                    key: key.to_key(),
                    reason: "cleaner returned nothing".to_string(),
                }
                .into());
            }
            Err(err) => {
                return Err(NodeError::Cleaner {
                    key: key.to_key(),
                    reason: err.to_string(),
                }
                .into());
            }
        };
    }

    Ok(value)
}

/// Checks that a key may change from `old` to the already cleaned `value`.
pub fn apply_transition(rule: &MetaRule, key: &Segment, old: &Value, value: &Value) -> Result<()> {
    if old.is_null() || (rule.nullable && value.is_null()) {
        return Ok(());
    }
    if rule.constant && rule.default.as_ref() != Some(old) {
        return Err(NodeError::Constant {
            key: key.to_key(),
            current: old.to_string(),
        }
        .into());
    }
    if rule.constant_type {
        let (from, to) = (old.data_type(), value.data_type());
        if from != to {
            return Err(NodeError::TypeLocked {
                key: key.to_key(),
                from: from.to_string(),
                to: to.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Coerces a value into a data type, eg. `"3"` into `3`.
pub fn coerce(data_type: DataType, value: Value) -> Result<Value> {
    let mismatch = |value: &Value| -> crate::Error {
        NodeError::InvalidType {
            expected: data_type.to_string(),
            actual: format!("{} {value}", value.type_name()),
        }
        .into()
    };
    if value.data_type() == data_type {
        return Ok(value);
    }
    let coerced = match (data_type, &value) {
        (DataType::String, Value::Int(_) | Value::Float(_) | Value::Bool(_)) => {
            Some(Value::Text(value.to_string()))
        }
        (DataType::Number, Value::Text(text)) => parse_number(text.trim()),
        (DataType::Boolean, Value::Text(text)) => match text.trim() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (DataType::Boolean, Value::Int(0)) => Some(Value::Bool(false)),
        (DataType::Boolean, Value::Int(1)) => Some(Value::Bool(true)),
        _ => None,
    };
    match coerced {
        Some(coerced) => {
            trace!(from = %value, to = %coerced, "Coerced value to {data_type}");
            Ok(coerced)
        }
        None => Err(mismatch(&value)),
    }
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(int) = text.parse::<i64>() {
        return Some(Value::Int(int));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Value::Float)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Segment {
        Segment::from("k")
    }

    #[test]
    fn numeric_strings_coerce_to_numbers() {
        assert_eq!(coerce(DataType::Number, Value::from("3")).unwrap(), Value::Int(3));
        assert_eq!(
            coerce(DataType::Number, Value::from(" 2.5 ")).unwrap(),
            Value::Float(2.5)
        );
        assert!(coerce(DataType::Number, Value::from("three")).unwrap_err().is_type_error());
        assert_eq!(
            coerce(DataType::String, Value::Int(7)).unwrap(),
            Value::from("7")
        );
    }

    #[test]
    fn default_and_null_bypass_checks() {
        let rule = MetaRule {
            accepted: Some(vec![Value::Int(1)]),
            nullable: true,
            default: Some(Value::Int(0)),
            ..Default::default()
        };
        assert_eq!(apply_value(&rule, &key(), Value::Null).unwrap(), Value::Null);
        assert_eq!(apply_value(&rule, &key(), Value::Int(0)).unwrap(), Value::Int(0));
        let err = apply_value(&rule, &key(), Value::Int(5)).unwrap_err();
        assert_eq!(err.code(), "EINVAL");
    }

    #[test]
    fn block_short_circuits() {
        let rule = MetaRule {
            block: true,
            nullable: true,
            ..Default::default()
        };
        let err = apply_value(&rule, &key(), Value::Null).unwrap_err();
        assert_eq!(err.code(), "EILLEGAL");
    }

    #[test]
    fn prepend_is_idempotent() {
        let rule = MetaRule {
            prepend: Some("#".into()),
            data_type: Some(DataType::String),
            ..Default::default()
        };
        assert_eq!(apply_value(&rule, &key(), Value::from("a")).unwrap(), "#a");
        assert_eq!(apply_value(&rule, &key(), Value::from("#a")).unwrap(), "#a");
        assert_eq!(apply_value(&rule, &key(), Value::Int(4)).unwrap(), "#4");
    }

    #[test]
    fn cleaner_returning_nothing_fails() {
        let rule = MetaRule::default().cleaned_by(|value, _| {
            Ok(value.as_text().map(|t| Value::from(t.to_lowercase())))
        });
        assert_eq!(apply_value(&rule, &key(), Value::from("ABC")).unwrap(), "abc");
        let err = apply_value(&rule, &key(), Value::Int(1)).unwrap_err();
        assert!(matches!(
            err.as_node_error(),
            Some(NodeError::Cleaner { .. })
        ));
    }

    #[test]
    fn constant_only_changes_from_default() {
        let rule = MetaRule {
            constant: true,
            default: Some(Value::from("x")),
            ..Default::default()
        };
        assert!(apply_transition(&rule, &key(), &Value::from("x"), &Value::from("y")).is_ok());
        let err = apply_transition(&rule, &key(), &Value::from("y"), &Value::from("z")).unwrap_err();
        assert_eq!(err.code(), "EALREADY");
        // null can always be left
        assert!(apply_transition(&rule, &key(), &Value::Null, &Value::from("z")).is_ok());
    }

    #[test]
    fn constant_type_compares_categories() {
        let rule = MetaRule {
            constant_type: true,
            ..Default::default()
        };
        assert!(apply_transition(&rule, &key(), &Value::Int(1), &Value::Float(2.5)).is_ok());
        let err =
            apply_transition(&rule, &key(), &Value::Int(1), &Value::from("1")).unwrap_err();
        assert_eq!(err.code(), "TypeError");
    }
}
