//! Structural payload translation.
//!
//! A value is reshaped into a target type by encoding it to JSON from its
//! runtime shape and decoding that JSON as the target. Nominal type identity
//! does not matter: any source whose encoded shape fits the target translates.

use serde_json::Value;

use crate::error::RouteError;
use crate::types::{Payload, TypeHandle};

/// Translates `value` into `target`.
///
/// Absent values, the unit payload, and values that encode to JSON `null`
/// translate to `Ok(None)`.
///
/// # Errors
///
/// Returns `RouteError::TypeTranslation` naming the source and target types if
/// encoding or decoding fails.
pub fn translate(
    value: Option<&Payload>,
    target: &TypeHandle,
) -> Result<Option<Payload>, RouteError> {
    let Some(value) = value else {
        return Ok(None);
    };
    if value.is_unit() {
        return Ok(None);
    }

    let from = value.type_name();
    let to = target.name();
    let encoded = value
        .encode()
        .map_err(|source| RouteError::TypeTranslation { from, to, source })?;
    if encoded == Value::Null {
        return Ok(None);
    }

    let translated = target.decode(encoded).map_err(|source| {
        tracing::debug!(from, to, error = %source, "payload translation failed");
        RouteError::TypeTranslation { from, to, source }
    })?;
    Ok(Some(translated))
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        value: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct LocalPing {
        value: String,
    }

    #[test]
    fn translates_between_structurally_equal_types() {
        let source = Payload::new(Ping {
            value: "Ping".to_string(),
        });
        let translated = translate(Some(&source), &TypeHandle::of::<LocalPing>())
            .unwrap()
            .unwrap();
        assert_eq!(translated.downcast::<LocalPing>().unwrap().value, "Ping");
    }

    #[test]
    fn translates_loosely_typed_json() {
        let source = Payload::new(serde_json::json!({ "value": "Ping" }));
        let translated = translate(Some(&source), &TypeHandle::of::<Ping>())
            .unwrap()
            .unwrap();
        assert_eq!(translated.downcast_ref::<Ping>().unwrap().value, "Ping");
    }

    #[test]
    fn absent_unit_and_null_translate_to_no_value() {
        let target = TypeHandle::of::<Ping>();
        assert!(translate(None, &target).unwrap().is_none());
        assert!(translate(Some(&Payload::unit()), &target).unwrap().is_none());
        assert!(translate(Some(&Payload::new(None::<Ping>)), &target)
            .unwrap()
            .is_none());
    }

    #[test]
    fn incompatible_shape_names_both_types() {
        let source = Payload::new("ping".to_string());
        let err = translate(Some(&source), &TypeHandle::of::<Ping>()).unwrap_err();
        match err {
            RouteError::TypeTranslation { from, to, .. } => {
                assert_eq!(from, std::any::type_name::<String>());
                assert_eq!(to, std::any::type_name::<Ping>());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn structured_value_does_not_translate_into_string() {
        let source = Payload::new(Ping {
            value: "Ping".to_string(),
        });
        let err = translate(Some(&source), &TypeHandle::of::<String>()).unwrap_err();
        assert!(matches!(
            err,
            RouteError::TypeTranslation { from, .. } if from == std::any::type_name::<Ping>()
        ));
    }
}
