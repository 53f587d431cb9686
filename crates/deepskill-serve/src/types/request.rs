//! Method parameter types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use deepskill::{InvalidInput, MatchQuery, QueryField};

use super::error::{ServeError, ServeResult};

/// Parameters of `predict`. Time control defaults to 10+0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictParams {
    pub first_party: String,
    pub second_party: String,
    #[serde(default = "default_base_minutes")]
    pub base_minutes: i64,
    #[serde(default)]
    pub increment_seconds: i64,
}

fn default_base_minutes() -> i64 {
    10
}

impl PredictParams {
    /// Read `predict` params, naming every field that is missing or has the
    /// wrong type.
    pub fn from_params(params: Option<Value>) -> ServeResult<Self> {
        let params =
            params.ok_or_else(|| ServeError::InvalidParams("Predict params required".to_string()))?;
        let Value::Object(map) = params else {
            return Err(ServeError::InvalidParams(
                "Predict params must be an object".to_string(),
            ));
        };

        let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
        let integer = |key: &str, default: i64| match map.get(key) {
            None | Some(Value::Null) => Some(default),
            Some(value) => value.as_i64(),
        };

        let first_party = text("first_party");
        let second_party = text("second_party");
        let base_minutes = integer("base_minutes", default_base_minutes());
        let increment_seconds = integer("increment_seconds", 0);

        match (first_party, second_party, base_minutes, increment_seconds) {
            (Some(first_party), Some(second_party), Some(base_minutes), Some(increment_seconds)) => {
                Ok(Self {
                    first_party,
                    second_party,
                    base_minutes,
                    increment_seconds,
                })
            }
            (first, second, base, increment) => {
                let fields = [
                    (first.is_none(), QueryField::FirstParty),
                    (second.is_none(), QueryField::SecondParty),
                    (base.is_none(), QueryField::TimeControlBase),
                    (increment.is_none(), QueryField::TimeControlIncrement),
                ]
                .into_iter()
                .filter_map(|(bad, field)| bad.then_some(field))
                .collect();
                Err(ServeError::InvalidInput(InvalidInput { fields }))
            }
        }
    }
}

impl From<PredictParams> for MatchQuery {
    fn from(p: PredictParams) -> Self {
        MatchQuery::new(p.first_party, p.second_party, p.base_minutes, p.increment_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_fill_time_control() {
        let params =
            PredictParams::from_params(Some(json!({ "first_party": "a", "second_party": "b" }))).unwrap();
        assert_eq!((params.base_minutes, params.increment_seconds), (10, 0));
    }

    #[test]
    fn test_wrong_types_name_their_fields() {
        let err = PredictParams::from_params(Some(json!({
            "first_party": 7,
            "base_minutes": "ten",
            "increment_seconds": 2
        })))
        .unwrap_err();
        match err {
            ServeError::InvalidInput(invalid) => assert_eq!(
                invalid.fields,
                vec![QueryField::FirstParty, QueryField::SecondParty, QueryField::TimeControlBase]
            ),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_object_params_are_rejected() {
        assert!(matches!(
            PredictParams::from_params(Some(json!(["a", "b"]))),
            Err(ServeError::InvalidParams(_))
        ));
        assert!(matches!(PredictParams::from_params(None), Err(ServeError::InvalidParams(_))));
    }
}
