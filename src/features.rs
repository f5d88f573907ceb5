use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Numeric patient attributes the model was fine-tuned with. Used when the
/// checkpoint ships no `scaler.json`.
pub const DEFAULT_FEATURES: [&str; 6] = [
    "age",
    "bmi",
    "heart_rate",
    "systolic_bp",
    "diastolic_bp",
    "temperature_c",
];

#[derive(Debug, Error)]
pub enum AttributeError {
    #[error("attribute `{0}` must be a number")]
    NotNumeric(String),
}

#[derive(Deserialize, Debug, Clone)]
pub struct FeatureStats {
    pub name: String,
    pub mean: f64,
    pub std: f64,
}

/// Standard scaler fitted offline alongside the model. Each request merges
/// its overrides over the feature means, so absent attributes scale to zero.
#[derive(Deserialize, Debug, Clone)]
pub struct AttributeScaler {
    features: Vec<FeatureStats>,
}

impl AttributeScaler {
    /// Pass-through scaler (mean 0, std 1) for checkpoints without stats.
    pub fn identity(names: &[&str]) -> Self {
        Self {
            features: names
                .iter()
                .map(|name| FeatureStats {
                    name: name.to_string(),
                    mean: 0.0,
                    std: 1.0,
                })
                .collect(),
        }
    }

    /// Pull the known attributes out of the request body. A present but
    /// non-numeric value is an error; absent and `null` are not.
    pub fn overrides_from_json(&self, body: &Value) -> Result<HashMap<String, f64>, AttributeError> {
        let mut overrides = HashMap::new();
        for feature in &self.features {
            match body.get(&feature.name) {
                None | Some(Value::Null) => {}
                Some(value) => {
                    let number = value
                        .as_f64()
                        .ok_or_else(|| AttributeError::NotNumeric(feature.name.clone()))?;
                    overrides.insert(feature.name.clone(), number);
                }
            }
        }
        Ok(overrides)
    }

    /// Standard-scale a single record, filling missing attributes with the
    /// training mean.
    pub fn transform(&self, overrides: &HashMap<String, f64>) -> Vec<(String, f64)> {
        self.features
            .iter()
            .map(|feature| {
                let raw = overrides.get(&feature.name).copied().unwrap_or(feature.mean);
                let std = if feature.std.abs() < f64::EPSILON {
                    1.0
                } else {
                    feature.std
                };
                (feature.name.clone(), (raw - feature.mean) / std)
            })
            .collect()
    }
}

/// Render the scaled attributes and the free-text message into the encoder
/// prompt the model was fine-tuned on.
pub fn build_prompt(message: &str, scaled: &[(String, f64)]) -> String {
    let attributes = scaled
        .iter()
        .map(|(name, value)| format!("{}={:.3}", name, value))
        .collect::<Vec<_>>()
        .join(" ");
    format!("patient: {} | message: {}", attributes, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scaler() -> AttributeScaler {
        serde_json::from_value(json!({
            "features": [
                {"name": "age", "mean": 50.0, "std": 10.0},
                {"name": "bmi", "mean": 25.0, "std": 5.0}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn missing_attributes_scale_to_zero() {
        let scaled = scaler().transform(&HashMap::new());
        assert_eq!(scaled.len(), 2);
        for (_, z) in scaled {
            assert_eq!(z, 0.0);
        }
    }

    #[test]
    fn overrides_are_standard_scaled() {
        let overrides = HashMap::from([("age".to_string(), 60.0)]);
        let scaled = scaler().transform(&overrides);
        assert_eq!(scaled[0], ("age".to_string(), 1.0));
        assert_eq!(scaled[1].1, 0.0);
    }

    #[test]
    fn zero_std_does_not_divide_by_zero() {
        let scaler: AttributeScaler = serde_json::from_value(json!({
            "features": [{"name": "age", "mean": 40.0, "std": 0.0}]
        }))
        .unwrap();
        let overrides = HashMap::from([("age".to_string(), 42.0)]);
        assert_eq!(scaler.transform(&overrides)[0].1, 2.0);
    }

    #[test]
    fn non_numeric_override_is_rejected() {
        let err = scaler()
            .overrides_from_json(&json!({"message": "hi", "age": "forty"}))
            .unwrap_err();
        assert!(err.to_string().contains("age"));
    }

    #[test]
    fn null_override_is_treated_as_absent() {
        let overrides = scaler()
            .overrides_from_json(&json!({"age": null, "bmi": 30.0}))
            .unwrap();
        assert!(!overrides.contains_key("age"));
        assert_eq!(overrides["bmi"], 30.0);
    }

    #[test]
    fn identity_scaler_passes_values_through() {
        let scaler = AttributeScaler::identity(&["age"]);
        let overrides = HashMap::from([("age".to_string(), 3.5)]);
        assert_eq!(scaler.transform(&overrides)[0].1, 3.5);
    }

    #[test]
    fn prompt_contains_attributes_and_message() {
        let prompt = build_prompt(
            "I have a headache",
            &[("age".to_string(), 1.0), ("bmi".to_string(), -0.5)],
        );
        assert_eq!(
            prompt,
            "patient: age=1.000 bmi=-0.500 | message: I have a headache"
        );
    }
}
