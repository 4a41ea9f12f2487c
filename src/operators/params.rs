use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use crate::errors::{RasterOpsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
    Bool,
    Int,
    Float,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    fn kind(&self) -> ParameterType {
        match self {
            ParameterValue::Bool(_) => ParameterType::Bool,
            ParameterValue::Int(_) => ParameterType::Int,
            ParameterValue::Float(_) => ParameterType::Float,
            ParameterValue::Text(_) => ParameterType::Text,
        }
    }

    /// Integers are accepted where floats are expected.
    fn coerce(self, kind: ParameterType) -> Option<ParameterValue> {
        match (self, kind) {
            (ParameterValue::Int(value), ParameterType::Float) => {
                Some(ParameterValue::Float(value as f64))
            }
            (value, kind) if value.kind() == kind => Some(value),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Int(value) => Some(*value as f64),
            ParameterValue::Float(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Bool(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Int(value)
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Float(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Text(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::Text(value)
    }
}

/// Numeric range written as `(0, 100)`, `[0, 1]`, `(0, 1]`, ...
/// Round brackets exclude the bound, square brackets include it.
/// An omitted bound is unlimited, e.g. `(0, *)` or `(0,)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_inclusive: bool,
    pub max_inclusive: bool,
}

impl Interval {
    pub fn contains(&self, value: f64) -> bool {
        let above = match self.min {
            None => true,
            Some(min) if self.min_inclusive => value >= min,
            Some(min) => value > min,
        };
        let below = match self.max {
            None => true,
            Some(max) if self.max_inclusive => value <= max,
            Some(max) => value < max,
        };
        above && below
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = |bound: Option<f64>| bound.map_or(String::from("*"), |value| value.to_string());
        write!(
            f,
            "{}{}, {}{}",
            if self.min_inclusive { '[' } else { '(' },
            bound(self.min),
            bound(self.max),
            if self.max_inclusive { ']' } else { ')' },
        )
    }
}

impl FromStr for Interval {
    type Err = RasterOpsError;

    fn from_str(s: &str) -> Result<Self> {
        let error = || RasterOpsError::parameter("interval", format!("cannot parse '{s}'"));
        let s = s.trim();
        let min_inclusive = match s.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => return Err(error()),
        };
        let max_inclusive = match s.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(error()),
        };
        let inner = &s[1..s.len() - 1];
        let (min, max) = inner.split_once(',').ok_or_else(error)?;
        let parse_bound = |bound: &str| -> Result<Option<f64>> {
            match bound.trim() {
                "" | "*" => Ok(None),
                bound => bound.parse::<f64>().map(Some).map_err(|_| error()),
            }
        };
        Ok(Self {
            min: parse_bound(min)?,
            max: parse_bound(max)?,
            min_inclusive,
            max_inclusive,
        })
    }
}

/// Declaration of one operator parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterType,
    pub default: Option<ParameterValue>,
    pub interval: Option<Interval>,
    pub value_set: Option<Vec<String>>,
    pub description: String,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, kind: ParameterType) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            interval: None,
            value_set: None,
            description: String::new(),
        }
    }

    pub fn with_default(mut self, default: impl Into<ParameterValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Constrains values to `interval`, e.g. `"(0, 100)"` or `"[0, *)"`.
    ///
    /// # Panics
    /// If `interval` is not a valid interval literal.
    pub fn with_interval(mut self, interval: &str) -> Self {
        self.interval = Some(
            interval
                .parse()
                .unwrap_or_else(|err| panic!("parameter '{}': {err}", self.name)),
        );
        self
    }

    pub fn with_value_set<S: Into<String>>(mut self, values: impl IntoIterator<Item = S>) -> Self {
        self.value_set = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn validate(&self, value: ParameterValue) -> Result<ParameterValue> {
        let kind = value.kind();
        let value = value.coerce(self.kind).ok_or_else(|| {
            RasterOpsError::parameter(
                &self.name,
                format!("expected {:?}, got {:?}", self.kind, kind),
            )
        })?;
        if let (Some(interval), Some(number)) = (&self.interval, value.as_f64()) {
            if !interval.contains(number) {
                return Err(RasterOpsError::parameter(
                    &self.name,
                    format!("{number} is not in {interval}"),
                ));
            }
        }
        if let (Some(value_set), ParameterValue::Text(text)) = (&self.value_set, &value) {
            if !value_set.contains(text) {
                return Err(RasterOpsError::parameter(
                    &self.name,
                    format!("'{text}' is not one of {value_set:?}"),
                ));
            }
        }
        Ok(value)
    }
}

/// Every parameter an operator accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema(Vec<ParameterSpec>);

impl ParameterSchema {
    pub fn new(specs: Vec<ParameterSpec>) -> Self {
        Self(specs)
    }

    pub fn specs(&self) -> &[ParameterSpec] {
        &self.0
    }

    pub fn spec(&self, name: &str) -> Option<&ParameterSpec> {
        self.0.iter().find(|spec| spec.name == name)
    }

    /// Validates `given` and fills in defaults.
    /// Unknown names, wrong types, out of range values and
    /// missing parameters without default are rejected.
    pub fn resolve(&self, given: &Parameters) -> Result<Parameters> {
        if let Some(unknown) = given.names().find(|name| self.spec(name).is_none()) {
            return Err(RasterOpsError::parameter(unknown, "unknown parameter"));
        }
        self.0
            .iter()
            .map(|spec| {
                let value = match given.get(&spec.name) {
                    Some(value) => value.clone(),
                    None => spec.default.clone().ok_or_else(|| {
                        RasterOpsError::parameter(&spec.name, "missing value without default")
                    })?,
                };
                Ok((spec.name.clone(), spec.validate(value)?))
            })
            .collect::<Result<BTreeMap<_, _>>>()
            .map(Parameters)
    }
}

/// Named parameter values of one operator instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, ParameterValue>);

impl<K: Into<String>, V: Into<ParameterValue>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.0.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    fn missing(name: &str) -> RasterOpsError {
        RasterOpsError::parameter(name, "missing or of wrong type")
    }

    pub fn f64(&self, name: &str) -> Result<f64> {
        self.get(name)
            .and_then(ParameterValue::as_f64)
            .ok_or_else(|| Self::missing(name))
    }

    pub fn i64(&self, name: &str) -> Result<i64> {
        match self.get(name) {
            Some(ParameterValue::Int(value)) => Ok(*value),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        match self.get(name) {
            Some(ParameterValue::Bool(value)) => Ok(*value),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn text(&self, name: &str) -> Result<&str> {
        match self.get(name) {
            Some(ParameterValue::Text(value)) => Ok(value),
            _ => Err(Self::missing(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn schema() -> ParameterSchema {
        ParameterSchema::new(vec![
            ParameterSpec::new("salinity", ParameterType::Float)
                .with_default(35.0)
                .with_interval("(0, 100)"),
            ParameterSpec::new("thresholdRtosaOOS", ParameterType::Float).with_default(0.05),
            ParameterSpec::new("netSet", ParameterType::Text)
                .with_default("C2RCC-Nets")
                .with_value_set(["C2RCC-Nets", "C2X-Nets"]),
            ParameterSpec::new("outputRtoa", ParameterType::Bool).with_default(false),
        ])
    }

    #[rstest]
    #[case("(0, 100)", 0., false)]
    #[case("(0, 100)", 50., true)]
    #[case("[0, 1]", 1., true)]
    #[case("[0, 1)", 1., false)]
    #[case("(-50, 50)", -49.5, true)]
    #[case("(0, *)", 1e9, true)]
    #[case("(,0]", -3., true)]
    fn interval_contains(#[case] interval: &str, #[case] value: f64, #[case] expected: bool) {
        let interval: Interval = interval.parse().unwrap();
        assert_eq!(interval.contains(value), expected);
    }

    #[rstest]
    #[case("0, 1")]
    #[case("(0; 1)")]
    #[case("[a, 1]")]
    fn malformed_intervals(#[case] interval: &str) {
        assert!(interval.parse::<Interval>().is_err());
    }

    #[rstest]
    fn defaults_are_filled(schema: ParameterSchema) {
        let resolved = schema.resolve(&Parameters::new()).unwrap();
        assert_eq!(resolved.f64("salinity").unwrap(), 35.0);
        assert_eq!(resolved.f64("thresholdRtosaOOS").unwrap(), 0.05);
        assert_eq!(resolved.text("netSet").unwrap(), "C2RCC-Nets");
        assert!(!resolved.bool("outputRtoa").unwrap());
    }

    #[rstest]
    fn integers_coerce_to_floats(schema: ParameterSchema) {
        let resolved = schema
            .resolve(&Parameters::new().with("salinity", 20i64))
            .unwrap();
        assert_eq!(resolved.get("salinity"), Some(&ParameterValue::Float(20.)));
    }

    #[rstest]
    #[case(Parameters::new().with("salinity", 100.0))]
    #[case(Parameters::new().with("salinity", "high"))]
    #[case(Parameters::new().with("netSet", "Other-Nets"))]
    #[case(Parameters::new().with("unknown", 1.0))]
    fn invalid_values_are_rejected(schema: ParameterSchema, #[case] parameters: Parameters) {
        assert!(matches!(
            schema.resolve(&parameters),
            Err(RasterOpsError::ParameterValidation { .. })
        ));
    }

    #[test]
    fn missing_required_parameter() {
        let schema = ParameterSchema::new(vec![ParameterSpec::new("n", ParameterType::Int)]);
        let err = schema.resolve(&Parameters::new()).unwrap_err();
        assert!(matches!(err, RasterOpsError::ParameterValidation { parameter, .. } if parameter == "n"));
    }

    #[rstest]
    fn parameters_from_json(schema: ParameterSchema) {
        let parameters: Parameters =
            serde_json::from_str(r#"{"salinity": 12, "outputRtoa": true, "netSet": "C2X-Nets"}"#)
                .unwrap();
        let resolved = schema.resolve(&parameters).unwrap();
        assert_eq!(resolved.f64("salinity").unwrap(), 12.);
        assert!(resolved.bool("outputRtoa").unwrap());
        assert_eq!(resolved.text("netSet").unwrap(), "C2X-Nets");
    }
}
