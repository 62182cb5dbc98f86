use serde::de::Error as DeError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

/// Argument mapping for an operation call: parameter name to a JSON
/// primitive or an array of strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(pub(crate) Map<String, Value>);

impl Arguments {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build arguments from any serializable struct.
    pub fn from_struct<T: Serialize>(value: T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            _ => Err(DeError::custom("arguments must be a struct")),
        }
    }

    /// Insert a single key/value pair, returning the updated `Arguments`.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Deserialize the arguments into the desired type.
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get::<String>(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get::<i64>(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get::<f64>(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get::<bool>(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Arguments {
    fn from(map: Map<String, Value>) -> Self {
        Arguments(map)
    }
}

impl TryFrom<Value> for Arguments {
    type Error = serde_json::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Arguments(map)),
            Value::Null => Ok(Arguments::new()),
            _ => Err(DeError::custom("arguments must be a JSON object")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Forecast {
        location: String,
        days: u32,
    }

    #[test]
    fn test_from_struct_and_typed_access() {
        let args = Arguments::from_struct(Forecast {
            location: "Ames, Iowa".into(),
            days: 3,
        })
        .unwrap();
        assert_eq!(args.get_string("location").as_deref(), Some("Ames, Iowa"));
        assert_eq!(args.get_i64("days"), Some(3));
        assert_eq!(args.get_bool("days"), None);
    }

    #[test]
    fn test_null_counts_as_absent() {
        let args = Arguments::new().set("latitude", Value::Null).set("days", 2);
        assert!(!args.contains("latitude"));
        assert!(args.contains("days"));
        assert!(Arguments::try_from(json!([1, 2])).is_err());
    }
}
