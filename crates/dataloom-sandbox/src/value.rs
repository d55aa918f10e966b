use serde_json::{json, Value};

/// The sandbox's result channel type. Tabular objects never leak out of
/// evaluation: by the time a value reaches here it has already been
/// flattened to plain mappings/sequences/scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxValue {
    Number(f64),
    Text(String),
    Bool(bool),
    None,
    Mapping(Vec<(String, SandboxValue)>),
    Sequence(Vec<SandboxValue>),
}

impl SandboxValue {
    pub fn to_json(&self) -> Value {
        match self {
            SandboxValue::Number(n) => json!(n),
            SandboxValue::Text(s) => json!(s),
            SandboxValue::Bool(b) => json!(b),
            SandboxValue::None => Value::Null,
            SandboxValue::Mapping(pairs) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in pairs {
                    obj.insert(k.clone(), v.to_json());
                }
                Value::Object(obj)
            }
            SandboxValue::Sequence(items) => Value::Array(items.iter().map(SandboxValue::to_json).collect()),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, SandboxValue::None)
    }
}
