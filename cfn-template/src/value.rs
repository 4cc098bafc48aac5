//! Template values: literals and the intrinsic functions the templates use.

use serde_json::json;

/// A value inside a template.  Everything is rendered to JSON in one place, so helpers never
/// build intrinsic-function objects by hand.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Literal(serde_json::Value),
    /// `{"Ref": id}`
    Ref(String),
    /// `{"Fn::GetAtt": [id, "Arn"]}`
    Arn(String),
    /// `{"Fn::GetAtt": [id, attribute]}`
    GetAtt(String, String),
    /// `{"Fn::ImportValue": name}`
    Import(String),
    /// `{"Fn::Join": [delimiter, [values]]}`
    Join(String, Vec<Value>),
    /// `{"Fn::Sub": template}`
    Sub(String),
    List(Vec<Value>),
}

impl Value {
    pub fn reference<S: Into<String>>(id: S) -> Self {
        Value::Ref(id.into())
    }

    pub fn arn<S: Into<String>>(id: S) -> Self {
        Value::Arn(id.into())
    }

    pub fn get_att<S1: Into<String>, S2: Into<String>>(id: S1, attribute: S2) -> Self {
        Value::GetAtt(id.into(), attribute.into())
    }

    pub fn import<S: Into<String>>(name: S) -> Self {
        Value::Import(name.into())
    }

    pub fn join<S: Into<String>>(delimiter: S, values: Vec<Value>) -> Self {
        Value::Join(delimiter.into(), values)
    }

    pub fn render(&self) -> serde_json::Value {
        match self {
            Value::Literal(value) => value.clone(),
            Value::Ref(id) => json!({ "Ref": id }),
            Value::Arn(id) => json!({ "Fn::GetAtt": [id, "Arn"] }),
            Value::GetAtt(id, attribute) => json!({ "Fn::GetAtt": [id, attribute] }),
            Value::Import(name) => json!({ "Fn::ImportValue": name }),
            Value::Join(delimiter, values) => json!({
                "Fn::Join": [delimiter, values.iter().map(Value::render).collect::<Vec<_>>()]
            }),
            Value::Sub(template) => json!({ "Fn::Sub": template }),
            Value::List(values) => {
                serde_json::Value::Array(values.iter().map(Value::render).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Literal(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Literal(s.into())
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Literal(s.as_str().into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Literal(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Literal(n.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Literal(b.into())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Literal(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

/// Renders a slice of values as a JSON array
pub(crate) fn render_all(values: &[Value]) -> serde_json::Value {
    serde_json::Value::Array(values.iter().map(Value::render).collect())
}
