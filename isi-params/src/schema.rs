use serde::Serialize;
use serde_json::Value;

/// The type/range description of one parameter, returned verbatim by
/// `get_parameter_info` — this system has no GUI to render it against,
/// but the IPC vocabulary in the acquisition spec requires the command
/// to exist and answer with real schema data.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamKind {
    Bool,
    Int { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    String,
    StringList,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn validate(&self, value: &Value) -> bool {
        match &self.kind {
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Int { min, max } => value
                .as_i64()
                .map(|v| v >= *min && v <= *max)
                .unwrap_or(false),
            ParamKind::Float { min, max } => value
                .as_f64()
                .map(|v| v >= *min && v <= *max)
                .unwrap_or(false),
            ParamKind::String => value.is_string(),
            ParamKind::StringList => value
                .as_array()
                .map(|a| a.iter().all(Value::is_string))
                .unwrap_or(false),
        }
    }
}
