//! Sprig helpers registered with every template, on top of the Go builtins.
//!
//! Piped values arrive as the last argument, so `{{ .Name | default "web" }}` calls `default`
//! with `["web", .Name]`.
use base64::Engine;
use gtmpl_value::{Func, FuncError, Value};

pub(super) const HELPERS: &[(&str, Func)] = &[
    ("default", default),
    ("required", required),
    ("quote", quote),
    ("toJson", to_json),
    ("toYaml", to_yaml),
    ("indent", indent),
    ("nindent", nindent),
    ("upper", upper),
    ("lower", lower),
    ("trim", trim),
    ("b64enc", b64enc),
];

fn default(args: &[Value]) -> Result<Value, FuncError> {
    let [fallback, value] = exactly("default", args)?;
    Ok(if truthy(value) {
        value.clone()
    } else {
        fallback.clone()
    })
}

fn required(args: &[Value]) -> Result<Value, FuncError> {
    let [message, value] = exactly("required", args)?;
    match value {
        Value::NoValue | Value::Nil => Err(FuncError::Generic(text(message))),
        Value::String(s) if s.is_empty() => Err(FuncError::Generic(text(message))),
        _ => Ok(value.clone()),
    }
}

fn quote(args: &[Value]) -> Result<Value, FuncError> {
    Ok(Value::String(
        args.iter()
            .filter(|arg| !matches!(arg, Value::NoValue | Value::Nil))
            .map(|arg| serde_json::Value::String(text(arg)).to_string())
            .collect::<Vec<_>>()
            .join(" "),
    ))
}

fn to_json(args: &[Value]) -> Result<Value, FuncError> {
    let [value] = exactly("toJson", args)?;
    serde_json::to_string(&json(value))
        .map(Value::String)
        .map_err(|error| FuncError::Generic(error.to_string()))
}

fn to_yaml(args: &[Value]) -> Result<Value, FuncError> {
    let [value] = exactly("toYaml", args)?;
    serde_yaml::to_string(&json(value))
        .map(|yaml| Value::String(yaml.trim_end().to_owned()))
        .map_err(|error| FuncError::Generic(error.to_string()))
}

fn indent(args: &[Value]) -> Result<Value, FuncError> {
    let [width, value] = exactly("indent", args)?;
    Ok(Value::String(indented(width, value)?))
}

fn nindent(args: &[Value]) -> Result<Value, FuncError> {
    let [width, value] = exactly("nindent", args)?;
    Ok(Value::String(format!("\n{}", indented(width, value)?)))
}

fn upper(args: &[Value]) -> Result<Value, FuncError> {
    let [value] = exactly("upper", args)?;
    Ok(Value::String(text(value).to_uppercase()))
}

fn lower(args: &[Value]) -> Result<Value, FuncError> {
    let [value] = exactly("lower", args)?;
    Ok(Value::String(text(value).to_lowercase()))
}

fn trim(args: &[Value]) -> Result<Value, FuncError> {
    let [value] = exactly("trim", args)?;
    Ok(Value::String(text(value).trim().to_owned()))
}

fn b64enc(args: &[Value]) -> Result<Value, FuncError> {
    let [value] = exactly("b64enc", args)?;
    Ok(Value::String(
        base64::engine::general_purpose::STANDARD.encode(text(value)),
    ))
}

fn exactly<'a, const N: usize>(
    name: &str,
    args: &'a [Value],
) -> Result<&'a [Value; N], FuncError> {
    args.try_into().map_err(|_| {
        FuncError::Generic(format!(
            "wrong number of args for {name}: want {N} got {}",
            args.len()
        ))
    })
}

fn indented(width: &Value, value: &Value) -> Result<String, FuncError> {
    let width = match width {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        _ => None,
    }
    .ok_or_else(|| FuncError::Generic("indent width must be a non-negative integer".to_owned()))?;

    let padding = " ".repeat(width);
    Ok(text(value)
        .split('\n')
        .map(|line| format!("{padding}{line}"))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Go truthiness: false, zero, empty and missing values are false.
fn truthy(value: &Value) -> bool {
    match value {
        Value::NoValue | Value::Nil => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) | Value::Map(map) => !map.is_empty(),
        Value::Function(_) => true,
    }
}

/// Strings are taken verbatim, everything else as the engine prints it.
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json(value: &Value) -> serde_json::Value {
    match value {
        Value::NoValue | Value::Nil | Value::Function(_) => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => n
            .as_i64()
            .map(serde_json::Value::from)
            .or_else(|| n.as_u64().map(serde_json::Value::from))
            .or_else(|| n.as_f64().map(serde_json::Value::from))
            .unwrap_or_default(),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => items.iter().map(json).collect(),
        Value::Object(map) | Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), json(value)))
                .collect(),
        ),
    }
}
