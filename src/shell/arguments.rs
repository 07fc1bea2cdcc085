//! Positional argument checks for protocol methods.

use serde_json::Value;

use super::errors::ShellError;
use super::router::Method;

/// Rejects argument lists whose length the method does not accept.
pub fn check_arity(method: Method, args: &[Value]) -> Result<(), ShellError> {
    let arity = method.arity();
    if arity.accepts(args.len()) {
        return Ok(());
    }
    Err(ShellError::invalid_arguments(
        method.as_str(),
        format!("expected {arity}, got {}", args.len()),
    ))
}

/// Reads a boolean at `index`, or `default` when it was not passed.
pub fn optional_bool(
    method: Method,
    args: &[Value],
    index: usize,
    default: bool,
) -> Result<bool, ShellError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(other) => Err(ShellError::invalid_arguments(
            method.as_str(),
            format!(
                "argument {index} must be a boolean, got {}",
                type_name(other)
            ),
        )),
    }
}

/// Reads the argument at `index`, which must be present.
pub fn required(method: Method, args: &[Value], index: usize) -> Result<&Value, ShellError> {
    args.get(index).ok_or_else(|| {
        ShellError::invalid_arguments(method.as_str(), format!("missing argument {index}"))
    })
}

/// Reads an array of byte values (each `0..=255`) at `index`.
pub fn byte_array(method: Method, args: &[Value], index: usize) -> Result<Vec<u8>, ShellError> {
    let value = required(method, args, index)?;
    let Value::Array(items) = value else {
        return Err(ShellError::invalid_arguments(
            method.as_str(),
            format!(
                "argument {index} must be an array of bytes, got {}",
                type_name(value)
            ),
        ));
    };

    items
        .iter()
        .enumerate()
        .map(|(pos, item)| {
            item.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| {
                    ShellError::invalid_arguments(
                        method.as_str(),
                        format!("element {pos} of argument {index} is not a byte: {item}"),
                    )
                })
        })
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
