use serde_json::{Map, Value};

use crate::core::errors::ApiError;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_u64_field(server, "server.port", "port", 0, 65_535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
    }

    if let Some(session) = expect_optional_object(root, "session")? {
        validate_u64_field(session, "session.max_age_secs", "max_age_secs", 1, 31_536_000)?;
        validate_u64_field(session, "session.max_contexts", "max_contexts", 1, 100_000)?;
        validate_u64_field(
            session,
            "session.cleanup_interval_secs",
            "cleanup_interval_secs",
            1,
            86_400,
        )?;
    }

    if let Some(rag) = expect_optional_object(root, "rag")? {
        validate_u64_field(rag, "rag.chunk_size", "chunk_size", 1, 1_000_000)?;
        validate_u64_field(rag, "rag.top_k", "top_k", 1, 1_000)?;
        validate_f64_field(
            rag,
            "rag.similarity_threshold",
            "similarity_threshold",
            0.0,
            1.0,
        )?;
        validate_u64_field(
            rag,
            "rag.max_context_length",
            "max_context_length",
            1,
            10_000_000,
        )?;
    }

    if let Some(gateway) = expect_optional_object(root, "gateway")? {
        validate_optional_string_field(gateway, "gateway.base_url", "base_url")?;
        validate_optional_string_field(gateway, "gateway.api_key", "api_key")?;
        validate_optional_string_field(gateway, "gateway.embedding_model", "embedding_model")?;
        validate_u64_field(
            gateway,
            "gateway.request_timeout_secs",
            "request_timeout_secs",
            1,
            3_600,
        )?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ApiError::Configuration(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(ApiError::Configuration(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() || value.as_str().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "string"))
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        if item.as_str().is_none() {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::Configuration(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
