use serde_json::{Map, Value};
use url::Url;
use zipstream::{FileReference, NewBundle};

use crate::error::ApiError;

type Object = Map<String, Value>;

/// Body of `POST /`: `filename` required, `files` optional.
pub fn create_request(body: &[u8]) -> Result<NewBundle, ApiError> {
    let object = json_object(body)?;
    let filename = string_field(&object, "filename")?.ok_or_else(|| required("filename"))?;
    let files = files_field(&object)?.unwrap_or_default();
    Ok(NewBundle { filename, files })
}

/// Body of `POST /bundle`: `files` required, `filename` optional.
pub fn download_request(body: &[u8]) -> Result<(String, Vec<FileReference>), ApiError> {
    let object = json_object(body)?;
    let filename = string_field(&object, "filename")?.unwrap_or_default();
    let files = files_field(&object)?.ok_or_else(|| required("files"))?;
    Ok((filename, files))
}

/// Body of `PUT /{id}/{secret}`: `files` required.
pub fn append_request(body: &[u8]) -> Result<Vec<FileReference>, ApiError> {
    let object = json_object(body)?;
    files_field(&object)?.ok_or_else(|| required("files"))
}

fn required(field: &str) -> ApiError {
    ApiError::Validation(format!("\"{field}\" is required"))
}

fn json_object(body: &[u8]) -> Result<Object, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Object::new());
    }
    match serde_json::from_slice(body) {
        Ok(Value::Object(object)) => Ok(object),
        _ => Err(ApiError::Validation("body must be a JSON object".into())),
    }
}

/// A string field; absent and `null` both count as missing.
fn string_field(object: &Object, field: &str) -> Result<Option<String>, ApiError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ApiError::Validation(format!("\"{field}\" must be a string"))),
    }
}

fn files_field(object: &Object) -> Result<Option<Vec<FileReference>>, ApiError> {
    match object.get("files") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(file_reference)
            .collect::<Result<_, _>>()
            .map(Some),
        Some(_) => Err(ApiError::Validation("\"files\" must be an array".into())),
    }
}

/// One file entry. Accepts `src`/`dst` as well as `source`/`destination`.
fn file_reference(value: &Value) -> Result<FileReference, ApiError> {
    let Value::Object(entry) = value else {
        return Err(ApiError::Validation("\"files\" items must be objects".into()));
    };

    let source = match aliased(entry, "source", "src") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        None | Some(Value::Null) | Some(Value::String(_)) => return Err(required("source")),
        Some(_) => {
            return Err(ApiError::Validation("\"source\" must be a string".into()));
        }
    };
    if !is_valid_uri(&source) {
        return Err(ApiError::Validation("\"source\" must be a valid uri".into()));
    }

    let destination = match aliased(entry, "destination", "dst") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            return Err(ApiError::Validation("\"destination\" must be a string".into()));
        }
    };

    Ok(FileReference {
        source,
        destination,
    })
}

fn aliased<'a>(entry: &'a Object, name: &str, alias: &str) -> Option<&'a Value> {
    entry.get(name).or_else(|| entry.get(alias))
}

fn is_valid_uri(source: &str) -> bool {
    Url::parse(source).is_ok_and(|url| !url.cannot_be_a_base())
}
