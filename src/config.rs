use std::{
    env,
    path::{Path, PathBuf},
};

use crate::LLMError;

pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const BASE_URL_ENV: &str = "GEMINI_BASE_URL";
pub const REQUEST_TIMEOUT_ENV: &str = "GEMINI_REQUEST_TIMEOUT_MS";

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_PROMPT: &str = "Hello, are you working?";
pub const PROBE_PROMPT: &str = "Hi";

/// Reads the credential from `GOOGLE_API_KEY`.
pub fn api_key_from_env() -> Result<String, LLMError> {
    api_key_from(env::var(API_KEY_ENV).ok())
}

/// Only an unset or empty variable counts as missing; the value is passed
/// through as-is.
pub fn api_key_from(value: Option<String>) -> Result<String, LLMError> {
    match value {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(LLMError::MissingApiKey(API_KEY_ENV)),
    }
}

/// Loads `path` (or `.env` searched upwards from the working directory) into
/// the process environment. Variables already set are left untouched. A
/// missing file yields `Ok(None)`.
///
/// Runs before any tracing subscriber exists, so the caller reports the
/// outcome.
pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>, dotenvy::Error> {
    let result = match path {
        Some(path) => dotenvy::from_path(path).map(|_| path.to_path_buf()),
        None => dotenvy::dotenv(),
    };

    match result {
        Ok(loaded) => Ok(Some(loaded)),
        Err(err) if err.not_found() => Ok(None),
        Err(err) => Err(err),
    }
}
