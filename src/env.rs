//! Environment variable interpolation for case-file defaults.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterpolationError {
    #[error("unclosed variable reference: ${{{0}")]
    Unclosed(String),
    #[error("environment variable '{0}' is not set")]
    Unset(String),
}

/// Interpolate `${VAR}` references from the process environment.
pub fn interpolate_env(s: &str) -> Result<String, InterpolationError> {
    interpolate_with(s, |name| std::env::var(name).ok())
}

/// Interpolate `${VAR}` references, resolving each name through `lookup`.
///
/// A `$` not followed by `{` is kept literally.
pub fn interpolate_with<F>(s: &str, lookup: F) -> Result<String, InterpolationError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => var_name.push(c),
                    None => return Err(InterpolationError::Unclosed(var_name)),
                }
            }
            let value = lookup(&var_name).ok_or(InterpolationError::Unset(var_name))?;
            result.push_str(&value);
        } else {
            result.push(c);
        }
    }

    Ok(result)
}
