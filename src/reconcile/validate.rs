//! Pre-flight checks on an import document. Never touches the network.

use serde::Serialize;
use serde_json::Value;

use super::SyncError;
use crate::gateway::DesiredRecord;

/// Structural verdict on an import document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub posts_count: usize,
}

impl ValidationResult {
    fn rejected(error: &str) -> Self {
        Self {
            valid: false,
            errors: vec![error.to_string()],
            posts_count: 0,
        }
    }
}

fn has_text(post: &Value, keys: &[&str]) -> bool {
    keys.iter().any(|key| {
        post.get(key)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty())
    })
}

/// Check that `raw` holds a non-empty `posts` array whose entries all have a
/// title and a body (`content` or `body`).
pub fn validate(raw: &Value) -> ValidationResult {
    if !raw.is_object() {
        return ValidationResult::rejected("document is empty or not a JSON object");
    }

    let Some(posts) = raw.get("posts").and_then(Value::as_array) else {
        return ValidationResult::rejected("\"posts\" is missing or is not an array");
    };

    if posts.is_empty() {
        return ValidationResult::rejected("no posts found in document");
    }

    let mut errors = Vec::new();
    for (index, post) in posts.iter().enumerate() {
        let n = index + 1;
        if !post.is_object() {
            errors.push(format!("Post {}: not an object", n));
            continue;
        }
        if !has_text(post, &["title"]) {
            errors.push(format!("Post {}: title is required", n));
        }
        if !has_text(post, &["content", "body"]) {
            errors.push(format!("Post {}: content is required", n));
        }
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        posts_count: posts.len(),
    }
}

/// Validate `raw` and turn its posts into desired records.
pub fn parse_batch(raw: &Value) -> Result<Vec<DesiredRecord>, SyncError> {
    let result = validate(raw);
    if !result.valid {
        return Err(SyncError::Invalid(result.errors));
    }

    let posts = raw.get("posts").cloned().unwrap_or(Value::Null);
    serde_json::from_value(posts).map_err(|e| SyncError::Invalid(vec![e.to_string()]))
}
