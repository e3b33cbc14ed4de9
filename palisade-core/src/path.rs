//! Path normalization for route matching, rate-limit keying, and metric labels.
//!
//! Normalization keeps metric cardinality bounded and makes sure two requests
//! for the same logical resource share a route and a bucket:
//!
//! - duplicate slashes collapse, trailing slashes are stripped
//! - UUID and pure-numeric segments become `{id}`
//! - `v1`, `v2`, ... version segments are dropped for matching (the original
//!   path, version included, is what gets forwarded upstream)

/// Normalize a request path. The result always starts with `/`.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for segment in path.split('/') {
        if segment.is_empty() {
            continue;
        }
        if is_version_segment(segment) {
            continue;
        }
        out.push('/');
        if segment.parse::<i64>().is_ok() || is_uuid(segment) {
            out.push_str("{id}");
        } else {
            out.push_str(&segment.to_ascii_lowercase());
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Version segments (`v1`, `v2`, ...) are stripped when matching.
fn is_version_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some('v') | Some('V'))
        && !segment[1..].is_empty()
        && segment[1..].chars().all(|c| c.is_ascii_digit())
}

/// Check if a string looks like a UUID.
fn is_uuid(s: &str) -> bool {
    s.len() == 36
        && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
        && s.matches('-').count() == 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_duplicate_and_trailing_slashes() {
        assert_eq!(normalize_path("//api//debates/"), "/api/debates");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn replaces_numeric_and_uuid_segments() {
        assert_eq!(normalize_path("/api/debates/42"), "/api/debates/{id}");
        assert_eq!(
            normalize_path("/api/debates/550e8400-e29b-41d4-a716-446655440000/turns"),
            "/api/debates/{id}/turns"
        );
    }

    #[test]
    fn strips_version_segments() {
        assert_eq!(normalize_path("/api/v1/llm/completion"), "/api/llm/completion");
        assert_eq!(normalize_path("/api/v12/organizations"), "/api/organizations");
        // "version" is not a version segment, nor is a bare "v"
        assert_eq!(normalize_path("/api/version"), "/api/version");
        assert_eq!(normalize_path("/api/v/x"), "/api/v/x");
    }

    #[test]
    fn lowercases_segments() {
        assert_eq!(normalize_path("/API/Debates"), "/api/debates");
    }
}
