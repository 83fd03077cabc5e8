//! URL utilities for consistent endpoint construction
//!
//! The Portal base URL comes from user configuration and may or may not carry
//! trailing slashes, while endpoint paths may or may not carry leading ones.
//! Everything that builds a request URL goes through these helpers.

/// Placeholder in the chat path template that is replaced by the selected Portal ID.
pub const PORTAL_ID_PLACEHOLDER: &str = "{portal_id}";

/// Normalize a base URL by removing trailing slashes
///
/// # Examples
///
/// ```
/// use portal_relay::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://portal.example.com/api"), "https://portal.example.com/api");
/// assert_eq!(normalize_base_url("https://portal.example.com/api/"), "https://portal.example.com/api");
/// assert_eq!(normalize_base_url("https://portal.example.com/api///"), "https://portal.example.com/api");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Construct a complete endpoint URL from a base URL and endpoint path
///
/// # Examples
///
/// ```
/// use portal_relay::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://portal.example.com/", "/auth/login"),
///     "https://portal.example.com/auth/login"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// Build the chat endpoint URL for one Portal ID.
///
/// The ID is percent-encoded as a single path segment so that IDs containing
/// `/` or spaces cannot escape into other routes. Templates without the
/// placeholder get the ID appended as a trailing segment.
///
/// ```
/// use portal_relay::utils::url::construct_portal_url;
///
/// assert_eq!(
///     construct_portal_url("https://portal.example.com", "portals/{portal_id}/chat", "P1"),
///     "https://portal.example.com/portals/P1/chat"
/// );
/// ```
pub fn construct_portal_url(base_url: &str, chat_path: &str, portal_id: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(portal_id.as_bytes())
        .collect::<String>()
        .replace('+', "%20");
    let path = if chat_path.contains(PORTAL_ID_PLACEHOLDER) {
        chat_path.replace(PORTAL_ID_PLACEHOLDER, &encoded)
    } else {
        format!("{}/{}", chat_path.trim_end_matches('/'), encoded)
    };
    construct_api_url(base_url, &path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://portal.example.com/v1"),
            "https://portal.example.com/v1"
        );
        assert_eq!(
            normalize_base_url("https://portal.example.com/v1/"),
            "https://portal.example.com/v1"
        );
        assert_eq!(
            normalize_base_url("  https://portal.example.com/  "),
            "https://portal.example.com"
        );
        assert_eq!(normalize_base_url(""), "");
        assert_eq!(normalize_base_url("///"), "");
    }

    #[test]
    fn test_construct_api_url() {
        assert_eq!(
            construct_api_url("https://portal.example.com/v1", "auth/login"),
            "https://portal.example.com/v1/auth/login"
        );
        assert_eq!(
            construct_api_url("https://portal.example.com/v1///", "///auth/login"),
            "https://portal.example.com/v1/auth/login"
        );
    }

    #[test]
    fn portal_url_replaces_every_placeholder() {
        assert_eq!(
            construct_portal_url(
                "https://portal.example.com/",
                "/portals/{portal_id}/chat?scope={portal_id}",
                "tenant-7"
            ),
            "https://portal.example.com/portals/tenant-7/chat?scope=tenant-7"
        );
    }

    #[test]
    fn portal_url_appends_id_without_placeholder() {
        assert_eq!(
            construct_portal_url("https://portal.example.com", "chat/", "P2"),
            "https://portal.example.com/chat/P2"
        );
    }

    #[test]
    fn portal_url_encodes_unsafe_ids() {
        assert_eq!(
            construct_portal_url("https://portal.example.com", "p/{portal_id}", "a b/c"),
            "https://portal.example.com/p/a%20b%2Fc"
        );
    }
}
