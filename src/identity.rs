// DID and AT-URI helpers.
//
// Every DID comparison in the dispatcher goes through `normalize_did`, so
// values that differ only by casing or stray whitespace from upstream
// serialization compare equal. Nothing in here allocates more than one
// string or touches the network.

/// Scheme prefix for AT Protocol resource identifiers.
const AT_URI_SCHEME: &str = "at://";

/// Normalize a DID for equality comparison.
///
/// Trims surrounding whitespace and lowercases. Idempotent:
/// `normalize_did(&normalize_did(x)) == normalize_did(x)` for any input.
pub fn normalize_did(did: &str) -> String {
    did.trim().to_lowercase()
}

/// True when two DIDs refer to the same actor after normalization.
pub fn same_did(a: &str, b: &str) -> bool {
    normalize_did(a) == normalize_did(b)
}

/// Cheap structural check: `did:<method>:<identifier>` with non-empty parts.
pub fn looks_like_did(value: &str) -> bool {
    let mut parts = value.trim().splitn(3, ':');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(scheme), Some(method), Some(id))
            if scheme.eq_ignore_ascii_case("did") && !method.is_empty() && !id.is_empty()
    )
}

/// Extract the owning DID (the authority segment) from an AT-URI.
///
/// `at://did:plc:abc/app.bsky.feed.post/3k2x` → `Some("did:plc:abc")`.
/// Returns `None` for missing, empty or structurally invalid input and
/// never panics. The result is normalized.
pub fn did_from_uri(uri: Option<&str>) -> Option<String> {
    let uri = uri?.trim();
    // `get` rather than indexing: a multi-byte char may straddle the prefix
    let scheme = uri.get(..AT_URI_SCHEME.len())?;
    if !scheme.eq_ignore_ascii_case(AT_URI_SCHEME) {
        return None;
    }

    let rest = &uri[AT_URI_SCHEME.len()..];
    let authority = rest.split('/').next().unwrap_or_default().trim();
    if authority.is_empty() || authority.contains(char::is_whitespace) {
        return None;
    }

    Some(normalize_did(authority))
}

/// Build the AT-URI of a record from its parts.
pub fn record_uri(did: &str, collection: &str, record_key: &str) -> String {
    format!("{AT_URI_SCHEME}{did}/{collection}/{record_key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_did_trims_and_lowercases() {
        assert_eq!(normalize_did("  did:PLC:AbC123 \n"), "did:plc:abc123");
    }

    #[test]
    fn test_normalize_did_is_idempotent() {
        let inputs = [
            "did:plc:abc",
            "DID:PLC:ABC",
            "  did:web:Example.COM  ",
            "",
            "   ",
            "not a did at all",
            "did:plc:ÀÉÎ",
            "\tdid:key:zQ3sh\t",
        ];
        for input in inputs {
            let once = normalize_did(input);
            assert_eq!(normalize_did(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_same_did_ignores_case_and_whitespace() {
        assert!(same_did("did:plc:A", " did:plc:a"));
        assert!(!same_did("did:plc:a", "did:plc:b"));
    }

    #[test]
    fn test_looks_like_did() {
        assert!(looks_like_did("did:plc:abc"));
        assert!(looks_like_did("did:web:example.com"));
        assert!(!looks_like_did("did:plc:"));
        assert!(!looks_like_did("did:"));
        assert!(!looks_like_did("alice.bsky.social"));
        assert!(!looks_like_did(""));
    }

    #[test]
    fn test_did_from_uri_extracts_authority() {
        assert_eq!(
            did_from_uri(Some("at://did:plc:B/app.bsky.feed.post/xyz")),
            Some("did:plc:b".to_string())
        );
    }

    #[test]
    fn test_did_from_uri_authority_only() {
        assert_eq!(
            did_from_uri(Some("at://did:plc:abc")),
            Some("did:plc:abc".to_string())
        );
    }

    #[test]
    fn test_did_from_uri_rejects_invalid_input() {
        assert_eq!(did_from_uri(None), None);
        assert_eq!(did_from_uri(Some("")), None);
        assert_eq!(did_from_uri(Some("at://")), None);
        assert_eq!(did_from_uri(Some("at:///app.bsky.feed.post/x")), None);
        assert_eq!(did_from_uri(Some("https://bsky.app/profile/x")), None);
        assert_eq!(did_from_uri(Some("did:plc:abc")), None);
        assert_eq!(did_from_uri(Some("at:/")), None);
        assert_eq!(did_from_uri(Some("at://did plc/x/y")), None);
    }

    #[test]
    fn test_did_from_uri_handles_multibyte_input() {
        // Must not slice through a multi-byte character
        assert_eq!(did_from_uri(Some("é")), None);
        assert_eq!(did_from_uri(Some("ééééé")), None);
    }

    #[test]
    fn test_record_uri() {
        assert_eq!(
            record_uri("did:plc:a", "app.bsky.feed.post", "3k"),
            "at://did:plc:a/app.bsky.feed.post/3k"
        );
    }
}
