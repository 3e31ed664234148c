//! Node path helpers
//!
//! Paths are absolute, slash separated, and never end with a slash except for
//! the tree root `/`.

/// Width of the zero-padded counter appended to sequential node names.
pub const SEQUENCE_WIDTH: usize = 10;

/// Join a parent path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Parent of `path`, or `None` for the tree root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of `path`.
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Check that `path` is a well-formed absolute node path.
pub fn validate(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err(format!("path '{}' must be absolute", path));
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(format!("path '{}' must not end with '/'", path));
    }
    if path[1..].split('/').any(str::is_empty) {
        return Err(format!("path '{}' contains an empty segment", path));
    }
    Ok(())
}

/// All proper ancestors of `path` below the tree root, outermost first,
/// followed by `path` itself.
///
/// `/app/locks` yields `["/app", "/app/locks"]`.
pub fn lineage(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        out.push(current.clone());
    }
    out
}

/// Render a sequence counter the way sequential node names carry it.
pub fn format_sequence(sequence: u64) -> String {
    format!("{:0width$}", sequence, width = SEQUENCE_WIDTH)
}

/// Extract the numeric sequence suffix from a child name created with `prefix`.
///
/// Returns `None` when the name does not start with `prefix` or the remainder
/// is not a non-empty run of ASCII digits. The value is compared numerically,
/// so suffixes of different widths still order correctly.
pub fn parse_sequence(name: &str, prefix: &str) -> Option<u64> {
    let suffix = name.strip_prefix(prefix)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_join_and_split() {
        assert_eq!(join("/", "locks"), "/locks");
        assert_eq!(join("/locks", "lock-0000000001"), "/locks/lock-0000000001");
        assert_eq!(parent("/locks/lock-1"), Some("/locks"));
        assert_eq!(parent("/locks"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(name("/locks/lock-1"), "lock-1");
        assert_eq!(name("/"), "");
    }

    #[test]
    fn test_validate() {
        assert!(validate("/").is_ok());
        assert!(validate("/locks").is_ok());
        assert!(validate("/app/locks").is_ok());
        assert!(validate("locks").is_err());
        assert!(validate("/locks/").is_err());
        assert!(validate("/app//locks").is_err());
    }

    #[test]
    fn test_lineage() {
        assert_eq!(lineage("/app/locks"), vec!["/app", "/app/locks"]);
        assert_eq!(lineage("/locks"), vec!["/locks"]);
        assert!(lineage("/").is_empty());
    }

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("lock-0000000042", "lock-"), Some(42));
        assert_eq!(parse_sequence("lock-7", "lock-"), Some(7));
        assert_eq!(parse_sequence("lock-", "lock-"), None);
        assert_eq!(parse_sequence("lock-12a", "lock-"), None);
        assert_eq!(parse_sequence("other-0001", "lock-"), None);
        assert_eq!(parse_sequence("lock--1", "lock-"), None);
    }

    #[test]
    fn test_format_sequence() {
        assert_eq!(format_sequence(1), "0000000001");
        assert_eq!(format_sequence(12345678901), "12345678901");
    }

    proptest! {
        #[test]
        fn numeric_order_survives_mixed_widths(a in 0u64..1_000_000, b in 0u64..1_000_000) {
            let narrow = format!("lock-{}", a);
            let padded = format!("lock-{}", format_sequence(b));
            let pa = parse_sequence(&narrow, "lock-").unwrap();
            let pb = parse_sequence(&padded, "lock-").unwrap();
            prop_assert_eq!(pa.cmp(&pb), a.cmp(&b));
        }
    }
}
