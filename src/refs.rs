use std::collections::BTreeMap;

pub const HEAD: &str = "HEAD";

/// Local branches.
pub const R_HEADS: &str = "refs/heads/";
/// Tags.
pub const R_TAGS: &str = "refs/tags/";
/// Snapshot of a branch at its last successful review upload.
pub const R_PUB: &str = "refs/published/";
/// Project-local pointer to the manifest-declared revision.
pub const R_M: &str = "refs/remotes/m/";

/// The all-zero object id, denoting "no object".
pub const NULL_OID: &str = "0000000000000000000000000000000000000000";

/// Is this a full 40-hex object id?
pub fn is_id(rev: &str) -> bool {
    rev.len() == 40 && rev.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Parse `for-each-ref --format='%(objectname) %(refname)'` output into an
/// ordered ref-name → object-id map.
pub fn parse_ref_lines(text: &str) -> Result<BTreeMap<String, String>, String> {
    let mut refs = BTreeMap::new();
    for line in text.lines() {
        let Some((id, name)) = line.split_once(' ') else {
            return Err(format!("malformed ref line: {line:?}"));
        };
        if id.is_empty() || name.is_empty() {
            return Err(format!("malformed ref line: {line:?}"));
        }
        refs.insert(name.to_string(), id.to_string());
    }
    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ref_lines() {
        let text = "\
1111111111111111111111111111111111111111 refs/heads/master
2222222222222222222222222222222222222222 refs/heads/topic
3333333333333333333333333333333333333333 refs/published/topic
";
        let refs = parse_ref_lines(text).unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(
            refs["refs/heads/master"],
            "1111111111111111111111111111111111111111"
        );
        assert_eq!(
            refs["refs/published/topic"],
            "3333333333333333333333333333333333333333"
        );
    }

    #[test]
    fn test_parse_ref_lines_empty() {
        assert!(parse_ref_lines("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_ref_lines_is_ordered_by_name() {
        let text = "\
2222222222222222222222222222222222222222 refs/tags/v1
1111111111111111111111111111111111111111 refs/heads/master
";
        let refs = parse_ref_lines(text).unwrap();
        let names: Vec<_> = refs.keys().cloned().collect();
        assert_eq!(names, vec!["refs/heads/master", "refs/tags/v1"]);
    }

    #[test]
    fn test_parse_ref_lines_malformed() {
        assert!(parse_ref_lines("not-a-ref-line").is_err());
    }

    #[test]
    fn test_is_id() {
        assert!(is_id("0123456789abcdef0123456789abcdef01234567"));
        assert!(is_id(NULL_OID));
        assert!(!is_id("refs/heads/master"));
        assert!(!is_id("0123456789ABCDEF0123456789ABCDEF01234567"));
        assert!(!is_id("abc123"));
    }
}
