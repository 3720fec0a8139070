use std::collections::BTreeMap;

use serde::Serialize;

/// One record of a `diff-index`/`diff-files` listing.
///
/// `status` is the one-letter state (`M`/`A`/`D`/`R`/`C`/`T`/`U`);
/// `level` is the similarity score for renames and copies, leading zeros
/// stripped. Renames and copies carry the source in `src_path` and the
/// destination in `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub path: String,
    pub src_path: Option<String>,
    pub old_mode: String,
    pub new_mode: String,
    pub old_id: String,
    pub new_id: String,
    pub status: char,
    pub level: Option<String>,
}

/// Parse the NUL-delimited output of `diff-index -z` / `diff-files -z`
/// into a path → entry map.
///
/// The stream alternates info fields (`:old_mode new_mode old_id new_id
/// status`) and paths; `R`/`C` records consume a second path field for
/// the destination.
pub fn parse_diff_z(text: &str) -> Result<BTreeMap<String, DiffEntry>, String> {
    let mut entries = BTreeMap::new();
    if text.is_empty() {
        return Ok(entries);
    }

    let text = text.strip_suffix('\0').unwrap_or(text);
    let mut fields = text.split('\0');

    while let Some(info) = fields.next() {
        let Some(path) = fields.next() else {
            break;
        };

        let info = info
            .strip_prefix(':')
            .ok_or_else(|| format!("malformed diff record: {info:?}"))?;
        let mut parts = info.split(' ');
        let (Some(old_mode), Some(new_mode), Some(old_id), Some(new_id), Some(state)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(format!("truncated diff record: {info:?}"));
        };

        let mut chars = state.chars();
        let status = chars
            .next()
            .ok_or_else(|| format!("empty status in diff record: {info:?}"))?;
        let level = match chars.as_str() {
            "" => None,
            score => Some(score.trim_start_matches('0').to_string()),
        };

        let (src_path, path) = if status == 'R' || status == 'C' {
            let dest = fields
                .next()
                .ok_or_else(|| format!("{status} record for {path:?} missing destination path"))?;
            (Some(path.to_string()), dest.to_string())
        } else {
            (None, path.to_string())
        };

        entries.insert(
            path.clone(),
            DiffEntry {
                path,
                src_path,
                old_mode: old_mode.to_string(),
                new_mode: new_mode.to_string(),
                old_id: old_id.to_string(),
                new_id: new_id.to_string(),
                status,
                level,
            },
        );
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OID_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const OID_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn record(info: &str, paths: &[&str]) -> String {
        let mut s = format!("{info}\0");
        for p in paths {
            s.push_str(p);
            s.push('\0');
        }
        s
    }

    #[test]
    fn test_parse_modified() {
        let text = record(&format!(":100644 100644 {OID_A} {OID_B} M"), &["src/main.c"]);
        let entries = parse_diff_z(&text).unwrap();
        let e = &entries["src/main.c"];
        assert_eq!(e.status, 'M');
        assert_eq!(e.old_mode, "100644");
        assert_eq!(e.new_mode, "100644");
        assert_eq!(e.old_id, OID_A);
        assert_eq!(e.new_id, OID_B);
        assert_eq!(e.level, None);
        assert_eq!(e.src_path, None);
    }

    #[test]
    fn test_parse_added_and_deleted() {
        let zero = "0000000000000000000000000000000000000000";
        let text = format!(
            "{}{}",
            record(&format!(":000000 100644 {zero} {OID_A} A"), &["new.c"]),
            record(&format!(":100644 000000 {OID_B} {zero} D"), &["gone.c"]),
        );
        let entries = parse_diff_z(&text).unwrap();
        assert_eq!(entries["new.c"].status, 'A');
        assert_eq!(entries["gone.c"].status, 'D');
    }

    #[test]
    fn test_parse_rename_consumes_two_paths() {
        let text = record(
            &format!(":100644 100644 {OID_A} {OID_B} R086"),
            &["old/name.c", "new/name.c"],
        );
        let entries = parse_diff_z(&text).unwrap();
        let e = &entries["new/name.c"];
        assert_eq!(e.status, 'R');
        assert_eq!(e.src_path.as_deref(), Some("old/name.c"));
        assert_eq!(e.level.as_deref(), Some("86"));
    }

    #[test]
    fn test_parse_copy_level_without_leading_zeros() {
        let text = record(
            &format!(":100644 100644 {OID_A} {OID_B} C100"),
            &["a.c", "b.c"],
        );
        let entries = parse_diff_z(&text).unwrap();
        assert_eq!(entries["b.c"].level.as_deref(), Some("100"));
    }

    #[test]
    fn test_parse_type_change() {
        let text = record(&format!(":100644 120000 {OID_A} {OID_B} T"), &["link"]);
        let entries = parse_diff_z(&text).unwrap();
        assert_eq!(entries["link"].status, 'T');
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_diff_z("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rename_missing_destination_is_error() {
        let text = format!(":100644 100644 {OID_A} {OID_B} R090\0only-one-path");
        assert!(parse_diff_z(&text).is_err());
    }

    #[test]
    fn test_parse_multiple_records() {
        let text = format!(
            "{}{}",
            record(&format!(":100644 100644 {OID_A} {OID_B} M"), &["b.c"]),
            record(&format!(":100644 100644 {OID_B} {OID_A} U"), &["a.c"]),
        );
        let entries = parse_diff_z(&text).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["a.c"].status, 'U');
    }
}
