//! Parsing of raw `git ls-tree -l` output into tree listings.
//!
//! Each line has the shape
//! `<mode> <type> <object> <size>\t<name>` where `<size>` is `-` for
//! non-blobs.  Entry order is preserved from the git output.

use serde::Serialize;

use crate::error::{CacheError, Result};

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    /// 40-hex object id.
    pub hash: String,
    /// Listed directory joined with the entry name.
    pub path: String,
    /// `"blob"` or `"tree"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Byte length for blobs, 0 otherwise.
    pub size: u64,
}

/// Parse raw `ls-tree` output produced for `dir`.
///
/// Lines that do not match the expected shape are an error: the output comes
/// straight from git, so a malformed line means the invocation went wrong.
pub fn parse_ls_tree(dir: &str, raw: &[u8]) -> Result<Vec<TreeEntry>> {
    let text = String::from_utf8_lossy(raw);
    let dir = dir.trim_matches('/');

    let mut entries = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let (meta, name) = line.split_once('\t').ok_or_else(|| malformed(line))?;
        let mut fields = meta.split_whitespace();
        let _mode = fields.next().ok_or_else(|| malformed(line))?;
        let kind = fields.next().ok_or_else(|| malformed(line))?;
        let hash = fields.next().ok_or_else(|| malformed(line))?;
        let size_field = fields.next().ok_or_else(|| malformed(line))?;

        let size = match size_field {
            "-" => 0,
            s => s.parse::<u64>().map_err(|_| malformed(line))?,
        };

        let path = if dir.is_empty() {
            name.to_string()
        } else {
            format!("{dir}/{name}")
        };

        entries.push(TreeEntry {
            hash: hash.to_string(),
            path,
            kind: kind.to_string(),
            size,
        });
    }

    Ok(entries)
}

fn malformed(line: &str) -> CacheError {
    CacheError::ListTreeFailed {
        output: format!("malformed ls-tree line: {line}"),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_a_blob_line() {
        let raw = b"100644 blob 9c955c2818ec5a99e62966f8ad2bd0f8a5d3d487     100\tfile.txt";
        let entries = parse_ls_tree("folder", raw).unwrap();
        assert_eq!(
            entries,
            vec![TreeEntry {
                hash: "9c955c2818ec5a99e62966f8ad2bd0f8a5d3d487".to_string(),
                path: "folder/file.txt".to_string(),
                kind: "blob".to_string(),
                size: 100,
            }]
        );

        let json = serde_json::to_string(&entries).unwrap();
        assert_eq!(
            json,
            r#"[{"hash":"9c955c2818ec5a99e62966f8ad2bd0f8a5d3d487","path":"folder/file.txt","type":"blob","size":100}]"#
        );
    }

    #[test]
    fn trees_report_zero_size_and_order_is_preserved() {
        let raw = b"040000 tree 29ba47b07d262ad717095f2d94ffddcae3f3de02       -\tsub\n\
100644 blob 9c955c2818ec5a99e62966f8ad2bd0f8a5d3d487      12\ta.txt\n";
        let entries = parse_ls_tree("", raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, "tree");
        assert_eq!(entries[0].size, 0);
        assert_eq!(entries[0].path, "sub");
        assert_eq!(entries[1].path, "a.txt");
        assert_eq!(entries[1].size, 12);
    }

    #[test]
    fn names_with_spaces_survive() {
        let raw = b"100644 blob 9c955c2818ec5a99e62966f8ad2bd0f8a5d3d487      12\tmy file.txt";
        let entries = parse_ls_tree("docs", raw).unwrap();
        assert_eq!(entries[0].path, "docs/my file.txt");
    }

    #[test]
    fn empty_output_is_an_empty_listing() {
        assert!(parse_ls_tree("folder", b"").unwrap().is_empty());
    }

    #[test]
    fn malformed_lines_error() {
        assert!(parse_ls_tree("folder", b"garbage without a tab").is_err());
        assert!(parse_ls_tree("folder", b"100644 blob\tfile.txt").is_err());
    }
}
