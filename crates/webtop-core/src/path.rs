//! Remote path utility
//!
//! Every remote path that enters the gateway goes through [`normalize`]
//! before it reaches the session. Joining, parent/basename and ancestor
//! tests all operate on normalized paths only, so a crafted `..` sequence
//! can never climb above `/`.

/// Normalize a remote path.
///
/// Resolves `.` and `..`, collapses repeated separators, drops a trailing
/// separator and forces exactly one leading separator. `..` at the root
/// stays at the root.
#[must_use]
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Join a child segment onto a directory and normalize the result.
#[must_use]
pub fn join(dir: &str, child: &str) -> String {
    normalize(&format!("{}/{}", dir, child))
}

/// Parent directory of a normalized path (`/` is its own parent).
#[must_use]
pub fn parent(path: &str) -> String {
    let path = normalize(path);
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Last component of a path, empty for `/`.
#[must_use]
pub fn basename(path: &str) -> String {
    let path = normalize(path);
    path.rsplit('/').next().unwrap_or_default().to_string()
}

/// Whether `ancestor` is `path` itself or one of its parent directories.
///
/// The comparison is component-wise: `/data` is not an ancestor of
/// `/database`.
#[must_use]
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    if ancestor == "/" {
        return true;
    }
    path == ancestor
        || path
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Path of `path` relative to `ancestor`.
///
/// A path equal to the ancestor maps to `"."`. Returns `None` when
/// `ancestor` is not an ancestor of `path`.
#[must_use]
pub fn relative_to(ancestor: &str, path: &str) -> Option<String> {
    if !is_ancestor(ancestor, path) {
        return None;
    }
    if path == ancestor {
        return Some(".".to_string());
    }
    let rest = if ancestor == "/" {
        &path[1..]
    } else {
        &path[ancestor.len() + 1..]
    };
    if rest.is_empty() {
        Some(".".to_string())
    } else {
        Some(rest.to_string())
    }
}

/// Strip any directory prefix from a client-supplied file name.
///
/// Both `/` and `\` count as separators. Returns `None` when nothing
/// usable is left.
#[must_use]
pub fn sanitize_filename(name: &str) -> Option<String> {
    let clean = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if clean.is_empty() || clean == "." || clean == ".." {
        None
    } else {
        Some(clean.to_string())
    }
}

/// Quote an argument for a POSIX shell.
#[must_use]
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_dot_dot() {
        assert_eq!(normalize("/a/b/../c"), "/a/c");
    }

    #[test]
    fn test_normalize_repeated_separators() {
        assert_eq!(normalize("/a//b/./c/"), "/a/b/c");
    }

    #[test]
    fn test_normalize_never_escapes_root() {
        assert_eq!(normalize(".."), "/");
        assert_eq!(normalize("/../../etc/passwd"), "/etc/passwd");
        assert_eq!(normalize("/srv/../../.."), "/");
    }

    #[test]
    fn test_normalize_forces_leading_separator() {
        assert_eq!(normalize("home/user"), "/home/user");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("."), "/");
    }

    #[test]
    fn test_normalize_idempotent() {
        let samples = [
            "",
            "/",
            "..",
            "a/b/c",
            "/a/b/../../..",
            "//x//y/./z/",
            "/srv/../srv/./data//",
            "/with space/ünïcode/..",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/srv", "file.txt"), "/srv/file.txt");
        assert_eq!(join("/", "file.txt"), "/file.txt");
        assert_eq!(join("/srv/", "../etc"), "/etc");
    }

    #[test]
    fn test_parent_and_basename() {
        assert_eq!(parent("/data/a.txt"), "/data");
        assert_eq!(parent("/data"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(basename("/data/a.txt"), "a.txt");
        assert_eq!(basename("/"), "");
    }

    #[test]
    fn test_is_ancestor_component_wise() {
        assert!(is_ancestor("/data", "/data/a.txt"));
        assert!(is_ancestor("/data", "/data"));
        assert!(is_ancestor("/", "/anything"));
        assert!(!is_ancestor("/data", "/database"));
        assert!(!is_ancestor("/data/sub", "/data"));
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(relative_to("/data", "/data/sub/b.txt").as_deref(), Some("sub/b.txt"));
        assert_eq!(relative_to("/data", "/data").as_deref(), Some("."));
        assert_eq!(relative_to("/", "/etc").as_deref(), Some("etc"));
        assert_eq!(relative_to("/", "/").as_deref(), Some("."));
        assert_eq!(relative_to("/data", "/other"), None);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename(r"C:\Users\me\notes.txt").as_deref(), Some("notes.txt"));
        assert_eq!(sanitize_filename("dir/"), None);
        assert_eq!(sanitize_filename(".."), None);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
