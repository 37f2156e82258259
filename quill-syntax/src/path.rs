//! Template path arithmetic. Paths are `/`-separated and rooted at the view
//! directory; they never escape it.

/// Normalize `path`: backslashes become `/`, `.` and empty segments are
/// dropped, `..` pops a segment (stopping at the root), and the result
/// always starts with `/`.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let path = path.replace('\\', "/");
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    let mut out = String::with_capacity(path.len() + 1);
    for part in &parts {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// The directory part of a normalized path.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Resolve `src` as referenced from the template at `referrer`. Absolute
/// references are taken from the view root, relative ones from the
/// referrer's directory.
pub fn resolve(referrer: &str, src: &str) -> String {
    let src = src.replace('\\', "/");
    if src.starts_with('/') {
        normalize(&src)
    } else {
        normalize(&format!("{}/{}", parent(&normalize(referrer)), src))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_segments() {
        assert_eq!(normalize("a/./b//c/../d"), "/a/b/d");
        assert_eq!(normalize("..\\..\\x"), "/x");
        assert_eq!(normalize(""), "/");
    }

    #[test]
    fn resolves_relative_to_referrer() {
        assert_eq!(resolve("/pages/index.html", "base"), "/pages/base");
        assert_eq!(resolve("/pages/index.html", "../shared/nav"), "/shared/nav");
        assert_eq!(resolve("/pages/index.html", "/base"), "/base");
        assert_eq!(resolve("/index", "partials/a.html"), "/partials/a.html");
    }
}
