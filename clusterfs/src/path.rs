//! Helpers for the `/` separated paths used inside an image.

pub const SEPARATOR: char = '/';

pub fn is_absolute(path: &str) -> bool {
    path.starts_with(SEPARATOR)
}

/// Non-empty components of `path`; repeated and trailing separators are ignored.
pub fn components(path: &str) -> impl DoubleEndedIterator<Item = &str> {
    path.split(SEPARATOR).filter(|c| !c.is_empty())
}

/// Splits `path` into the directory that holds its last component and that
/// component. Returns `None` when there is no last component, as for `/`.
///
/// ```text
/// "a/b/c" -> ("a/b", "c")
/// "/c"    -> ("/", "c")
/// "c"     -> (".", "c")
/// ```
pub fn split_last(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches(SEPARATOR);
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind(SEPARATOR) {
        Some(pos) => {
            let parent = trimmed[..pos].trim_end_matches(SEPARATOR);
            let parent = if parent.is_empty() { "/" } else { parent };
            Some((parent, &trimmed[pos + 1..]))
        }
        None => Some((".", trimmed)),
    }
}

/// Joins absolute path components.
pub fn join_absolute<'a, I: IntoIterator<Item = &'a str>>(names: I) -> String {
    let mut path = String::new();
    for name in names {
        path.push(SEPARATOR);
        path.push_str(name);
    }
    if path.is_empty() {
        path.push(SEPARATOR);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_ignore_empty_segments() {
        let parts: Vec<_> = components("//a///b/").collect();
        assert_eq!(parts, vec!["a", "b"]);
        assert_eq!(components("/").count(), 0);
    }

    #[test]
    fn split_last_finds_parent_and_name() {
        assert_eq!(split_last("a/b/c"), Some(("a/b", "c")));
        assert_eq!(split_last("/c"), Some(("/", "c")));
        assert_eq!(split_last("c"), Some((".", "c")));
        assert_eq!(split_last("a/b/"), Some(("a", "b")));
        assert_eq!(split_last("//x//y"), Some(("//x", "y")));
        assert_eq!(split_last("/"), None);
        assert_eq!(split_last(""), None);
    }

    #[test]
    fn join_builds_absolute_paths() {
        assert_eq!(join_absolute(vec![]), "/");
        assert_eq!(join_absolute(vec!["a", "b"]), "/a/b");
    }
}
