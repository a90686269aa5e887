use std::path::PathBuf;

use unicode_general_category::{get_general_category, GeneralCategory};

/// Roots of the virtual file system that compiled executables register their modules under.
const VIRTUAL_ROOTS: &[&str] = &["/$bunfs/", "B:\\~BUN\\", "B:/~BUN/"];

/// Characters that are replaced in path components since they are invalid on some platforms.
const RESERVED_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Maximum number of characters retained per path component.
pub const MAX_COMPONENT_LEN: usize = 200;

/// Returns `true` if the given character is any valid directory separator.
#[inline]
fn is_path_separator(c: char) -> bool {
    matches!(c, '\\' | '/')
}

/// Returns `true` for letters, marks, numbers, punctuation, symbols and the plain ASCII space.
///
/// Other separators, control and format characters, private use and unassigned code points are
/// not printable.
#[inline]
fn is_printable(c: char) -> bool {
    use GeneralCategory::*;

    c == ' '
        || !matches!(
            get_general_category(c),
            Control
                | Format
                | Unassigned
                | PrivateUse
                | Surrogate
                | SpaceSeparator
                | LineSeparator
                | ParagraphSeparator
        )
}

/// Strips a known virtual file system root from the start of a module path.
///
/// Only one root is stripped. Paths outside of the virtual file system are returned unchanged.
///
/// # Examples
///
/// ```
/// assert_eq!(bunexe_common::strip_virtual_root("/$bunfs/root/cli.js"), "root/cli.js");
/// assert_eq!(bunexe_common::strip_virtual_root("B:\\~BUN\\root\\cli.js"), "root\\cli.js");
/// assert_eq!(bunexe_common::strip_virtual_root("/usr/lib/cli.js"), "/usr/lib/cli.js");
/// ```
pub fn strip_virtual_root(path: &str) -> &str {
    VIRTUAL_ROOTS
        .iter()
        .find_map(|root| path.strip_prefix(root))
        .unwrap_or(path)
}

/// Removes leading separators and everything up to the first drive or scheme colon.
fn strip_drive_prefix(path: &str) -> &str {
    let path = path.trim_start_matches(is_path_separator);
    match path.find(':') {
        Some(index) => path[index + 1..].trim_start_matches(is_path_separator),
        None => path,
    }
}

/// Makes a single path component safe to create on any file system.
///
/// Control characters, non-printable characters and `\ / : * ? " < > |` are replaced with `_`.
/// Surrounding whitespace is trimmed and the result is capped at [`MAX_COMPONENT_LEN`]
/// characters.
///
/// # Examples
///
/// ```
/// assert_eq!(bunexe_common::sanitize_path_component(" a<b>\n.js "), "a_b__.js");
/// ```
pub fn sanitize_path_component(component: &str) -> String {
    let replaced: String = component
        .chars()
        .map(|c| {
            if !is_printable(c) || RESERVED_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let mut sanitized: String = replaced.trim().chars().take(MAX_COMPONENT_LEN).collect();
    let len = sanitized.trim_end().len();
    sanitized.truncate(len);
    sanitized
}

/// Splits a virtual module path into sanitized components.
///
/// Both `/` and `\` separate components. Empty components, as well as `.` and `..`, are dropped,
/// so the components can never address anything outside of the directory they are joined to.
pub fn virtual_path_components(path: &str) -> Vec<String> {
    strip_drive_prefix(strip_virtual_root(path))
        .split(is_path_separator)
        .map(sanitize_path_component)
        .filter(|component| !component.is_empty() && component != "." && component != "..")
        .collect()
}

/// Converts a virtual module path into a relative file system path.
///
/// Returns `None` if no usable component remains, for instance for empty names.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use bunexe_common::sanitize_virtual_path;
///
/// assert_eq!(
///     sanitize_virtual_path("/$bunfs/root/src/index.js"),
///     Some(PathBuf::from("root/src/index.js"))
/// );
/// assert_eq!(
///     sanitize_virtual_path("C:\\Users\\dev\\app.ts"),
///     Some(PathBuf::from("Users/dev/app.ts"))
/// );
/// assert_eq!(sanitize_virtual_path("/../.."), None);
/// ```
pub fn sanitize_virtual_path(path: &str) -> Option<PathBuf> {
    let components = virtual_path_components(path);
    if components.is_empty() {
        None
    } else {
        Some(components.iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Component;

    use similar_asserts::assert_eq;

    #[test]
    fn test_strip_windows_root() {
        assert_eq!(
            virtual_path_components("B:\\~BUN\\root\\node_modules\\a.js"),
            vec!["root", "node_modules", "a.js"]
        );
        assert_eq!(virtual_path_components("B:/~BUN/root/a.js"), vec!["root", "a.js"]);
    }

    #[test]
    fn test_strip_drive_letter() {
        assert_eq!(
            virtual_path_components("\\\\D:\\work\\main.tsx"),
            vec!["work", "main.tsx"]
        );
        assert_eq!(
            virtual_path_components("file:///srv/app.js"),
            vec!["srv", "app.js"]
        );
    }

    #[test]
    fn test_parent_components_dropped() {
        assert_eq!(
            virtual_path_components("/$bunfs/../../etc/./passwd"),
            vec!["etc", "passwd"]
        );
        assert_eq!(virtual_path_components(" .. /x"), vec!["x"]);
        assert_eq!(virtual_path_components(".../x"), vec!["...", "x"]);
    }

    #[test]
    fn test_only_separators() {
        assert_eq!(sanitize_virtual_path("//\\\\/"), None);
        assert_eq!(sanitize_virtual_path(""), None);
        assert_eq!(sanitize_virtual_path("/$bunfs/"), None);
    }

    #[test]
    fn test_control_characters() {
        assert_eq!(sanitize_path_component("a\u{0}b\u{7f}c"), "a_b_c");
        assert_eq!(sanitize_path_component("tab\there"), "tab_here");
        assert_eq!(sanitize_path_component("nb\u{a0}sp"), "nb_sp");
        assert_eq!(sanitize_path_component("\r\n"), "__");
    }

    #[test]
    fn test_invisible_characters() {
        assert_eq!(sanitize_path_component("evil\u{202e}sj.exe"), "evil_sj.exe");
        assert_eq!(sanitize_path_component("a\u{200b}b.js"), "a_b.js");
        assert_eq!(sanitize_path_component("\u{feff}bom.js"), "_bom.js");
        assert_eq!(sanitize_path_component("x\u{378}y"), "x_y");
        assert_eq!(sanitize_path_component("p\u{e000}u"), "p_u");
        assert_eq!(sanitize_path_component("line\u{2028}sep"), "line_sep");
        assert_eq!(
            sanitize_path_component("caf\u{e9}\u{301} \u{1f600}"),
            "caf\u{e9}\u{301} \u{1f600}"
        );
    }

    #[test]
    fn test_reserved_characters() {
        assert_eq!(sanitize_path_component("a*b?c\"d|e"), "a_b_c_d_e");
    }

    #[test]
    fn test_component_cap() {
        let long = "é".repeat(300);
        let sanitized = sanitize_path_component(&long);
        assert_eq!(sanitized.chars().count(), MAX_COMPONENT_LEN);
    }

    #[test]
    fn test_never_escapes() {
        let inputs = [
            "../../../../etc/shadow",
            "..\\..\\windows\\system32",
            "/$bunfs/root/../../x",
            "C:..\\..\\y",
            "\u{1}..\u{1}/..",
            "B:\\~BUN\\..",
            "a/ ../b",
        ];

        for input in inputs {
            if let Some(path) = sanitize_virtual_path(input) {
                assert!(
                    path.components().all(|c| matches!(c, Component::Normal(_))),
                    "{input:?} produced {path:?}"
                );
            }
        }
    }
}
