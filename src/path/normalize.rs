//! Absolute-path segment normalization shared by [`super::truncate`].

use crate::errors::VprocError;

/// Linux `PATH_MAX`. The normalized output, and the anchor stack used to
/// back out `..` segments, are both bounded by this.
pub const PATH_MAX: usize = libc::PATH_MAX as usize;

/// Walks `input`'s segments and produces a normalized absolute path: empty
/// and `.` segments are dropped, `..` pops the previous pushed segment
/// (never going above `/`). Mirrors `pathTruncateNormalizeAbsolute`'s
/// anchor-stack approach, tracking the output length at each pushed
/// segment boundary so a `..` can truncate back to it directly instead of
/// re-walking the string.
pub fn normalize_absolute(input: &str) -> Result<String, VprocError> {
    debug_assert!(input.starts_with('/'));

    let mut anchors: Vec<usize> = vec![0];
    let mut out = String::from("/");

    for segment in input.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            if anchors.len() > 1 {
                let back_to = anchors.pop().unwrap();
                out.truncate(back_to);
            }
            continue;
        }

        anchors.push(out.len());
        if out.len() > 1 {
            out.push('/');
        }
        out.push_str(segment);

        if out.len() >= PATH_MAX {
            return Err(VprocError::NameTooLong);
        }
    }

    if out.is_empty() {
        out.push('/');
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_dot_and_empty_segments() {
        assert_eq!(normalize_absolute("/a//./b/").unwrap(), "/a/b");
    }

    #[test]
    fn dot_dot_backtracks() {
        assert_eq!(normalize_absolute("/a/b/../c").unwrap(), "/a/c");
    }

    #[test]
    fn dot_dot_above_root_is_noop() {
        assert_eq!(normalize_absolute("/../../a").unwrap(), "/a");
    }

    #[test]
    fn root_stays_root() {
        assert_eq!(normalize_absolute("/").unwrap(), "/");
        assert_eq!(normalize_absolute("/.").unwrap(), "/");
    }

    #[test]
    fn overlong_path_errors() {
        let long = format!("/{}", "a".repeat(PATH_MAX));
        assert!(matches!(
            normalize_absolute(&long),
            Err(VprocError::NameTooLong)
        ));
    }
}
