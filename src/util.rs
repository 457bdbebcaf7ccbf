use std::iter::repeat;
use std::path::{Path, PathBuf};

pub fn find_first_subpath<P: AsRef<Path>, F: Fn(&Path) -> bool>(
    root: impl AsRef<Path>,
    subpaths: &[P],
    search: F,
) -> Option<PathBuf> {
    subpaths
        .iter()
        .zip(repeat(root.as_ref()))
        .map(|(b, a)| a.join(b))
        .find(|it: &PathBuf| search(it))
}

/// Returns the last path component of an uploaded file name, regardless of
/// which separator the client used.
pub fn file_basename(value: &str) -> &str {
    value
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(value)
}

/// Checks a string field's length in characters, producing the reason it failed.
pub fn check_len(value: &str, min: usize, max: usize) -> Result<(), String> {
    if value.trim().chars().count() < min {
        if min <= 1 {
            return Err("Field is required.".to_string());
        }
        return Err(format!("Must be at least {} characters long.", min));
    }
    if value.chars().count() > max {
        return Err(format!("Can't be longer than {} characters.", max));
    }
    Ok(())
}

/// Encodes a number in lowercase base 36.
pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
