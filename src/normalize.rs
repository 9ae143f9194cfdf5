//! Output normalization.

/// Canonicalize captured output before comparison.
///
/// `\r\n` and lone `\r` become `\n`, then exactly one trailing `\n` is
/// removed. Everything else, including further trailing blank lines and
/// interior whitespace, is kept: the interpreter's formatting is part of what
/// is being tested.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    if out.ends_with('\n') {
        out.pop();
    }
    out
}
