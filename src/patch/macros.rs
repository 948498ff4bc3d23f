// Macro override preprocessing
//
// Only lines whose first token is `#define` are candidates. The value of a
// matching line runs from the name to a trailing `//` or `/*` comment, or to
// the end of the line, and is swapped as a whole. Every other byte of the
// source is kept, and no line is added or removed.

use std::collections::HashMap;

pub const DEFINE_DIRECTIVE: &str = "#define";

/// Byte span of the next whitespace-delimited token at or after `from`.
fn next_token(line: &str, from: usize) -> Option<(usize, usize)> {
    let rest = &line[from..];
    let start = from + rest.find(|c: char| !c.is_whitespace())?;
    let end = line[start..]
        .find(char::is_whitespace)
        .map_or(line.len(), |len| start + len);
    Some((start, end))
}

/// Rewrites one line, or returns `None` when it is not an overridden define.
fn override_line(line: &str, overrides: &HashMap<String, String>) -> Option<String> {
    let (d_start, d_end) = next_token(line, 0)?;
    if &line[d_start..d_end] != DEFINE_DIRECTIVE {
        return None;
    }
    let (n_start, n_end) = next_token(line, d_end)?;
    let value = overrides.get(&line[n_start..n_end])?;

    let body = line.trim_end_matches('\r');
    let comment = [body[n_end..].find("//"), body[n_end..].find("/*")]
        .into_iter()
        .flatten()
        .min()
        .map_or(body.len(), |at| n_end + at);
    let value_end = n_end + line[n_end..comment].trim_end().len();
    let value_start = value_end - line[n_end..value_end].trim_start().len();

    let rewritten = if value_start < value_end {
        format!("{}{}{}", &line[..value_start], value, &line[value_end..])
    } else if comment < body.len() {
        format!("{}{} {}", &line[..comment], value, &line[comment..])
    } else {
        format!("{} {}{}", &line[..value_end], value, &line[value_end..])
    };
    Some(rewritten)
}

/// Applies `overrides` to every `#define NAME VALUE` line of `source`.
pub fn apply_macro_overrides(source: &str, overrides: &HashMap<String, String>) -> String {
    if overrides.is_empty() {
        return source.to_owned();
    }
    source
        .split('\n')
        .map(|line| match override_line(line, overrides) {
            Some(rewritten) => {
                log::debug!("macro override: '{}' -> '{}'", line.trim_end(), rewritten.trim_end());
                rewritten
            }
            None => line.to_owned(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
