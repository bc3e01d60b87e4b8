//! Compilation of URL templates into path matchers and path builders.
//!
//! A template is a path string with three kinds of markup:
//!
//! `{name}` or `{name:range}`
//!   : A named parameter. Whatever matches this part of the path is
//!     captured under `name`. The optional `range` names an entry in the
//!     range table restricting the characters the parameter can match; the
//!     default is `segment`.
//!
//! `[ ... ]`
//!   : An optional part. Brackets nest and can contain named parameters.
//!
//! `|`
//!   : May only appear as the last character and makes the template match
//!     a prefix of the path instead of the whole path, leaving the rest
//!     for nested dispatch.

use crate::Error;
use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use std::collections::HashMap;

/// Characters preserved when escaping a parameter value into a path.
const PATH_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/')
    .remove(b':')
    .remove(b';');

const DEFAULT_PATTERN: &str = "[^/]+";

/// The built-in ranges.
///
pub fn default_ranges() -> HashMap<String, String> {
    [
        ("word", r"\w+"),
        ("alpha", "[a-zA-Z]+"),
        ("digits", r"\d+"),
        ("alnum", "[a-zA-Z0-9]+"),
        ("segment", "[^/]+"),
        ("unreserved", r"[a-zA-Z\d\-._~]+"),
        ("any", ".+"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn check_bar(template: &str) -> Result<(), Error> {
    if let Some(pos) = template.find('|') {
        if pos != template.len() - 1 {
            return Err(Error::template(format!(
                "'|' may only appear at the end, found at position {} in {}",
                pos, template
            )));
        }
    }
    Ok(())
}

// Splits "name:range" and resolves the range pattern.
fn resolve_param<'a>(
    raw: &'a str,
    ranges: &'a HashMap<String, String>,
    template: &str,
) -> Result<(&'a str, &'a str), Error> {
    let (name, rangename) = match raw.split_once(':') {
        Some((name, rangename)) => (name, Some(rangename)),
        None => (raw, None),
    };
    if name.is_empty() {
        return Err(Error::template(format!(
            "empty parameter name in {}",
            template
        )));
    }
    let pattern = match rangename {
        None => DEFAULT_PATTERN,
        Some(rangename) => ranges.get(rangename).map(|s| s.as_str()).ok_or_else(
            || {
                Error::template(format!(
                    "unknown range '{}' in {}",
                    rangename, template
                ))
            },
        )?,
    };
    Ok((name, pattern))
}

/// Convert a URL template to a regular expression.
///
/// Returns the regex source and the list of parameter names found in the
/// template, in order of appearance. The regex is always anchored at the
/// start; it is anchored at the end unless the template ends with `|`.
/// ```
/// let ranges = rhino::template::default_ranges();
/// assert_eq!(
///     rhino::template::template_to_regex("{fred}", &ranges).unwrap(),
///     ("^(?P<fred>[^/]+)$".to_string(), vec!["fred".to_string()]),
/// );
/// ```
pub fn template_to_regex(
    template: &str,
    ranges: &HashMap<String, String>,
) -> Result<(String, Vec<String>), Error> {
    check_bar(template)?;
    let anchor = !template.ends_with('|');
    let mut result = String::from("^");
    let mut params = Vec::new();
    let mut depth = 0usize;
    let mut in_template = false;
    let mut name = String::new();

    for c in template.chars() {
        if in_template {
            if c == '}' {
                let (param, pattern) = resolve_param(&name, ranges, template)?;
                result.push_str(&format!("(?P<{}>{})", param, pattern));
                params.push(param.to_string());
                in_template = false;
            } else {
                name.push(c);
            }
        } else {
            match c {
                '[' => {
                    result.push_str("(?:");
                    depth += 1;
                }
                ']' => {
                    if depth == 0 {
                        return Err(Error::template(format!(
                            "mismatched brackets in {}",
                            template
                        )));
                    }
                    depth -= 1;
                    result.push_str(")?");
                }
                '{' => {
                    name.clear();
                    in_template = true;
                }
                '}' => {
                    return Err(Error::template(format!(
                        "mismatched braces in {}",
                        template
                    )))
                }
                '|' => {}
                _ => result.push_str(&regex::escape(&c.to_string())),
            }
        }
    }
    if depth != 0 {
        return Err(Error::template(format!(
            "mismatched brackets in {}",
            template
        )));
    }
    if in_template {
        return Err(Error::template(format!(
            "mismatched braces in {}",
            template
        )));
    }
    if anchor {
        result.push('$');
    }
    Ok((result, params))
}

// The conversion can be handling plain path characters, collecting a
// parameter name inside {}, or skipping an unsatisfied optional [] block.
enum State {
    Path,
    Template,
    Skip,
}

/// Convert a template and a map of parameters to a path fragment.
///
/// Parameter values are percent-escaped (preserving `/`, `:` and `;`) and
/// then validated against their range. Unused parameters are ignored.
///
/// Optional `[]` blocks are skipped unless they contain at least one
/// parameter and all parameters needed to fill the block (including nested
/// blocks) are present in `params`. A missing parameter outside any
/// optional block is an argument error.
/// ```
/// let ranges = rhino::template::default_ranges();
/// let params = [("name".to_string(), "fred".to_string())].into();
/// assert_eq!(
///     rhino::template::template_to_path("/{name}", &params, &ranges)
///         .unwrap(),
///     "/fred",
/// );
/// ```
pub fn template_to_path(
    template: &str,
    params: &HashMap<String, String>,
    ranges: &HashMap<String, String>,
) -> Result<String, Error> {
    check_bar(template)?;

    // Stack of path components, one level per open '[' block. On ']' the
    // level is merged into its parent if a parameter was supplied at that
    // level (directly or nested), discarded otherwise.
    let mut stack: Vec<Vec<String>> = vec![Vec::new()];
    let mut seen_name = vec![false];
    let mut depth = 0usize;
    let mut skip_to_depth = 0usize;
    let mut state = State::Path;
    let mut name = String::new();

    for c in template.chars() {
        match state {
            State::Path => match c {
                '[' => {
                    depth += 1;
                    stack.push(Vec::new());
                    seen_name.push(false);
                }
                ']' => {
                    if depth == 0 {
                        return Err(Error::template(format!(
                            "mismatched brackets in {}",
                            template
                        )));
                    }
                    depth -= 1;
                    let last = stack.pop().unwrap_or_default();
                    if seen_name.pop().unwrap_or(false) {
                        if let Some(parent) = stack.last_mut() {
                            parent.extend(last);
                        }
                        if let Some(flag) = seen_name.last_mut() {
                            *flag = true;
                        }
                    }
                }
                '{' => {
                    name.clear();
                    state = State::Template;
                }
                '}' => {
                    return Err(Error::template(format!(
                        "mismatched braces in {}",
                        template
                    )))
                }
                '|' => {}
                _ => {
                    if let Some(level) = stack.last_mut() {
                        level.push(c.to_string());
                    }
                }
            },
            State::Skip => match c {
                '[' => {
                    depth += 1;
                    seen_name.push(false);
                }
                ']' => {
                    if depth == skip_to_depth {
                        stack.pop();
                        skip_to_depth = 0;
                        state = State::Path;
                    }
                    depth = depth.saturating_sub(1);
                    seen_name.pop();
                }
                _ => {}
            },
            State::Template => {
                if c == '}' {
                    let (pname, pattern) =
                        resolve_param(&name, ranges, template)?;
                    if let Some(flag) = seen_name.get_mut(depth) {
                        *flag = true;
                    }
                    match params.get(pname) {
                        None if depth > 0 => {
                            // A parameter is missing, but we're inside a
                            // '[]' block: discard everything up to the end
                            // of the current block.
                            skip_to_depth = depth;
                            state = State::Skip;
                        }
                        None => {
                            return Err(Error::argument(format!(
                                "missing parameter '{}' in {}",
                                pname, template
                            )));
                        }
                        Some(value) => {
                            let value =
                                percent_encode(value.as_bytes(), PATH_SAFE)
                                    .to_string();
                            let check = Regex::new(&format!(
                                "^(?:{})$",
                                pattern
                            ))
                            .map_err(|e| {
                                Error::template(format!(
                                    "bad range pattern '{}': {}",
                                    pattern, e
                                ))
                            })?;
                            if !check.is_match(&value) {
                                return Err(Error::argument(format!(
                                    "value '{}' for parameter '{}' does not \
                                     match '^{}$' in {}",
                                    value, pname, pattern, template
                                )));
                            }
                            if let Some(level) = stack.last_mut() {
                                level.push(value);
                            }
                            state = State::Path;
                        }
                    }
                } else {
                    name.push(c);
                }
            }
        }
    }
    if depth != 0 {
        return Err(Error::template(format!(
            "mismatched brackets in {}",
            template
        )));
    }
    if matches!(state, State::Template) {
        return Err(Error::template(format!(
            "mismatched braces in {}",
            template
        )));
    }
    Ok(stack.concat().concat())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_regex_simple() {
        let ranges = default_ranges();
        assert_eq!(
            template_to_regex("{fred}", &ranges).unwrap(),
            ("^(?P<fred>[^/]+)$".to_string(), vec!["fred".to_string()]),
        );
        assert_eq!(
            template_to_regex("/user/{id:alpha}", &ranges).unwrap().0,
            "^/user/(?P<id>[a-zA-Z]+)$",
        );
    }

    #[test]
    fn test_regex_empty_and_bare_prefix() {
        let ranges = default_ranges();
        assert_eq!(template_to_regex("", &ranges).unwrap().0, "^$");
        assert_eq!(template_to_regex("|", &ranges).unwrap().0, "^");
    }

    #[test]
    fn test_regex_optional_groups() {
        let ranges = default_ranges();
        let (source, params) =
            template_to_regex("/a[/{b}[/{c}]]", &ranges).unwrap();
        assert_eq!(
            source,
            "^/a(?:/(?P<b>[^/]+)(?:/(?P<c>[^/]+))?)?$",
        );
        assert_eq!(params, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_regex_prefix_not_anchored() {
        let ranges = default_ranges();
        assert_eq!(template_to_regex("/foo|", &ranges).unwrap().0, "^/foo");
    }

    #[test]
    fn test_regex_escapes_literals() {
        let ranges = default_ranges();
        let (source, _) = template_to_regex("/a.b", &ranges).unwrap();
        assert_eq!(source, r"^/a\.b$");
    }

    #[test]
    fn test_regex_errors() {
        let ranges = default_ranges();
        assert!(template_to_regex("/a[", &ranges).is_err());
        assert!(template_to_regex("/a]", &ranges).is_err());
        assert!(template_to_regex("/a{x", &ranges).is_err());
        assert!(template_to_regex("/a}", &ranges).is_err());
        assert!(template_to_regex("/a|/b", &ranges).is_err());
        assert!(template_to_regex("/{x:nosuch}", &ranges).is_err());
        assert!(template_to_regex("/{}", &ranges).is_err());
    }

    #[test]
    fn test_path_simple() {
        let ranges = default_ranges();
        assert_eq!(
            template_to_path("/{name}", &params(&[("name", "fred")]), &ranges)
                .unwrap(),
            "/fred",
        );
        assert_eq!(
            template_to_path("", &params(&[]), &ranges).unwrap(),
            "",
        );
    }

    #[test]
    fn test_path_escapes_values() {
        let ranges = default_ranges();
        assert_eq!(
            template_to_path(
                "/{q:any}",
                &params(&[("q", "a b/c:d")]),
                &ranges,
            )
            .unwrap(),
            "/a%20b/c:d",
        );
    }

    #[test]
    fn test_path_optional_blocks() {
        let ranges = default_ranges();
        let template = "/users/{id:digits}[/page/{page:digits}]";
        assert_eq!(
            template_to_path(template, &params(&[("id", "7")]), &ranges)
                .unwrap(),
            "/users/7",
        );
        assert_eq!(
            template_to_path(
                template,
                &params(&[("id", "7"), ("page", "2")]),
                &ranges,
            )
            .unwrap(),
            "/users/7/page/2",
        );
    }

    #[test]
    fn test_path_paramless_block_is_dropped() {
        let ranges = default_ranges();
        assert_eq!(
            template_to_path(
                "/users/{id:digits}[/edit]",
                &params(&[("id", "7")]),
                &ranges,
            )
            .unwrap(),
            "/users/7",
        );
    }

    #[test]
    fn test_path_nested_blocks() {
        let ranges = default_ranges();
        let template = "/a[/{b}[/{c}]]";
        assert_eq!(
            template_to_path(template, &params(&[]), &ranges).unwrap(),
            "/a",
        );
        assert_eq!(
            template_to_path(template, &params(&[("b", "1")]), &ranges)
                .unwrap(),
            "/a/1",
        );
        assert_eq!(
            template_to_path(
                template,
                &params(&[("b", "1"), ("c", "2")]),
                &ranges,
            )
            .unwrap(),
            "/a/1/2",
        );
        // The inner block alone cannot satisfy the outer one.
        assert_eq!(
            template_to_path(template, &params(&[("c", "2")]), &ranges)
                .unwrap(),
            "/a",
        );
    }

    #[test]
    fn test_path_missing_parameter() {
        let ranges = default_ranges();
        assert!(matches!(
            template_to_path("/{name}", &params(&[]), &ranges),
            Err(Error::Argument(_)),
        ));
    }

    #[test]
    fn test_path_range_violation() {
        let ranges = default_ranges();
        assert!(matches!(
            template_to_path(
                "/{id:digits}",
                &params(&[("id", "abc")]),
                &ranges,
            ),
            Err(Error::Argument(_)),
        ));
    }

    #[test]
    fn test_path_ignores_unused_parameters() {
        let ranges = default_ranges();
        assert_eq!(
            template_to_path(
                "/{a}",
                &params(&[("a", "x"), ("b", "y")]),
                &ranges,
            )
            .unwrap(),
            "/x",
        );
    }
}
