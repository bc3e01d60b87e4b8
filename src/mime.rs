//! Media-range parsing and scoring for content negotiation.
//!
//! A media range is a media type where the type or subtype may be `*`, with
//! optional parameters and a `q` quality factor, as found in `Accept`
//! headers: `text/html;level=1;q=0.7`.

use std::cmp::Ordering;

/// The score of a media type that matches no candidate range.
///
pub const NO_MATCH: (i32, f32) = (-1, 0.0);

/// A parsed media range.
///
#[derive(Clone, Debug, PartialEq)]
pub struct MediaRange {
    pub mime_type: String,
    pub subtype: String,
    /// `(name, value)` pairs, excluding `q`, names lowercased.
    pub params: Vec<(String, String)>,
    /// The quality factor. Out-of-range or unparsable values fall back
    /// to `1.0`.
    pub q: f32,
}

impl MediaRange {
    /// Parse a single media range.
    ///
    /// A bare `*` is accepted as shorthand for `*/*`. A missing subtype
    /// defaults to `*`.
    ///
    pub fn parse(range: &str) -> Self {
        let mut parts = range.split(';');
        let full_type = parts.next().unwrap_or("").trim();
        let full_type = if full_type == "*" { "*/*" } else { full_type };
        let (mime_type, subtype) = match full_type.split_once('/') {
            Some((t, s)) => (t.trim(), s.trim()),
            None => (full_type, "*"),
        };
        let mut params = Vec::new();
        let mut q = 1.0f32;
        for param in parts {
            let mut nam_val = param.trim().splitn(2, '=');
            let nam = nam_val.next().unwrap_or("").trim().to_lowercase();
            let val = nam_val.next().map(|v| v.trim()).unwrap_or("");
            if nam.is_empty() {
                continue;
            }
            if nam == "q" {
                q = match val.parse::<f32>() {
                    Ok(v) if (0.0..=1.0).contains(&v) => v,
                    _ => 1.0,
                };
            } else {
                params.push((nam, val.to_string()));
            }
        }
        Self {
            mime_type: mime_type.to_lowercase(),
            subtype: subtype.to_lowercase(),
            params,
            q,
        }
    }

    /// Parse a comma-separated list of media ranges, e.g. the value of an
    /// `Accept` header.
    ///
    pub fn parse_header(header: &str) -> Vec<Self> {
        header
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Score `target` (a media type) against a list of candidate ranges.
///
/// Returns the `(fitness, quality)` of the best-fitting range. Fitness
/// rewards type specificity (an exact type match is worth more than a
/// wildcard) and matching parameters; quality is the range's `q` factor.
/// When no range matches, the [`NO_MATCH`] sentinel is returned.
///
pub fn fitness_and_quality(target: &str, ranges: &[MediaRange]) -> (i32, f32) {
    let target = MediaRange::parse(target);
    let mut best = NO_MATCH;
    for range in ranges {
        let type_match = range.mime_type == target.mime_type
            || range.mime_type == "*"
            || target.mime_type == "*";
        let subtype_match = range.subtype == target.subtype
            || range.subtype == "*"
            || target.subtype == "*";
        if !type_match || !subtype_match {
            continue;
        }
        let mut fitness = 0;
        if range.mime_type == target.mime_type {
            fitness += 100;
        }
        if range.subtype == target.subtype {
            fitness += 10;
        }
        fitness += target
            .params
            .iter()
            .filter(|(n, v)| range.param(n) == Some(v.as_str()))
            .count() as i32;
        if fitness > best.0 {
            best = (fitness, range.q);
        }
    }
    best
}

fn cmp_score(a: &(i32, f32), b: &(i32, f32)) -> Ordering {
    a.0.cmp(&b.0)
        .then(a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
}

/// Choose the best media type from `supported` for an `Accept` header.
///
/// `supported` must be given in ascending order of desirability; ties on
/// `(fitness, quality)` are broken in favor of the type declared later in
/// `supported`. Returns `None` when nothing matches with a quality above
/// zero.
///
pub fn best_match<'a, I>(supported: I, accept_header: &str) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let ranges = MediaRange::parse_header(accept_header);
    let mut best: Option<((i32, f32), &str)> = None;
    for mime_type in supported {
        let score = fitness_and_quality(mime_type, &ranges);
        let better = match &best {
            None => true,
            // >= so that later entries win ties
            Some((best_score, _)) => {
                cmp_score(&score, best_score) != Ordering::Less
            }
        };
        if better {
            best = Some((score, mime_type));
        }
    }
    best.filter(|((_, q), _)| *q > 0.0)
        .map(|(_, mime_type)| mime_type.to_string())
}
