//! Header folding
//!
//! HTTP stacks hand us lowercased names and possibly repeated values. The
//! relay protocol carries one value per canonically-cased name, so both the
//! ingress and the local dispatcher fold headers through here.

use crate::protocol::Headers;

/// Transport-framing headers never relayed to the client
pub const FRAMING_HEADERS: &[&str] = &["Host", "Content-Length"];

/// Canonical MIME casing: `x-hub-signature` → `X-Hub-Signature`
pub fn canonical_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// Fold (name, value) pairs into a header mapping.
///
/// Names are canonicalized, the first value seen for a name wins, and any
/// name listed in `skip` (compared case-insensitively) is dropped.
pub fn fold<'a, I>(pairs: I, skip: &[&str]) -> Headers
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut headers = Headers::new();
    for (name, value) in pairs {
        if skip.iter().any(|s| s.eq_ignore_ascii_case(name)) {
            continue;
        }
        headers.entry(canonical_key(name)).or_insert_with(|| value.to_string());
    }
    headers
}
