//! HTML entity decoding
//!
//! Widget definitions may be delivered HTML-escaped (`&lt;div&gt;`). They are
//! decoded exactly once, when the definition is loaded.

use std::borrow::Cow;

/// Decode named (`&lt;` `&gt;` `&amp;` `&quot;` `&apos;` `&nbsp;`) and numeric
/// (`&#39;` `&#x27;`) character references
///
/// Unknown or malformed references are kept verbatim.
pub fn decode(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match tail.find(';').filter(|&end| end <= 10) {
            Some(end) => match reference(&tail[1..end]) {
                Some(ch) => {
                    out.push(ch);
                    rest = &tail[end + 1..];
                }
                None => {
                    out.push('&');
                    rest = &tail[1..];
                }
            },
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn reference(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let digits = name.strip_prefix('#')?;
            let code = match digits.strip_prefix(|c: char| c == 'x' || c == 'X') {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Escape text for inclusion in serialized markup
pub fn escape(input: &str, in_attribute: bool) -> Cow<'_, str> {
    let needs = |c: char| matches!(c, '&' | '<' | '>') || (in_attribute && c == '"');
    if !input.chars().any(needs) {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len() + 8);
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_escaped_markup() {
        assert_eq!(
            decode("&lt;div id=&quot;x&quot;&gt;a &amp; b&lt;/div&gt;"),
            "<div id=\"x\">a & b</div>"
        );
    }

    #[test]
    fn decodes_numeric_references() {
        assert_eq!(decode("it&#39;s &#x41;"), "it's A");
    }

    #[test]
    fn keeps_unknown_references() {
        assert_eq!(decode("a && b &bogus; c"), "a && b &bogus; c");
    }

    #[test]
    fn plain_input_is_borrowed() {
        assert!(matches!(decode("no entities"), Cow::Borrowed(_)));
    }

    #[test]
    fn escape_attribute_quotes_only_in_attributes() {
        assert_eq!(escape("a\"<b", true), "a&quot;&lt;b");
        assert_eq!(escape("a\"<b", false), "a\"&lt;b");
    }
}
