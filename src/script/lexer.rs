//! Script tokenizer

use crate::error::{Result, TesseraError};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Number(f64),
    Str(String),
    // keywords
    Let,
    If,
    Else,
    Return,
    True,
    False,
    Null,
    // punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Semi,
    Colon,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Not,
    And,
    Or,
}

/// Token with its byte offset in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub tok: Tok,
    pub pos: usize,
}

pub fn tokenize(name: &str, source: &str) -> Result<Vec<Spanned>> {
    let bytes = source.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    let err = |pos: usize, details: String| TesseraError::ScriptParse {
        name: name.to_string(),
        position: pos,
        details,
    };

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        // Line comment
        if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'_' | b'$')) {
                i += 1;
            }
            let word = &source[start..i];
            let tok = match word {
                "let" | "const" | "var" => Tok::Let,
                "if" => Tok::If,
                "else" => Tok::Else,
                "return" => Tok::Return,
                "true" => Tok::True,
                "false" => Tok::False,
                "null" | "undefined" => Tok::Null,
                _ => Tok::Ident(word.to_string()),
            };
            out.push(Spanned { tok, pos: start });
            continue;
        }

        if c.is_ascii_digit() {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            let text = &source[start..i];
            let number = text
                .parse::<f64>()
                .map_err(|_| err(start, format!("invalid number '{text}'")))?;
            out.push(Spanned {
                tok: Tok::Number(number),
                pos: start,
            });
            continue;
        }

        if c == b'"' || c == b'\'' || c == b'`' {
            let (text, end) = string_literal(source, start).ok_or_else(|| {
                err(start, "unterminated string".into())
            })?;
            out.push(Spanned {
                tok: Tok::Str(text),
                pos: start,
            });
            i = end;
            continue;
        }

        let two = bytes.get(i + 1).copied();
        let (tok, len) = match (c, two) {
            (b'=', Some(b'=')) if bytes.get(i + 2) == Some(&b'=') => (Tok::Eq, 3),
            (b'!', Some(b'=')) if bytes.get(i + 2) == Some(&b'=') => (Tok::Ne, 3),
            (b'=', Some(b'=')) => (Tok::Eq, 2),
            (b'!', Some(b'=')) => (Tok::Ne, 2),
            (b'<', Some(b'=')) => (Tok::Le, 2),
            (b'>', Some(b'=')) => (Tok::Ge, 2),
            (b'&', Some(b'&')) => (Tok::And, 2),
            (b'|', Some(b'|')) => (Tok::Or, 2),
            (b'(', _) => (Tok::LParen, 1),
            (b')', _) => (Tok::RParen, 1),
            (b'[', _) => (Tok::LBracket, 1),
            (b']', _) => (Tok::RBracket, 1),
            (b'{', _) => (Tok::LBrace, 1),
            (b'}', _) => (Tok::RBrace, 1),
            (b',', _) => (Tok::Comma, 1),
            (b'.', _) => (Tok::Dot, 1),
            (b';', _) => (Tok::Semi, 1),
            (b':', _) => (Tok::Colon, 1),
            (b'=', _) => (Tok::Assign, 1),
            (b'<', _) => (Tok::Lt, 1),
            (b'>', _) => (Tok::Gt, 1),
            (b'+', _) => (Tok::Plus, 1),
            (b'-', _) => (Tok::Minus, 1),
            (b'*', _) => (Tok::Star, 1),
            (b'/', _) => (Tok::Slash, 1),
            (b'%', _) => (Tok::Percent, 1),
            (b'!', _) => (Tok::Not, 1),
            _ => {
                let ch = source[start..].chars().next().unwrap_or('?');
                return Err(err(start, format!("unexpected character '{ch}'")));
            }
        };
        out.push(Spanned { tok, pos: start });
        i += len;
    }
    Ok(out)
}

/// Read a quoted literal starting at `start`; returns the text and the offset
/// just past the closing quote
fn string_literal(source: &str, start: usize) -> Option<(String, usize)> {
    let mut chars = source[start..].char_indices();
    let (_, quote) = chars.next()?;
    let mut text = String::new();
    while let Some((offset, ch)) = chars.next() {
        match ch {
            '\\' => {
                let (_, escaped) = chars.next()?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
            }
            c if c == quote => return Some((text, start + offset + c.len_utf8())),
            c => text.push(c),
        }
    }
    None
}

/// Free identifiers (not following a `.`), for node-reference discovery
pub fn free_identifiers(tokens: &[Spanned]) -> impl Iterator<Item = &str> {
    tokens.iter().enumerate().filter_map(|(i, t)| match &t.tok {
        Tok::Ident(name) if i == 0 || tokens[i - 1].tok != Tok::Dot => Some(name.as_str()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize("t", src).unwrap().into_iter().map(|s| s.tok).collect()
    }

    #[test]
    fn tokenizes_statement() {
        assert_eq!(
            toks("let n = data.count + 1; // bump"),
            vec![
                Tok::Let,
                Tok::Ident("n".into()),
                Tok::Assign,
                Tok::Ident("data".into()),
                Tok::Dot,
                Tok::Ident("count".into()),
                Tok::Plus,
                Tok::Number(1.0),
                Tok::Semi,
            ]
        );
    }

    #[test]
    fn strings_and_operators() {
        assert_eq!(
            toks(r#"'a\'b' === "c" && !x"#),
            vec![
                Tok::Str("a'b".into()),
                Tok::Eq,
                Tok::Str("c".into()),
                Tok::And,
                Tok::Not,
                Tok::Ident("x".into()),
            ]
        );
    }

    #[test]
    fn free_identifiers_skip_members() {
        let tokens = tokenize("t", "label.textContent = other_node.value").unwrap();
        let free: Vec<&str> = free_identifiers(&tokens).collect();
        assert_eq!(free, vec!["label", "other_node"]);
    }

    #[test]
    fn reports_unterminated_string() {
        let err = tokenize("broken", "let s = 'abc").unwrap_err();
        assert!(err.to_string().contains("TSR-040"));
        assert!(err.to_string().contains("broken"));
    }
}
