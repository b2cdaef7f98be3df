//! Decoding of number and string literal tokens.

use super::Number;
use crate::num::BigInt;

/// Parses the text of a NUMBER token.
pub(super) fn parse_number(text: &str) -> Result<Number, String> {
    let cleaned = text.replace('_', "");
    let lower = cleaned.to_ascii_lowercase();

    let radix = match lower.get(..2) {
        Some("0x") => Some(16),
        Some("0o") => Some(8),
        Some("0b") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return parse_int(&lower[2..], radix).ok_or_else(|| format!("invalid literal '{text}'"));
    }

    if lower.contains(['.', 'e']) {
        return lower
            .parse::<f64>()
            .map(Number::Float)
            .map_err(|_| format!("invalid float literal '{text}'"));
    }

    if lower.len() > 1 && lower.starts_with('0') && lower.bytes().any(|b| b != b'0') {
        return Err(
            "leading zeros in decimal integer literals are not permitted; use an 0o prefix for octal integers"
                .to_string(),
        );
    }
    parse_int(&lower, 10).ok_or_else(|| format!("invalid literal '{text}'"))
}

fn parse_int(digits: &str, radix: u32) -> Option<Number> {
    if let Ok(value) = i64::from_str_radix(digits, radix) {
        return Some(Number::Int(value));
    }
    BigInt::parse_radix(digits, radix).map(Number::Big)
}

/// Decodes one STRING token (prefix and quotes included).
pub(super) fn parse_string(text: &str) -> Result<String, String> {
    let prefix_len = text.find(['\'', '"']).unwrap_or(0);
    let prefix = text[..prefix_len].to_ascii_lowercase();
    let raw = prefix.contains('r');
    let rest = &text[prefix_len..];

    let quote_len = if rest.starts_with("'''") || rest.starts_with("\"\"\"") {
        3
    } else {
        1
    };
    if rest.len() < quote_len * 2 {
        return Err("malformed string literal".to_string());
    }
    let body = &rest[quote_len..rest.len() - quote_len];
    if raw {
        return Ok(body.to_string());
    }
    decode_escapes(body)
}

fn decode_escapes(body: &str) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let Some(escape) = chars.next() else {
            out.push('\\');
            break;
        };
        match escape {
            '\n' => {}
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut value = escape.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).ok_or("invalid octal escape")?);
            }
            'x' => out.push(hex_escape(&mut chars, 2, "\\xXX")?),
            'u' => out.push(hex_escape(&mut chars, 4, "\\uXXXX")?),
            'U' => out.push(hex_escape(&mut chars, 8, "\\UXXXXXXXX")?),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

fn hex_escape(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    digits: usize,
    form: &str,
) -> Result<char, String> {
    let mut value = 0u32;
    for _ in 0..digits {
        let digit = chars
            .next()
            .and_then(|c| c.to_digit(16))
            .ok_or_else(|| format!("(unicode error) truncated {form} escape"))?;
        value = value * 16 + digit;
    }
    char::from_u32(value).ok_or_else(|| "(unicode error) illegal Unicode character".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_promote_past_i64() {
        assert_eq!(parse_number("1_000"), Ok(Number::Int(1000)));
        assert_eq!(parse_number("0xff"), Ok(Number::Int(255)));
        assert_eq!(parse_number("0b101"), Ok(Number::Int(5)));
        match parse_number("18446744073709551616") {
            Ok(Number::Big(value)) => assert_eq!(value.to_string(), "18446744073709551616"),
            other => panic!("expected bignum, got {other:?}"),
        }
        assert!(parse_number("007").is_err());
        assert_eq!(parse_number("000"), Ok(Number::Int(0)));
    }

    #[test]
    fn floats() {
        assert_eq!(parse_number("1.5"), Ok(Number::Float(1.5)));
        assert_eq!(parse_number("1e3"), Ok(Number::Float(1000.0)));
        assert_eq!(parse_number(".25"), Ok(Number::Float(0.25)));
    }

    #[test]
    fn string_escapes_and_prefixes() {
        assert_eq!(parse_string(r"'a\tb\n'"), Ok("a\tb\n".to_string()));
        assert_eq!(parse_string(r"r'a\tb'"), Ok(r"a\tb".to_string()));
        assert_eq!(parse_string(r#""\x41é\101""#), Ok("AéA".to_string()));
        assert_eq!(parse_string("'''one\ntwo'''"), Ok("one\ntwo".to_string()));
        assert_eq!(parse_string(r"'\q'"), Ok(r"\q".to_string()));
        assert!(parse_string(r"'\x4'").is_err());
    }
}
