//! String builtins

use super::{null_if_any, text_of};
use crate::error::{Error, Result};
use crate::types::{TypeId, Value};

/// Code of the first character; 0 for an empty string
pub fn ascii(s: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&s], TypeId::Integer) {
        return Ok(null);
    }
    let text = text_of(&s)?;
    Ok(Value::integer(text.chars().next().map_or(0, |c| c as i32)))
}

/// Single-character string from a code point
pub fn chr(code: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&code], TypeId::Varchar) {
        return Ok(null);
    }
    let code = code.expect_i64()?;
    let c = u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| Error::out_of_range(format!("{code} is not a character code")))?;
    Ok(Value::varchar(c.to_string()))
}

/// Number of characters
pub fn char_length(s: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&s], TypeId::Integer) {
        return Ok(null);
    }
    Ok(Value::integer(text_of(&s)?.chars().count() as i32))
}

/// Number of bytes
pub fn octet_length(s: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&s], TypeId::Integer) {
        return Ok(null);
    }
    let len = match s.as_bytes() {
        Some(bytes) => bytes.len(),
        None => text_of(&s)?.len(),
    };
    Ok(Value::integer(len as i32))
}

/// Concatenation of two strings
pub fn concat(a: Value, b: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&a, &b], TypeId::Varchar) {
        return Ok(null);
    }
    let mut out = text_of(&a)?;
    out.push_str(&text_of(&b)?);
    Ok(Value::varchar(out))
}

/// Substring of `len` characters starting at the 1-based position `from`
///
/// Positions before the start shorten the result, as in SQL. A null `len`
/// takes the rest of the string.
pub fn substr(s: Value, from: Value, len: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&s, &from], TypeId::Varchar) {
        return Ok(null);
    }
    let chars: Vec<char> = text_of(&s)?.chars().collect();
    let from = from.expect_i64()?;
    let end = if len.is_null() {
        chars.len() as i64 + 1
    } else {
        let len = len.expect_i64()?;
        if len < 0 {
            return Err(Error::invalid_input("negative substring length not allowed"));
        }
        from.saturating_add(len)
    };
    let begin = from.max(1);
    let end = end.min(chars.len() as i64 + 1);
    if end <= begin {
        return Ok(Value::varchar(""));
    }
    let out: String = chars[(begin - 1) as usize..(end - 1) as usize].iter().collect();
    Ok(Value::varchar(out))
}

/// String repeated `n` times
pub fn repeat(s: Value, n: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&s, &n], TypeId::Varchar) {
        return Ok(null);
    }
    let n = n.expect_i64()?.max(0) as usize;
    Ok(Value::varchar(text_of(&s)?.repeat(n)))
}

/// Every occurrence of `from` replaced by `to`
pub fn replace(s: Value, from: Value, to: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&s, &from, &to], TypeId::Varchar) {
        return Ok(null);
    }
    let from = text_of(&from)?;
    let text = text_of(&s)?;
    if from.is_empty() {
        return Ok(Value::varchar(text));
    }
    Ok(Value::varchar(text.replace(&from, &text_of(&to)?)))
}

fn trim_with(
    s: Value,
    chars: Value,
    trim: impl for<'a> Fn(&'a str, &[char]) -> &'a str,
) -> Result<Value> {
    if let Some(null) = null_if_any(&[&s, &chars], TypeId::Varchar) {
        return Ok(null);
    }
    let set: Vec<char> = text_of(&chars)?.chars().collect();
    let text = text_of(&s)?;
    Ok(Value::varchar(trim(&text, &set)))
}

/// Leading characters from `chars` removed
pub fn ltrim(s: Value, chars: Value) -> Result<Value> {
    trim_with(s, chars, |t, set| t.trim_start_matches(set))
}

/// Trailing characters from `chars` removed
pub fn rtrim(s: Value, chars: Value) -> Result<Value> {
    trim_with(s, chars, |t, set| t.trim_end_matches(set))
}

/// Leading and trailing characters from `chars` removed
pub fn btrim(s: Value, chars: Value) -> Result<Value> {
    trim_with(s, chars, |t, set| t.trim_matches(set))
}

/// Leading and trailing spaces removed
pub fn trim(s: Value) -> Result<Value> {
    btrim(s, Value::varchar(" "))
}

/// Upper-cased text
pub fn upper(s: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&s], TypeId::Varchar) {
        return Ok(null);
    }
    Ok(Value::varchar(text_of(&s)?.to_uppercase()))
}

/// Lower-cased text
pub fn lower(s: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&s], TypeId::Varchar) {
        return Ok(null);
    }
    Ok(Value::varchar(text_of(&s)?.to_lowercase()))
}

/// SQL `LIKE`: `%` matches any run, `_` one character, `\` escapes
///
/// Matching ignores ASCII case.
pub fn like(s: Value, pattern: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&s, &pattern], TypeId::Boolean) {
        return Ok(null);
    }
    let text: Vec<char> = text_of(&s)?.chars().collect();
    let pattern: Vec<char> = text_of(&pattern)?.chars().collect();
    Ok(Value::boolean(like_match(&text, &pattern)))
}

fn like_match(text: &[char], pattern: &[char]) -> bool {
    let eq = |a: char, b: char| a.eq_ignore_ascii_case(&b);
    let (mut t, mut p) = (0, 0);
    // position after the last '%' and the text position it is retried from
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                p += 1;
                backtrack = Some((p, t));
                continue;
            }
            Some('\\') if p + 1 < pattern.len() && eq(pattern[p + 1], text[t]) => {
                p += 2;
                t += 1;
                continue;
            }
            Some('_') => {
                p += 1;
                t += 1;
                continue;
            }
            Some(&c) if c != '\\' && eq(c, text[t]) => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }
        match backtrack {
            Some((bp, bt)) => {
                p = bp;
                t = bt + 1;
                backtrack = Some((bp, bt + 1));
            }
            None => return false,
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Value {
        Value::varchar(text)
    }

    #[test]
    fn test_substr_positions() {
        assert_eq!(substr(s("hello"), Value::integer(2), Value::integer(3)).unwrap(), s("ell"));
        assert_eq!(substr(s("hello"), Value::integer(0), Value::integer(3)).unwrap(), s("he"));
        assert_eq!(substr(s("hello"), Value::integer(4), Value::null(TypeId::Integer)).unwrap(), s("lo"));
        assert_eq!(substr(s("hello"), Value::integer(9), Value::integer(2)).unwrap(), s(""));
        assert!(substr(s("x"), Value::integer(1), Value::integer(-1)).is_err());
    }

    #[test]
    fn test_trims() {
        assert_eq!(ltrim(s("xxabcxx"), s("x")).unwrap(), s("abcxx"));
        assert_eq!(rtrim(s("xxabcxx"), s("x")).unwrap(), s("xxabc"));
        assert_eq!(btrim(s("xyabcyx"), s("xy")).unwrap(), s("abc"));
        assert_eq!(trim(s("  a b  ")).unwrap(), s("a b"));
        assert_eq!(trim(s("   ")).unwrap(), s(""));
    }

    #[test]
    fn test_like_patterns() {
        let m = |t: &str, p: &str| like(s(t), s(p)).unwrap() == Value::boolean(true);
        assert!(m("hello", "h%o"));
        assert!(m("hello", "%"));
        assert!(m("hello", "_ello"));
        assert!(m("HeLLo", "hello"));
        assert!(m("a%b", "a\\%b"));
        assert!(!m("axb", "a\\%b"));
        assert!(!m("hello", "h%x"));
        assert!(m("mississippi", "%iss%pi"));
        assert!(!m("abc", "abcd"));
        assert!(like(s("x"), Value::null(TypeId::Varchar)).unwrap().is_null());
    }

    #[test]
    fn test_misc() {
        assert_eq!(ascii(s("A")).unwrap(), Value::integer(65));
        assert_eq!(ascii(s("")).unwrap(), Value::integer(0));
        assert_eq!(chr(Value::integer(66)).unwrap(), s("B"));
        assert_eq!(repeat(s("ab"), Value::integer(3)).unwrap(), s("ababab"));
        assert_eq!(replace(s("aXbX"), s("X"), s("--")).unwrap(), s("a--b--"));
        assert_eq!(char_length(s("héllo")).unwrap(), Value::integer(5));
        assert_eq!(octet_length(s("héllo")).unwrap(), Value::integer(6));
        assert_eq!(concat(s("a"), Value::integer(1)).unwrap(), s("a1"));
        assert!(concat(s("a"), Value::null(TypeId::Varchar)).unwrap().is_null());
        assert_eq!(upper(s("abc")).unwrap(), s("ABC"));
    }
}
