//! Shell-style argument splitting.
//!
//! Whitespace separates tokens. Single quotes keep their content literally.
//! Double quotes group words and honour `\"` and `\\`. Outside quotes a
//! backslash takes the next character literally.

use crate::error::CommandError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Split `input` into tokens.
///
/// # Errors
///
/// Returns [`CommandError::InvalidArgument`] for an unterminated quote.
pub fn tokenize(input: &str) -> Result<Vec<String>, CommandError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    // Distinguishes `""` (an empty token) from no token at all.
    let mut in_token = false;
    let mut quote = Quote::None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Quote::None, c) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (Quote::None, '\'') => {
                quote = Quote::Single;
                in_token = true;
            }
            (Quote::None, '"') => {
                quote = Quote::Double;
                in_token = true;
            }
            (Quote::None, '\\') => {
                current.push(chars.next().unwrap_or('\\'));
                in_token = true;
            }
            (Quote::Single, '\'') | (Quote::Double, '"') => quote = Quote::None,
            (Quote::Double, '\\') => match chars.next() {
                Some(escaped @ ('"' | '\\')) => current.push(escaped),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            (_, c) => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quote != Quote::None {
        return Err(CommandError::invalid("unterminated quote"));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_runs_of_whitespace() {
        assert_eq!(
            tokenize("  warn   123\tspam ").unwrap(),
            vec!["warn", "123", "spam"]
        );
        assert!(tokenize("   ").unwrap().is_empty());
    }

    #[test]
    fn quotes_group_words() {
        assert_eq!(
            tokenize(r#"warn 123 "posting spam" 'twice now'"#).unwrap(),
            vec!["warn", "123", "posting spam", "twice now"]
        );
        assert_eq!(tokenize(r#"say "" x"#).unwrap(), vec!["say", "", "x"]);
        assert_eq!(tokenize(r#"a"b c"d"#).unwrap(), vec!["ab cd"]);
    }

    #[test]
    fn escapes() {
        assert_eq!(tokenize(r"one\ token").unwrap(), vec!["one token"]);
        assert_eq!(
            tokenize(r#""say \"hi\" \\ \n""#).unwrap(),
            vec![r#"say "hi" \ \n"#]
        );
        assert_eq!(tokenize(r"'no \escapes'").unwrap(), vec![r"no \escapes"]);
        assert_eq!(tokenize(r"trailing\").unwrap(), vec![r"trailing\"]);
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        let err = tokenize(r#"warn "oops"#).unwrap_err();
        assert!(matches!(err, CommandError::InvalidArgument { .. }));
        assert!(tokenize("it's").is_err());
    }
}
