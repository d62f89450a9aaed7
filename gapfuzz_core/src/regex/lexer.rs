use super::RegexError;
use std::collections::BTreeSet;
use std::iter::Peekable;

/// A set of characters matched by a single position of the pattern.
pub type CharSet = BTreeSet<char>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(char),
    Class(CharSet),
    OpenGroup,
    CloseGroup,
    Alternation,
    Star,
    Plus,
    Quest,
}

pub fn digit_class() -> CharSet {
    ('0'..='9').collect()
}

pub fn space_class() -> CharSet {
    [' ', '\t', '\n', '\r', '\u{0B}', '\u{0C}'].into_iter().collect()
}

/// `[A-Za-z0-9_]`, also what a bare `.` stands for.
pub fn word_class() -> CharSet {
    ('a'..='z')
        .chain('A'..='Z')
        .chain('0'..='9')
        .chain(std::iter::once('_'))
        .collect()
}

fn shorthand_class(c: char) -> Option<CharSet> {
    match c {
        'd' => Some(digit_class()),
        's' => Some(space_class()),
        'w' => Some(word_class()),
        _ => None,
    }
}

/// Splits a pattern into a flat token stream.
///
/// Whitespace in the pattern text is dropped before anything else looks at
/// it, so `"a b"` lexes exactly like `"ab"`. Use `\s` to match whitespace.
pub fn tokenize(pattern: &str) -> Result<Vec<Token>, RegexError> {
    let mut chars = pattern.chars().filter(|c| !c.is_whitespace()).peekable();
    let mut tokens = Vec::new();

    while let Some(c) = chars.next() {
        let token = match c {
            '(' => Token::OpenGroup,
            ')' => Token::CloseGroup,
            '|' => Token::Alternation,
            '*' => Token::Star,
            '+' => Token::Plus,
            '?' => Token::Quest,
            '.' => Token::Class(word_class()),
            '[' => Token::Class(bracket_class(&mut chars)?),
            ']' => return Err(RegexError::UnexpectedChar(']')),
            '\\' => {
                let escaped = chars.next().ok_or(RegexError::DanglingEscape)?;
                match shorthand_class(escaped) {
                    Some(class) => Token::Class(class),
                    None => Token::Literal(escaped),
                }
            }
            other => Token::Literal(other),
        };
        tokens.push(token);
    }

    Ok(tokens)
}

/// Reads the body of a `[...]` class; the opening bracket is already consumed.
fn bracket_class<I>(chars: &mut Peekable<I>) -> Result<CharSet, RegexError>
where
    I: Iterator<Item = char>,
{
    let mut class = CharSet::new();

    loop {
        let c = chars.next().ok_or(RegexError::UnterminatedClass)?;
        let low = match c {
            ']' => break,
            '\\' => {
                let escaped = chars.next().ok_or(RegexError::DanglingEscape)?;
                if let Some(shorthand) = shorthand_class(escaped) {
                    class.extend(shorthand);
                    continue;
                }
                escaped
            }
            other => other,
        };

        if chars.peek() == Some(&'-') {
            chars.next();
            match chars.next() {
                // `[a-]` keeps the dash as a member.
                Some(']') => {
                    class.insert(low);
                    class.insert('-');
                    break;
                }
                Some(high) => {
                    let high = if high == '\\' {
                        chars.next().ok_or(RegexError::DanglingEscape)?
                    } else {
                        high
                    };
                    if high < low {
                        return Err(RegexError::InvalidRange(low, high));
                    }
                    class.extend(low..=high);
                }
                None => return Err(RegexError::UnterminatedClass),
            }
        } else {
            class.insert(low);
        }
    }

    if class.is_empty() {
        return Err(RegexError::EmptyClass);
    }
    Ok(class)
}
