use super::errors::{ParseError, ParseErrorKind};

/// Rejects input whose `(`, `[` and `{` nesting exceeds `limit`. Brackets inside
/// string literals and comments are ignored; unbalanced closers are left to
/// the grammar.
pub(crate) fn check_nesting(input: &str, limit: usize) -> Result<(), ParseError> {
    let mut depth = 0usize;
    let (mut line, mut column) = (1, 0);
    let mut in_string = false;
    let mut in_comment = false;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\n' {
            line += 1;
            column = 0;
            in_comment = false;
            continue;
        }
        column += 1;
        if in_comment {
            continue;
        }
        if in_string {
            match c {
                '\\' => {
                    if chars.peek().is_some_and(|&next| next != '\n') {
                        chars.next();
                        column += 1;
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '#' => in_comment = true,
            '/' if chars.peek() == Some(&'/') => in_comment = true,
            '(' | '[' | '{' => {
                depth += 1;
                if depth > limit {
                    return Err(ParseError::new(
                        ParseErrorKind::Syntax,
                        line,
                        column,
                        format!("expression nested deeper than {} levels", limit),
                    ));
                }
            }
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

/// Resolves the escape sequences allowed in string literals. On failure the
/// offending sequence is returned so the caller can position the error.
pub(crate) fn unescape(s: &str) -> Result<String, String> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('r') => result.push('\r'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some(other) => return Err(format!("\\{}", other)),
                None => return Err("\\".to_string()),
            }
        } else {
            result.push(c);
        }
    }
    Ok(result)
}
