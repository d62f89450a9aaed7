use super::RegexError;
use super::lexer::{CharSet, Token};

/// Abstract syntax tree of the supported regex subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Literal(char),
    Class(CharSet),
    Concat(Box<Node>, Box<Node>),
    Union(Box<Node>, Box<Node>),
    Star(Box<Node>),
    Plus(Box<Node>),
    Quest(Box<Node>),
}

/// Builds the tree for a full token stream.
///
/// Grammar, lowest precedence first:
///
/// ```text
/// alternation   := concatenation ( '|' alternation )?
/// concatenation := ( atom quantifier* )+
/// atom          := literal | class | '(' alternation ')'
/// ```
///
/// Alternation nests to the right, so `a|b|c` is `Union(a, Union(b, c))`.
pub fn parse(tokens: &[Token]) -> Result<Node, RegexError> {
    let mut parser = Parser { tokens, pos: 0 };
    let root = parser.alternation()?;
    if parser.pos != tokens.len() {
        // Only a stray `)` can stop the top-level scan early.
        return Err(RegexError::UnbalancedGroup);
    }
    Ok(root)
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn alternation(&mut self) -> Result<Node, RegexError> {
        let left = self.concatenation()?;
        if self.peek() == Some(&Token::Alternation) {
            self.bump();
            let right = self.alternation()?;
            return Ok(Node::Union(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn concatenation(&mut self) -> Result<Node, RegexError> {
        let mut chain: Vec<Node> = Vec::new();

        while let Some(token) = self.peek() {
            match token {
                Token::Alternation | Token::CloseGroup => break,
                Token::Literal(c) => {
                    self.bump();
                    chain.push(Node::Literal(*c));
                }
                Token::Class(set) => {
                    self.bump();
                    chain.push(Node::Class(set.clone()));
                }
                Token::OpenGroup => {
                    self.bump();
                    let inner = self.alternation()?;
                    if self.bump() != Some(&Token::CloseGroup) {
                        return Err(RegexError::UnbalancedGroup);
                    }
                    chain.push(inner);
                }
                Token::Star | Token::Plus | Token::Quest => {
                    self.bump();
                    let operand = chain.pop().ok_or(RegexError::DanglingQuantifier)?;
                    chain.push(quantify(token, operand));
                }
            }
        }

        chain
            .into_iter()
            .reduce(|left, right| Node::Concat(Box::new(left), Box::new(right)))
            .ok_or(RegexError::EmptyExpression)
    }
}

fn quantify(quantifier: &Token, operand: Node) -> Node {
    let operand = Box::new(operand);
    match quantifier {
        Token::Star => Node::Star(operand),
        Token::Plus => Node::Plus(operand),
        _ => Node::Quest(operand),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regex::lexer::tokenize;

    fn parse_str(pattern: &str) -> Result<Node, RegexError> {
        parse(&tokenize(pattern)?)
    }

    fn lit(c: char) -> Box<Node> {
        Box::new(Node::Literal(c))
    }

    #[test]
    fn concatenation_is_left_nested() {
        assert_eq!(
            parse_str("abc").unwrap(),
            Node::Concat(Box::new(Node::Concat(lit('a'), lit('b'))), lit('c'))
        );
    }

    #[test]
    fn quantifier_binds_only_the_last_operand() {
        assert_eq!(
            parse_str("ab*").unwrap(),
            Node::Concat(lit('a'), Box::new(Node::Star(lit('b'))))
        );
        assert_eq!(
            parse_str("(ab)+").unwrap(),
            Node::Plus(Box::new(Node::Concat(lit('a'), lit('b'))))
        );
    }

    #[test]
    fn alternation_nests_right() {
        assert_eq!(
            parse_str("a|b|c").unwrap(),
            Node::Union(lit('a'), Box::new(Node::Union(lit('b'), lit('c'))))
        );
    }

    #[test]
    fn alternation_inside_group_stays_local() {
        assert_eq!(
            parse_str("x(a|b)?").unwrap(),
            Node::Concat(
                lit('x'),
                Box::new(Node::Quest(Box::new(Node::Union(lit('a'), lit('b')))))
            )
        );
    }

    #[test]
    fn malformed_patterns_are_errors() {
        assert!(matches!(
            parse_str("(unbalanced"),
            Err(RegexError::UnbalancedGroup)
        ));
        assert!(matches!(parse_str("a)"), Err(RegexError::UnbalancedGroup)));
        assert!(matches!(
            parse_str("*a"),
            Err(RegexError::DanglingQuantifier)
        ));
        assert!(matches!(parse_str(""), Err(RegexError::EmptyExpression)));
        assert!(matches!(parse_str("a|"), Err(RegexError::EmptyExpression)));
        assert!(matches!(parse_str("()"), Err(RegexError::EmptyExpression)));
    }
}
