//! Expansion of a small regular-expression dialect into concrete strings.
//!
//! Regex-kind payloads are materialised here before a fuzz run starts: the
//! pattern is lexed, parsed into a [`parser::Node`] tree, compiled to a
//! Thompson [`nfa::Nfa`] and then walked breadth-first to list the strings it
//! accepts, shortest rounds first.
//!
//! Supported syntax: literals, `.` (word characters), `\d`, `\s`, `\w`,
//! bracket classes with ranges, groups, `|` and the postfix quantifiers `*`,
//! `+` and `?`. Whitespace inside the pattern text is ignored.

pub mod lexer;
pub mod nfa;
pub mod parser;

use nfa::{Nfa, StateSet};
use thiserror::Error;

/// Reasons a pattern cannot be compiled.
///
/// These never escape [`expand`], which degrades to an empty result, but
/// [`compile`] reports them for callers that want to tell the user why.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegexError {
    #[error("pattern ends in the middle of an escape sequence")]
    DanglingEscape,
    #[error("character class is missing its closing ']'")]
    UnterminatedClass,
    #[error("character class is empty")]
    EmptyClass,
    #[error("invalid class range {0}-{1}")]
    InvalidRange(char, char),
    #[error("unexpected '{0}'")]
    UnexpectedChar(char),
    #[error("unbalanced parentheses")]
    UnbalancedGroup,
    #[error("quantifier has nothing to repeat")]
    DanglingQuantifier,
    #[error("empty expression")]
    EmptyExpression,
}

/// Lexes, parses and compiles `pattern`.
pub fn compile(pattern: &str) -> Result<Nfa, RegexError> {
    let tokens = lexer::tokenize(pattern)?;
    let root = parser::parse(&tokens)?;
    Ok(Nfa::compile(&root))
}

/// Lists up to `cutoff` strings of at most `depth` characters accepted by
/// `pattern`, in discovery order and without duplicates.
///
/// Malformed patterns yield an empty list. The empty string is never part
/// of the result, even when the pattern accepts it.
///
/// ```
/// use gapfuzz_core::regex::expand;
///
/// let mut found = expand("ab*", 3, 10);
/// found.sort();
/// assert_eq!(found, ["a", "ab", "abb"]);
/// ```
pub fn expand(pattern: &str, depth: usize, cutoff: usize) -> Vec<String> {
    match compile(pattern) {
        Ok(nfa) => enumerate(&nfa, depth, cutoff),
        Err(e) => {
            log::debug!("Regex pattern {pattern:?} rejected: {e}");
            Vec::new()
        }
    }
}

/// Breadth-first walk over the automaton, one character per round.
///
/// The frontier maps every prefix built so far to the set of states it can
/// be in; prefixes whose state set has no outgoing symbols are dropped.
pub fn enumerate(nfa: &Nfa, depth: usize, cutoff: usize) -> Vec<String> {
    let mut found = Vec::new();
    if cutoff == 0 {
        return found;
    }

    let mut frontier: Vec<(String, StateSet)> =
        vec![(String::new(), nfa.epsilon_closure([nfa.start]))];

    for _round in 0..depth {
        // Frontier prefixes are distinct and each symbol is stepped once per
        // prefix, so every extended string in a round is new.
        let mut next: Vec<(String, StateSet)> = Vec::new();

        for (prefix, states) in &frontier {
            for (symbol, targets) in nfa.step_targets(states) {
                let closure = nfa.epsilon_closure(targets);
                let mut extended = prefix.clone();
                extended.push(symbol);

                if nfa.is_accepting(&closure) {
                    found.push(extended.clone());
                    if found.len() >= cutoff {
                        return found;
                    }
                }
                next.push((extended, closure));
            }
        }

        next.retain(|(_, states)| !nfa.step_targets(states).is_empty());
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn expand_set(pattern: &str, depth: usize, cutoff: usize) -> BTreeSet<String> {
        expand(pattern, depth, cutoff).into_iter().collect()
    }

    fn set_of(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn alternation_yields_both_branches() {
        assert_eq!(expand_set("a|b", 1, 10), set_of(&["a", "b"]));
    }

    #[test]
    fn star_is_bounded_by_depth() {
        assert_eq!(expand_set("ab*", 3, 10), set_of(&["a", "ab", "abb"]));
    }

    #[test]
    fn bracket_range_expands_each_member() {
        assert_eq!(expand_set("[0-2]", 1, 10), set_of(&["0", "1", "2"]));
    }

    #[test]
    fn cutoff_caps_the_result_count() {
        let found = expand("a*", 5, 2);
        assert_eq!(found.len(), 2);
        assert_eq!(found, vec!["a".to_string(), "aa".to_string()]);
    }

    #[test]
    fn malformed_pattern_yields_nothing() {
        assert!(expand("(unbalanced", 3, 10).is_empty());
        assert!(expand("[z-a]", 3, 10).is_empty());
        assert!(expand("+", 3, 10).is_empty());
        assert!(compile("(unbalanced").is_err());
    }

    #[test]
    fn strings_reachable_along_several_paths_appear_once() {
        assert_eq!(expand("a|a|[a]", 1, 10), vec!["a".to_string()]);
        assert_eq!(
            expand("(a|ab)(b|c)?", 3, 10),
            vec!["a", "ab", "ac", "abb", "abc"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn zero_depth_or_cutoff_yields_nothing() {
        assert!(expand("abc", 0, 10).is_empty());
        assert!(expand("abc", 3, 0).is_empty());
    }

    #[test]
    fn strings_longer_than_depth_are_not_emitted() {
        assert!(expand("abcd", 3, 10).is_empty());
        assert_eq!(expand("abcd", 4, 10), vec!["abcd".to_string()]);
    }

    #[test]
    fn rounds_are_discovered_shortest_first() {
        let found = expand("[ab]+", 2, 100);
        assert_eq!(found, vec!["a", "b", "aa", "ab", "ba", "bb"]);
    }

    #[test]
    fn results_have_no_duplicates() {
        // Both branches accept "a"; it must be reported once.
        let found = expand("a|a|ab?", 2, 100);
        assert_eq!(found, vec!["a".to_string(), "ab".to_string()]);
    }

    #[test]
    fn grouped_quantifier_repeats_the_whole_group() {
        assert_eq!(
            expand_set("(ab)+", 6, 10),
            set_of(&["ab", "abab", "ababab"])
        );
    }

    #[test]
    fn shorthand_classes_expand() {
        assert_eq!(expand("\\d", 1, 100).len(), 10);
        assert_eq!(expand(".", 1, 100).len(), 63);
        assert_eq!(expand_set("x\\s?", 2, 100).len(), 7);
    }

    #[test]
    fn whitespace_in_pattern_is_ignored() {
        assert_eq!(expand_set("a | b", 1, 10), set_of(&["a", "b"]));
    }
}
