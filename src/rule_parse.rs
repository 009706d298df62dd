//! Parser for color rule definitions.
//!
//! ```text
//! # comment
//! rule 100 "Tank Level" {
//!     >=90 && <100 : red white
//!     >=50         : yellow
//!     default      : green
//! }
//! alias level "Tank Level"
//! ```
//!
//! Each entry is `[predicate] : [color [blink-color]]`. An empty predicate
//! always matches; a missing color falls back to the caller's default.
//!
//! Lexing uses the [`pest`] grammar in [`rule_grammar_doc`](crate::rule_grammar_doc);
//! the token list is then parsed by hand with an explicit cursor.

use pest::Parser;

use crate::color::Color;
use crate::rule::{CompareOp, Predicate, Rule, RuleEntry, RuleError};

mod lexer {
    use pest_derive::Parser;

    #[derive(Parser)]
    #[grammar = "rule_source.pest"] // relative to project `src`
    pub(super) struct RuleSourceLexer;
}

use lexer::{Rule as Lexeme, RuleSourceLexer};

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Compare(CompareOp),
    And,
    Or,
    Number(f64),
    Word(String),
    /// A double-quoted name, quotes removed. Never a keyword.
    Quoted(String),
    OpenBrace,
    CloseBrace,
    Colon,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RuleToken {
    pub kind: TokenKind,
    pub position: usize,
}

/// A top-level item in a rule source.
#[derive(Clone, Debug, PartialEq)]
pub enum Definition {
    Rule(Rule),
    Alias { name: String, target: String },
}

/// Splits rule source text into tokens.
pub fn lex(source: &str) -> Result<Vec<RuleToken>, RuleError> {
    let pairs = RuleSourceLexer::parse(Lexeme::source, source)
        .map_err(|err| RuleError::Lex(err.to_string()))?;

    let mut tokens = Vec::new();
    for pair in pairs {
        let position = pair.as_span().start();
        let text = pair.as_str();
        let kind = match pair.as_rule() {
            Lexeme::comparison => match CompareOp::from_symbol(text) {
                Some(op) => TokenKind::Compare(op),
                None => return Err(RuleError::Lex(format!("unknown comparison '{text}'"))),
            },
            Lexeme::combinator if text == "&&" => TokenKind::And,
            Lexeme::combinator => TokenKind::Or,
            Lexeme::number => match text.parse::<f64>() {
                Ok(value) => TokenKind::Number(value),
                Err(_) => {
                    return Err(RuleError::BadThreshold {
                        position,
                        found: text.to_string(),
                    })
                }
            },
            Lexeme::quoted => TokenKind::Quoted(text.trim_matches('"').to_string()),
            Lexeme::word => TokenKind::Word(text.to_string()),
            Lexeme::open_brace => TokenKind::OpenBrace,
            Lexeme::close_brace => TokenKind::CloseBrace,
            Lexeme::colon => TokenKind::Colon,
            _ => continue,
        };
        tokens.push(RuleToken { kind, position });
    }
    Ok(tokens)
}

/// Parses every definition in `source`.
pub fn parse_source(source: &str) -> Result<Vec<Definition>, RuleError> {
    let tokens = lex(source)?;
    let mut definitions = Vec::new();
    let mut at = 0;
    while at < tokens.len() {
        let (definition, next) = parse_definition(&tokens, at)?;
        definitions.push(definition);
        at = next;
    }
    Ok(definitions)
}

/// Parses a single `rule <index> <name> { ... }` block from a token list.
pub fn define_rule(tokens: &[RuleToken]) -> Result<Rule, RuleError> {
    let (rule, next) = parse_rule(tokens, 0)?;
    match tokens.get(next) {
        None => Ok(rule),
        Some(extra) => Err(unexpected(extra, "end of rule")),
    }
}

fn parse_definition(tokens: &[RuleToken], at: usize) -> Result<(Definition, usize), RuleError> {
    match tokens.get(at).map(|t| &t.kind) {
        Some(TokenKind::Word(keyword)) if keyword == "rule" => {
            let (rule, next) = parse_rule(tokens, at)?;
            Ok((Definition::Rule(rule), next))
        }
        Some(TokenKind::Word(keyword)) if keyword == "alias" => {
            let (name, next) = expect_name(tokens, at + 1, "alias name")?;
            let (target, next) = expect_name(tokens, next, "alias target")?;
            Ok((Definition::Alias { name, target }, next))
        }
        Some(_) => Err(unexpected(&tokens[at], "'rule' or 'alias'")),
        None => Err(RuleError::UnexpectedEnd("'rule' or 'alias'")),
    }
}

fn parse_rule(tokens: &[RuleToken], at: usize) -> Result<(Rule, usize), RuleError> {
    let next = expect(tokens, at, "'rule'", |kind| {
        matches!(kind, TokenKind::Word(w) if w == "rule")
    })?;
    let (index, next) = expect_index(tokens, next)?;
    let (name, next) = expect_name(tokens, next, "rule name")?;
    let mut next = expect(tokens, next, "'{'", |kind| *kind == TokenKind::OpenBrace)?;

    let mut entries = Vec::new();
    loop {
        match tokens.get(next).map(|t| &t.kind) {
            Some(TokenKind::CloseBrace) => {
                next += 1;
                break;
            }
            Some(_) => {
                let (entry, after) = parse_entry(tokens, next)?;
                entries.push(entry);
                next = after;
            }
            None => return Err(RuleError::UnexpectedEnd("'}'")),
        }
    }

    let rule = Rule::new(name, Some(index), entries)?;
    Ok((rule, next))
}

/// `[predicate] ':' [color [blink]]`
pub fn parse_entry(tokens: &[RuleToken], at: usize) -> Result<(RuleEntry, usize), RuleError> {
    let (predicate, next) = parse_predicate(tokens, at)?;
    let next = expect(tokens, next, "':'", |kind| *kind == TokenKind::Colon)?;
    let (color, next) = optional_color(tokens, next);
    let (blink, next) = match color {
        Some(_) => optional_color(tokens, next),
        None => (None, next),
    };
    Ok((
        RuleEntry {
            predicate,
            color,
            blink,
        },
        next,
    ))
}

/// Reads a predicate starting at `at` and returns it with the position of the
/// first token after it.
///
/// Combinators nest to the right: `>0 && <10 || =20` is
/// `And(>0, Or(<10, =20))`.
pub fn parse_predicate(tokens: &[RuleToken], at: usize) -> Result<(Predicate, usize), RuleError> {
    match tokens.get(at).map(|t| &t.kind) {
        Some(TokenKind::Word(keyword)) if keyword == "default" => Ok((Predicate::Default, at + 1)),
        Some(TokenKind::Colon) => Ok((Predicate::Always, at)),
        Some(_) => parse_condition(tokens, at),
        None => Err(RuleError::UnexpectedEnd("predicate")),
    }
}

fn parse_condition(tokens: &[RuleToken], at: usize) -> Result<(Predicate, usize), RuleError> {
    let op = match tokens.get(at) {
        Some(RuleToken {
            kind: TokenKind::Compare(op),
            ..
        }) => *op,
        Some(other) => return Err(unexpected(other, "comparison")),
        None => return Err(RuleError::UnexpectedEnd("comparison")),
    };
    let threshold = match tokens.get(at + 1) {
        Some(RuleToken {
            kind: TokenKind::Number(value),
            ..
        }) => *value,
        Some(other) => {
            return Err(RuleError::BadThreshold {
                position: other.position,
                found: describe(&other.kind),
            })
        }
        None => return Err(RuleError::UnexpectedEnd("threshold")),
    };
    let left = Predicate::compare(op, threshold);

    let next = at + 2;
    match tokens.get(next).map(|t| &t.kind) {
        Some(TokenKind::And) => {
            let (right, next) = parse_condition(tokens, next + 1)?;
            Ok((Predicate::And(Box::new(left), Box::new(right)), next))
        }
        Some(TokenKind::Or) => {
            let (right, next) = parse_condition(tokens, next + 1)?;
            Ok((Predicate::Or(Box::new(left), Box::new(right)), next))
        }
        _ => Ok((left, next)),
    }
}

/// A color name, unless the token starts the next entry or ends the rule.
fn optional_color(tokens: &[RuleToken], at: usize) -> (Option<Color>, usize) {
    match tokens.get(at).map(|t| &t.kind) {
        Some(TokenKind::Word(name)) if name != "default" => {
            (Some(Color::new(name.as_str())), at + 1)
        }
        Some(TokenKind::Quoted(name)) => (Some(Color::new(name.as_str())), at + 1),
        _ => (None, at),
    }
}

fn expect(
    tokens: &[RuleToken],
    at: usize,
    expected: &'static str,
    matches: impl Fn(&TokenKind) -> bool,
) -> Result<usize, RuleError> {
    match tokens.get(at) {
        Some(token) if matches(&token.kind) => Ok(at + 1),
        Some(token) => Err(unexpected(token, expected)),
        None => Err(RuleError::UnexpectedEnd(expected)),
    }
}

fn expect_name(
    tokens: &[RuleToken],
    at: usize,
    expected: &'static str,
) -> Result<(String, usize), RuleError> {
    match tokens.get(at) {
        Some(RuleToken {
            kind: TokenKind::Word(name) | TokenKind::Quoted(name),
            ..
        }) => Ok((name.clone(), at + 1)),
        Some(token) => Err(unexpected(token, expected)),
        None => Err(RuleError::UnexpectedEnd(expected)),
    }
}

fn expect_index(tokens: &[RuleToken], at: usize) -> Result<(u32, usize), RuleError> {
    match tokens.get(at) {
        Some(RuleToken {
            kind: TokenKind::Number(value),
            ..
        }) if value.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(value) => {
            Ok((*value as u32, at + 1))
        }
        Some(token) => Err(unexpected(token, "rule index")),
        None => Err(RuleError::UnexpectedEnd("rule index")),
    }
}

fn unexpected(token: &RuleToken, expected: &'static str) -> RuleError {
    RuleError::UnexpectedToken {
        position: token.position,
        expected,
        found: describe(&token.kind),
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Compare(op) => op.symbol().to_string(),
        TokenKind::And => "&&".to_string(),
        TokenKind::Or => "||".to_string(),
        TokenKind::Number(value) => value.to_string(),
        TokenKind::Word(word) => word.clone(),
        TokenKind::Quoted(text) => format!("\"{text}\""),
        TokenKind::OpenBrace => "{".to_string(),
        TokenKind::CloseBrace => "}".to_string(),
        TokenKind::Colon => ":".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predicate_of(source: &str) -> Predicate {
        let tokens = lex(source).unwrap();
        let (predicate, next) = parse_predicate(&tokens, 0).unwrap();
        assert_eq!(next, tokens.len(), "trailing tokens in {source}");
        predicate
    }

    fn cmp(op: CompareOp, threshold: f64) -> Box<Predicate> {
        Box::new(Predicate::compare(op, threshold))
    }

    #[test]
    fn lex_tokens() {
        let tokens = lex(">=90 && <100 : red \"Light Blue\" # comment\n default:").unwrap();
        let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            [
                TokenKind::Compare(CompareOp::Ge),
                TokenKind::Number(90.0),
                TokenKind::And,
                TokenKind::Compare(CompareOp::Lt),
                TokenKind::Number(100.0),
                TokenKind::Colon,
                TokenKind::Word("red".to_string()),
                TokenKind::Quoted("Light Blue".to_string()),
                TokenKind::Word("default".to_string()),
                TokenKind::Colon,
            ]
        );
    }

    #[test]
    fn lex_negative_and_fractional_thresholds() {
        let tokens = lex("=-5 !=.5 <=1e3").unwrap();
        let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            [
                TokenKind::Compare(CompareOp::Eq),
                TokenKind::Number(-5.0),
                TokenKind::Compare(CompareOp::Ne),
                TokenKind::Number(0.5),
                TokenKind::Compare(CompareOp::Le),
                TokenKind::Number(1000.0),
            ]
        );
    }

    #[test]
    fn lex_positions() {
        let tokens = lex("rule  7").unwrap();
        assert_eq!(tokens[1].position, 6);
    }

    #[test]
    fn lex_rejects_stray_characters() {
        assert!(matches!(lex("rule 1 x { ; }"), Err(RuleError::Lex(_))));
    }

    #[test]
    fn simple_predicates() {
        assert_eq!(
            predicate_of(">=90"),
            Predicate::compare(CompareOp::Ge, 90.0)
        );
        assert_eq!(predicate_of("default"), Predicate::Default);
        assert_eq!(predicate_of("== 3"), Predicate::compare(CompareOp::Eq, 3.0));
    }

    #[test]
    fn empty_predicate_is_always() {
        let tokens = lex(": green").unwrap();
        assert_eq!(parse_predicate(&tokens, 0).unwrap(), (Predicate::Always, 0));
    }

    #[test]
    fn compound_predicates_nest_right() {
        assert_eq!(
            predicate_of(">0 && <10"),
            Predicate::And(cmp(CompareOp::Gt, 0.0), cmp(CompareOp::Lt, 10.0))
        );
        assert_eq!(
            predicate_of(">0 && <10 || =20"),
            Predicate::And(
                cmp(CompareOp::Gt, 0.0),
                Box::new(Predicate::Or(cmp(CompareOp::Lt, 10.0), cmp(CompareOp::Eq, 20.0)))
            )
        );
    }

    #[test]
    fn predicate_can_start_mid_stream() {
        let tokens = lex("x : <5 : red").unwrap();
        let (predicate, next) = parse_predicate(&tokens, 2).unwrap();
        assert_eq!(predicate, Predicate::compare(CompareOp::Lt, 5.0));
        assert_eq!(next, 4);
    }

    #[test]
    fn predicate_errors() {
        let tokens = lex(">= red").unwrap();
        assert!(matches!(
            parse_predicate(&tokens, 0),
            Err(RuleError::BadThreshold { position: 3, .. })
        ));

        let tokens = lex(">0 &&").unwrap();
        assert_eq!(
            parse_predicate(&tokens, 0),
            Err(RuleError::UnexpectedEnd("comparison"))
        );

        let tokens = lex(">0 && default").unwrap();
        assert!(matches!(
            parse_predicate(&tokens, 0),
            Err(RuleError::UnexpectedToken { expected: "comparison", .. })
        ));
    }

    #[test]
    fn entries() {
        let tokens = lex(">=90 : red white >=50 : yellow default : green").unwrap();
        let (first, next) = parse_entry(&tokens, 0).unwrap();
        assert_eq!(
            first,
            RuleEntry::new(Predicate::compare(CompareOp::Ge, 90.0), "red").with_blink("white")
        );
        let (second, next) = parse_entry(&tokens, next).unwrap();
        assert_eq!(
            second,
            RuleEntry::new(Predicate::compare(CompareOp::Ge, 50.0), "yellow")
        );
        let (third, next) = parse_entry(&tokens, next).unwrap();
        assert_eq!(third, RuleEntry::new(Predicate::Default, "green"));
        assert_eq!(next, tokens.len());
    }

    #[test]
    fn entry_without_color() {
        let tokens = lex(">5 : default : blue").unwrap();
        let (entry, next) = parse_entry(&tokens, 0).unwrap();
        assert_eq!(entry.color, None);
        assert_eq!(next, 3);
    }

    #[test]
    fn whole_rule() {
        let tokens = lex("rule 3 \"Tank Level\" { >=90 : red  default : green }").unwrap();
        let rule = define_rule(&tokens).unwrap();
        assert_eq!(rule.name(), "Tank Level");
        assert_eq!(rule.index(), Some(3));
        assert_eq!(rule.entries().len(), 2);
    }

    #[test]
    fn rule_errors() {
        let tokens = lex("rule 3 level { }").unwrap();
        assert_eq!(
            define_rule(&tokens),
            Err(RuleError::EmptyRule("level".to_string()))
        );

        let tokens = lex("rule 3 level { default : red").unwrap();
        assert_eq!(define_rule(&tokens), Err(RuleError::UnexpectedEnd("'}'")));

        let tokens = lex("rule 1.5 level { default : red }").unwrap();
        assert!(matches!(
            define_rule(&tokens),
            Err(RuleError::UnexpectedToken { expected: "rule index", .. })
        ));

        let tokens = lex("rule 3 level { >5 red }").unwrap();
        assert!(matches!(
            define_rule(&tokens),
            Err(RuleError::UnexpectedToken { expected: "':'", .. })
        ));
    }

    #[test]
    fn source_with_aliases() {
        let definitions = parse_source(
            "# levels\n\
             rule 1 level {\n  >=50 : red\n  default : green\n}\n\
             alias tank level\n",
        )
        .unwrap();
        assert_eq!(definitions.len(), 2);
        assert!(matches!(
            &definitions[0],
            Definition::Rule(rule) if rule.name() == "level"
        ));
        assert_eq!(
            definitions[1],
            Definition::Alias {
                name: "tank".to_string(),
                target: "level".to_string()
            }
        );
    }

    #[test]
    fn source_rejects_unknown_keyword() {
        assert!(matches!(
            parse_source("static 1 red { 255 0 0 }"),
            Err(RuleError::UnexpectedToken { expected: "'rule' or 'alias'", .. })
        ));
    }
}
