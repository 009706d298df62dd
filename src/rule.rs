//! Conditional color rules.
//!
//! A [`Rule`] is an ordered list of predicates, each paired with a color. The
//! first predicate that holds for a value decides the color.

use std::fmt;

use thiserror::Error;

use crate::color::{Color, ColorChoice};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "=" | "==" => Self::Eq,
            "!=" => Self::Ne,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "=",
            Self::Ne => "!=",
        }
    }

    pub fn test(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Lt => value < threshold,
            Self::Le => value <= threshold,
            Self::Gt => value > threshold,
            Self::Ge => value >= threshold,
            Self::Eq => value == threshold,
            Self::Ne => value != threshold,
        }
    }
}

/// A test applied to a single value.
///
/// `And`/`Or` test both children against the same value.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Predicate {
    /// Empty condition, always true.
    Always,
    Compare { op: CompareOp, threshold: f64 },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    /// Fallback entry, always true.
    Default,
}

impl Predicate {
    pub fn compare(op: CompareOp, threshold: f64) -> Self {
        Self::Compare { op, threshold }
    }

    pub fn test(&self, value: f64) -> bool {
        match self {
            Self::Always | Self::Default => true,
            Self::Compare { op, threshold } => op.test(value, *threshold),
            Self::And(lhs, rhs) => lhs.test(value) && rhs.test(value),
            Self::Or(lhs, rhs) => lhs.test(value) || rhs.test(value),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => Ok(()),
            Self::Compare { op, threshold } => write!(f, "{}{threshold}", op.symbol()),
            Self::And(lhs, rhs) => write!(f, "{lhs} && {rhs}"),
            Self::Or(lhs, rhs) => write!(f, "{lhs} || {rhs}"),
            Self::Default => f.write_str("default"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RuleEntry {
    pub predicate: Predicate,
    /// Unset colors make a matching entry fall back to the caller's default.
    pub color: Option<Color>,
    pub blink: Option<Color>,
}

impl RuleEntry {
    pub fn new(predicate: Predicate, color: impl Into<Color>) -> Self {
        Self {
            predicate,
            color: Some(color.into()),
            blink: None,
        }
    }

    pub fn with_blink(mut self, blink: impl Into<Color>) -> Self {
        self.blink = Some(blink.into());
        self
    }
}

/// A live value handed to a rule. Text is accepted because enum-valued and
/// string channels deliver their samples as text.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RuleValue<'a> {
    Number(f64),
    Text(&'a str),
}

impl RuleValue<'_> {
    /// The one place where rule inputs become numbers.
    pub fn coerce(self) -> Result<f64, FallbackReason> {
        match self {
            Self::Number(value) => Ok(value),
            Self::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| FallbackReason::NotNumeric(text.to_string())),
        }
    }
}

impl From<f64> for RuleValue<'_> {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for RuleValue<'_> {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl<'a> From<&'a str> for RuleValue<'a> {
    fn from(text: &'a str) -> Self {
        Self::Text(text)
    }
}

impl<'a> From<&'a String> for RuleValue<'a> {
    fn from(text: &'a String) -> Self {
        Self::Text(text)
    }
}

/// Why a rule could not pick a color itself.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FallbackReason {
    #[error("value '{0}' is not numeric")]
    NotNumeric(String),
    #[error("no predicate matched")]
    NoMatch,
    #[error("matching predicate has no color")]
    NoColor,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("cannot lex rule source: {0}")]
    Lex(String),
    #[error("expected {expected} at offset {position}, found '{found}'")]
    UnexpectedToken {
        position: usize,
        expected: &'static str,
        found: String,
    },
    #[error("rule source ended early, expected {0}")]
    UnexpectedEnd(&'static str),
    #[error("bad threshold '{found}' at offset {position}")]
    BadThreshold { position: usize, found: String },
    #[error("rule '{0}' has no entries")]
    EmptyRule(String),
    #[error("rule name '{0}' is already defined")]
    DuplicateName(String),
    #[error("rule index {0} is already defined")]
    DuplicateIndex(u32),
}

/// An ordered predicate -> color list for one named, numbered color.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rule {
    name: String,
    index: Option<u32>,
    entries: Vec<RuleEntry>,
}

impl Rule {
    /// Fails if `entries` is empty.
    pub fn new(
        name: impl Into<String>,
        index: Option<u32>,
        entries: Vec<RuleEntry>,
    ) -> Result<Self, RuleError> {
        let name = name.into();
        if entries.is_empty() {
            return Err(RuleError::EmptyRule(name));
        }
        Ok(Self {
            name,
            index,
            entries,
        })
    }

    /// A rule whose only entry is `default : color`.
    pub fn constant(name: impl Into<String>, color: Color) -> Self {
        Self {
            name: name.into(),
            index: None,
            entries: vec![RuleEntry::new(Predicate::Default, color)],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn entries(&self) -> &[RuleEntry] {
        &self.entries
    }

    /// First matching entry's colors, or the reason there is none.
    pub fn choose(&self, value: RuleValue<'_>) -> Result<ColorChoice, FallbackReason> {
        let value = value.coerce()?;
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.predicate.test(value))
            .ok_or(FallbackReason::NoMatch)?;
        let primary = entry.color.clone().ok_or(FallbackReason::NoColor)?;
        Ok(ColorChoice {
            primary,
            blink: entry.blink.clone(),
        })
    }

    /// Like [`choose`](Self::choose), but falls back to `default` (and logs
    /// why) instead of failing.
    pub fn select<'a>(&self, value: impl Into<RuleValue<'a>>, default: &Color) -> ColorChoice {
        match self.choose(value.into()) {
            Ok(choice) => choice,
            Err(reason) => {
                match reason {
                    FallbackReason::NotNumeric(_) => tracing::debug!(
                        "rule '{}': {}, using {}",
                        self.name,
                        reason,
                        default
                    ),
                    FallbackReason::NoMatch | FallbackReason::NoColor => tracing::warn!(
                        "rule '{}': {}, using {}",
                        self.name,
                        reason,
                        default
                    ),
                }
                ColorChoice::solid(default.clone())
            }
        }
    }

    pub fn evaluate<'a>(&self, value: impl Into<RuleValue<'a>>, default: &Color) -> Color {
        self.select(value, default).primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ge(threshold: f64) -> Predicate {
        Predicate::compare(CompareOp::Ge, threshold)
    }

    fn alarm_rule() -> Rule {
        Rule::new(
            "alarm",
            Some(1),
            vec![
                RuleEntry::new(ge(90.0), "red").with_blink("white"),
                RuleEntry::new(ge(50.0), "yellow"),
                RuleEntry::new(Predicate::Default, "green"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn first_match_wins() {
        let rule = alarm_rule();
        let default = Color::from("grey");
        assert_eq!(rule.evaluate(95.0, &default).name(), "red");
        assert_eq!(rule.evaluate(90.0, &default).name(), "red");
        assert_eq!(rule.evaluate(60.0, &default).name(), "yellow");
        assert_eq!(rule.evaluate(10.0, &default).name(), "green");
    }

    #[test]
    fn blink_color_travels_with_match() {
        let rule = alarm_rule();
        let choice = rule.select(99.0, &Color::from("grey"));
        assert_eq!(choice.blink, Some(Color::from("white")));
        assert_eq!(rule.select(60.0, &Color::from("grey")).blink, None);
    }

    #[test]
    fn and_combinator() {
        let in_range = Predicate::And(
            Box::new(Predicate::compare(CompareOp::Gt, 0.0)),
            Box::new(Predicate::compare(CompareOp::Lt, 10.0)),
        );
        let rule = Rule::new(
            "band",
            Some(2),
            vec![
                RuleEntry::new(in_range, "blue"),
                RuleEntry::new(Predicate::Default, "black"),
            ],
        )
        .unwrap();
        let default = Color::from("grey");
        assert_eq!(rule.evaluate(5.0, &default).name(), "blue");
        assert_eq!(rule.evaluate(0.0, &default).name(), "black");
        assert_eq!(rule.evaluate(10.0, &default).name(), "black");
    }

    #[test]
    fn or_combinator() {
        let outside = Predicate::Or(
            Box::new(Predicate::compare(CompareOp::Lt, 0.0)),
            Box::new(Predicate::compare(CompareOp::Gt, 10.0)),
        );
        assert!(outside.test(-1.0));
        assert!(outside.test(11.0));
        assert!(!outside.test(5.0));
    }

    #[test]
    fn every_comparison() {
        assert!(CompareOp::Lt.test(1.0, 2.0));
        assert!(CompareOp::Le.test(2.0, 2.0));
        assert!(CompareOp::Gt.test(3.0, 2.0));
        assert!(CompareOp::Ge.test(2.0, 2.0));
        assert!(CompareOp::Eq.test(2.0, 2.0));
        assert!(CompareOp::Ne.test(1.0, 2.0));
        assert!(!CompareOp::Eq.test(f64::NAN, f64::NAN));
    }

    #[test]
    fn non_numeric_value_falls_back() {
        let rule = alarm_rule();
        let default = Color::from("grey");
        assert_eq!(rule.evaluate("abc", &default), default);
        assert_eq!(
            rule.choose(RuleValue::from("abc")),
            Err(FallbackReason::NotNumeric("abc".to_string()))
        );
        assert_eq!(rule.evaluate(" 95 ", &default).name(), "red");
    }

    #[test]
    fn no_match_falls_back() {
        let rule = Rule::new("high", Some(3), vec![RuleEntry::new(ge(100.0), "red")]).unwrap();
        let default = Color::from("grey");
        assert_eq!(
            rule.choose(RuleValue::from(1.0)),
            Err(FallbackReason::NoMatch)
        );
        assert_eq!(rule.evaluate(1.0, &default), default);
    }

    #[test]
    fn unset_color_falls_back() {
        let entry = RuleEntry {
            predicate: Predicate::Always,
            color: None,
            blink: None,
        };
        let rule = Rule::new("blank", Some(4), vec![entry]).unwrap();
        let default = Color::from("grey");
        assert_eq!(
            rule.choose(RuleValue::from(1)),
            Err(FallbackReason::NoColor)
        );
        assert_eq!(rule.evaluate(1, &default), default);
    }

    #[test]
    fn rules_need_entries() {
        assert_eq!(
            Rule::new("empty", Some(5), vec![]),
            Err(RuleError::EmptyRule("empty".to_string()))
        );
    }

    #[test]
    fn constant_rule() {
        let rule = Rule::constant("ink", Color::from("black"));
        assert_eq!(rule.index(), None);
        assert_eq!(rule.evaluate(-1e9, &Color::from("grey")).name(), "black");
        assert_eq!(rule.evaluate("nope", &Color::from("grey")).name(), "grey");
    }

    #[test]
    fn predicate_display() {
        let predicate = Predicate::And(
            Box::new(ge(0.0)),
            Box::new(Predicate::compare(CompareOp::Lt, 10.5)),
        );
        assert_eq!(predicate.to_string(), ">=0 && <10.5");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_round_trip() {
        let rule = Rule::new(
            "band",
            Some(2),
            vec![
                RuleEntry::new(
                    Predicate::And(
                        Box::new(Predicate::compare(CompareOp::Gt, 0.0)),
                        Box::new(Predicate::compare(CompareOp::Lt, 10.5)),
                    ),
                    "blue",
                )
                .with_blink("white"),
                RuleEntry::new(Predicate::Default, "black"),
            ],
        )
        .unwrap();
        let json = serde_json::to_string(&rule).unwrap();
        let restored: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, rule);
        assert_eq!(restored.evaluate(5.0, &Color::from("grey")).name(), "blue");
    }
}
