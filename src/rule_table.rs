use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::color::{Color, TRANSPARENT};
use crate::rule::{Rule, RuleError, RuleValue};
use crate::rule_parse::{define_rule, parse_source, Definition, RuleToken};

/// Longest alias chain [`RuleTable::lookup`] will follow.
pub const MAX_ALIAS_HOPS: usize = 10;

static TRANSPARENT_RULE: Lazy<Rule> =
    Lazy::new(|| Rule::constant(TRANSPARENT, Color::transparent()));

/// A rule is addressed either by name or by its numeric index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleKey<'a> {
    Name(&'a str),
    Index(u32),
}

impl<'a> From<&'a str> for RuleKey<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a String> for RuleKey<'a> {
    fn from(name: &'a String) -> Self {
        Self::Name(name)
    }
}

impl From<u32> for RuleKey<'_> {
    fn from(index: u32) -> Self {
        Self::Index(index)
    }
}

/// Every defined color rule, addressable by name, index, or alias.
///
/// Immutable once loaded; lookups only take `&self`.
#[derive(Clone, Debug, Default)]
pub struct RuleTable {
    by_name: HashMap<String, Rule>,
    index_to_name: HashMap<u32, String>,
    aliases: HashMap<String, String>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from rule source text.
    pub fn from_source(source: &str) -> Result<Self, RuleError> {
        let mut table = Self::new();
        for definition in parse_source(source)? {
            match definition {
                Definition::Rule(rule) => table.define(rule)?,
                Definition::Alias { name, target } => table.define_alias(name, target),
            }
        }
        tracing::debug!(
            "loaded {} color rules and {} aliases",
            table.by_name.len(),
            table.aliases.len()
        );
        Ok(table)
    }

    /// Adds `rule`. Names and indices must be unique.
    pub fn define(&mut self, rule: Rule) -> Result<(), RuleError> {
        if self.by_name.contains_key(rule.name()) {
            return Err(RuleError::DuplicateName(rule.name().to_string()));
        }
        if let Some(index) = rule.index() {
            if self.index_to_name.contains_key(&index) {
                return Err(RuleError::DuplicateIndex(index));
            }
            self.index_to_name.insert(index, rule.name().to_string());
        }
        tracing::debug!("defined color rule '{}'", rule.name());
        self.by_name.insert(rule.name().to_string(), rule);
        Ok(())
    }

    /// Parses a single `rule` block from pre-split tokens and adds it.
    pub fn define_tokens(&mut self, tokens: &[RuleToken]) -> Result<(), RuleError> {
        self.define(define_rule(tokens)?)
    }

    /// Makes `name` resolve to whatever `target` resolves to at lookup time.
    pub fn define_alias(&mut self, name: impl Into<String>, target: impl Into<String>) {
        let name = name.into();
        let target = target.into();
        if let Some(previous) = self.aliases.insert(name.clone(), target.clone()) {
            tracing::warn!("alias '{name}' redefined from '{previous}' to '{target}'");
        }
    }

    /// Direct lookup, without following aliases.
    pub fn get<'k>(&self, key: impl Into<RuleKey<'k>>) -> Option<&Rule> {
        match key.into() {
            RuleKey::Name(name) => self.direct(name),
            RuleKey::Index(index) => self
                .index_to_name
                .get(&index)
                .and_then(|name| self.direct(name)),
        }
    }

    /// Finds a rule, following at most [`MAX_ALIAS_HOPS`] aliases.
    pub fn lookup<'k>(&self, key: impl Into<RuleKey<'k>>) -> Option<&Rule> {
        let mut name: &str = match key.into() {
            RuleKey::Name(name) => name,
            RuleKey::Index(index) => self.index_to_name.get(&index).map(String::as_str)?,
        };
        for _ in 0..=MAX_ALIAS_HOPS {
            if let Some(rule) = self.direct(name) {
                return Some(rule);
            }
            match self.aliases.get(name) {
                Some(target) => name = target.as_str(),
                None => return None,
            }
        }
        tracing::warn!("alias chain for '{name}' exceeds {MAX_ALIAS_HOPS} hops");
        None
    }

    /// Colors `value` with the rule for `key`, or returns `default` if there
    /// is no such rule.
    pub fn evaluate<'k, 'v>(
        &self,
        key: impl Into<RuleKey<'k>>,
        value: impl Into<RuleValue<'v>>,
        default: &Color,
    ) -> Color {
        let key = key.into();
        match self.lookup(key) {
            Some(rule) => rule.evaluate(value, default),
            None => {
                tracing::warn!("no color rule for {key:?}, using {default}");
                default.clone()
            }
        }
    }

    /// Names of the defined rules, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn direct(&self, name: &str) -> Option<&Rule> {
        match self.by_name.get(name) {
            Some(rule) => Some(rule),
            None if name == TRANSPARENT => Some(&*TRANSPARENT_RULE),
            None => None,
        }
    }
}
