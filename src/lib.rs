//! CALC expressions and color rules for control-system display screens.
//!
//! Two small engines live here:
//!
//! - An expression compiler and stack evaluator. Formulas over up to twelve
//!   inputs `A`..`L` are compiled once into an RPN [`CompiledProgram`] and then
//!   evaluated every time an input changes. [`CalcPv`] wires this up to a set of
//!   input process variables.
//! - A color rule engine. A [`Rule`] maps a live value to a display color
//!   through an ordered list of threshold predicates; a [`RuleTable`] holds the
//!   rules of a color file, addressable by name, index or alias.
//!
//! Neither engine keeps mutable state between calls, and neither fails at
//! evaluation time: a broken program evaluates to `0.0`, and a rule that
//! cannot decide yields the caller's default color.
//!
//! # Example
//!
//! ```rust
//! use display_calc::*;
//!
//! let program = compile("A > B ? MAX(A, C) : B * 2").unwrap();
//! assert_eq!(program.evaluate(&[3.0, 1.0, 7.0]), 7.0);
//! assert_eq!(program.evaluate(&[1.0, 3.0, 7.0]), 6.0);
//!
//! let table = RuleTable::from_source(
//!     r#"
//!     rule 1 level {
//!         >=90    : red white
//!         >=50    : yellow
//!         default : green
//!     }
//!     alias tank level
//!     "#,
//! )
//! .unwrap();
//! let grey = Color::from("grey");
//! let rule = table.lookup("tank").unwrap();
//! assert_eq!(rule.evaluate(95.0, &grey).name(), "red");
//! assert_eq!(rule.evaluate("n/a", &grey), grey);
//! ```

mod calc_pv;
mod color;
mod compile;
mod element;
mod evaluate;
mod program;
mod rule;
mod rule_parse;
mod rule_table;

/// Color rule sources are lexed with the [`pest`] parsing expression grammar
/// language.
///
/// ```text
#[doc = include_str!("rule_source.pest")]
/// ```
pub mod rule_grammar_doc {}

pub use calc_pv::*;
pub use color::*;
pub use compile::{compile, CompileError, CompileErrorKind};
pub use evaluate::EvalError;
pub use program::*;
pub use rule::*;
pub use rule_parse::{
    define_rule, lex, parse_entry, parse_predicate, parse_source, Definition, RuleToken, TokenKind,
};
pub use rule_table::*;
