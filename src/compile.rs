use num_traits::ToPrimitive;
use thiserror::Error;

use crate::element::{
    is_literal, lookup_operand, lookup_operator, Code, Element, ElementKind, COND_END,
    OPERATOR_SPELLINGS,
};
use crate::program::{CompiledProgram, InputMask, Instruction};

/// Why a formula was rejected.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CompileErrorKind {
    #[error("empty expression")]
    Empty,
    #[error("unknown token")]
    UnknownToken,
    #[error("expected an operand")]
    ExpectedOperand,
    #[error("expected an operator")]
    ExpectedOperator,
    #[error("closing parenthesis without an opening one")]
    ParenNotOpen,
    #[error("missing closing parenthesis")]
    MissingCloseParen,
    #[error("misplaced argument separator")]
    BadSeparator,
    #[error("wrong number of function arguments")]
    ArgumentCount,
    #[error("bad conditional")]
    BadConditional,
    #[error("too many results")]
    TooManyResults,
    #[error("expression produces no result")]
    NoResult,
    #[error("bad numeric literal")]
    BadLiteral,
    #[error("store operator is not supported")]
    StoreNotSupported,
    #[error("input after expression terminator")]
    TrailingInput,
}

/// A formula that can never be evaluated.
///
/// `token` is the offending token (empty when the problem was detected at the
/// end of the input) and `position` its byte offset in the source.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind} at '{token}' (offset {position})")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub token: String,
    pub position: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub text: &'a str,
    pub position: usize,
}

/// Splits `source` on whitespace and on the operator alphabet.
///
/// Everything between operators is a word token. A sign directly after the
/// exponent marker of a decimal literal stays part of the literal.
pub(crate) fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut word_start: Option<usize> = None;

    let mut position = 0;
    while let Some(ch) = source[position..].chars().next() {
        if ch.is_whitespace() {
            push_word(&mut tokens, source, &mut word_start, position);
            position += ch.len_utf8();
            continue;
        }
        if let Some(start) = word_start {
            if continues_exponent(&source[start..position], ch) {
                position += 1;
                continue;
            }
        }
        let rest = &source[position..];
        if let Some(op) = OPERATOR_SPELLINGS.iter().find(|op| rest.starts_with(**op)) {
            push_word(&mut tokens, source, &mut word_start, position);
            tokens.push(Token {
                text: &source[position..position + op.len()],
                position,
            });
            position += op.len();
            continue;
        }
        word_start.get_or_insert(position);
        position += ch.len_utf8();
    }
    push_word(&mut tokens, source, &mut word_start, source.len());
    tokens
}

fn push_word<'a>(
    tokens: &mut Vec<Token<'a>>,
    source: &'a str,
    start: &mut Option<usize>,
    end: usize,
) {
    if let Some(start) = start.take() {
        tokens.push(Token {
            text: &source[start..end],
            position: start,
        });
    }
}

fn continues_exponent(word: &str, next: char) -> bool {
    (next == '+' || next == '-')
        && is_literal(word)
        && !word.starts_with("0x")
        && !word.starts_with("0X")
        && word.ends_with(['e', 'E'])
}

/// An operator waiting on the compiler's stack.
///
/// Argument bookkeeping lives here rather than in the shared [`Element`], so
/// the static tables are never mutated.
#[derive(Clone, Copy, Debug)]
struct Pending {
    element: &'static Element,
    stack_effect: i32,
    separators: i32,
}

impl Pending {
    fn new(element: &'static Element) -> Self {
        Self {
            element,
            stack_effect: element.stack_effect,
            separators: 0,
        }
    }
}

struct Compiler<'a> {
    source: &'a str,
    stack: Vec<Pending>,
    output: Vec<Instruction>,
    depth: i32,
    max_depth: i32,
    need_operand: bool,
    conditionals: u32,
    input_usage: InputMask,
    finished: bool,
}

/// Compiles an infix formula over the inputs `A`..`L` into an RPN program.
///
/// This is an operator-precedence parser: operands go straight to the output,
/// operators wait on a stack until an incoming token of lower priority forces
/// them out.
pub fn compile(source: &str) -> Result<CompiledProgram, CompileError> {
    let tokens = tokenize(source);
    let result = Compiler::new(source).run(&tokens);
    match &result {
        Ok(program) => tracing::debug!(
            "compiled '{}' into {} instructions",
            source,
            program.instructions.len()
        ),
        Err(err) => tracing::warn!("invalid expression '{}': {}", source, err),
    }
    result
}

impl<'a> Compiler<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            stack: Vec::new(),
            output: Vec::new(),
            depth: 0,
            max_depth: 0,
            need_operand: true,
            conditionals: 0,
            input_usage: InputMask::ZERO,
            finished: false,
        }
    }

    fn run(mut self, tokens: &[Token<'_>]) -> Result<CompiledProgram, CompileError> {
        if tokens.is_empty() {
            return Err(self.error_at_end(CompileErrorKind::Empty));
        }
        for token in tokens {
            if self.finished {
                return Err(error(CompileErrorKind::TrailingInput, token));
            }
            if self.need_operand {
                self.operand(token)?;
            } else {
                self.operator(token)?;
            }
        }
        if !self.finished {
            if self.need_operand {
                return Err(self.error_at_end(CompileErrorKind::ExpectedOperand));
            }
            let end = Token {
                text: "",
                position: self.source.len(),
            };
            self.terminate(&end)?;
        }
        self.output.push(Instruction::End);

        Ok(CompiledProgram {
            source: self.source.to_string(),
            instructions: self.output,
            max_depth: usize::try_from(self.max_depth).unwrap_or(0),
            input_usage: self.input_usage,
        })
    }

    fn operand(&mut self, token: &Token<'_>) -> Result<(), CompileError> {
        if is_literal(token.text) {
            let value = parse_literal(token.text)
                .ok_or_else(|| error(CompileErrorKind::BadLiteral, token))?;
            self.output.push(narrow_literal(value));
            self.adjust_depth(1);
            self.need_operand = false;
            return Ok(());
        }

        let spelling = token.text.to_ascii_uppercase();
        let Some(element) = lookup_operand(&spelling) else {
            let kind = if lookup_operator(&spelling).is_some() {
                CompileErrorKind::ExpectedOperand
            } else {
                CompileErrorKind::UnknownToken
            };
            return Err(error(kind, token));
        };

        match element.kind {
            ElementKind::Operand => {
                if let Code::Fetch(index) = element.code {
                    self.input_usage.set(index, true);
                }
                self.output
                    .extend(element.code.instruction(element.stack_effect));
                self.adjust_depth(element.stack_effect);
                self.need_operand = false;
            }
            ElementKind::UnaryOperator | ElementKind::VarargOperator | ElementKind::OpenParen => {
                self.pop_while(|top| top.stack_priority >= element.input_priority);
                self.stack.push(Pending::new(element));
            }
            _ => return Err(error(CompileErrorKind::ExpectedOperand, token)),
        }
        Ok(())
    }

    fn operator(&mut self, token: &Token<'_>) -> Result<(), CompileError> {
        let spelling = token.text.to_ascii_uppercase();
        let Some(element) = lookup_operator(&spelling) else {
            let kind = if is_literal(token.text) || lookup_operand(&spelling).is_some() {
                CompileErrorKind::ExpectedOperator
            } else {
                CompileErrorKind::UnknownToken
            };
            return Err(error(kind, token));
        };

        match element.kind {
            ElementKind::BinaryOperator => {
                self.pop_while(|top| top.stack_priority >= element.input_priority);
                self.stack.push(Pending::new(element));
                self.need_operand = true;
            }
            ElementKind::Separator => self.separator(token)?,
            ElementKind::CloseParen => self.close_paren(token)?,
            ElementKind::Conditional => self.conditional(element, token)?,
            ElementKind::Terminator => self.terminate(token)?,
            ElementKind::StoreOperator => {
                return Err(error(CompileErrorKind::StoreNotSupported, token))
            }
            _ => return Err(error(CompileErrorKind::ExpectedOperator, token)),
        }
        Ok(())
    }

    fn separator(&mut self, token: &Token<'_>) -> Result<(), CompileError> {
        self.pop_until_open_paren()
            .ok_or_else(|| error(CompileErrorKind::BadSeparator, token))?;

        // The function call that owns the parenthesis sits just below it.
        let owner = self
            .stack
            .len()
            .checked_sub(2)
            .and_then(|index| self.stack.get_mut(index))
            .ok_or_else(|| error(CompileErrorKind::BadSeparator, token))?;
        match owner.element.kind {
            ElementKind::VarargOperator => owner.stack_effect -= 1,
            ElementKind::UnaryOperator if owner.separators + 1 < owner.element.arity() => {}
            _ => return Err(error(CompileErrorKind::BadSeparator, token)),
        }
        owner.separators += 1;
        self.need_operand = true;
        Ok(())
    }

    fn close_paren(&mut self, token: &Token<'_>) -> Result<(), CompileError> {
        self.pop_until_open_paren()
            .ok_or_else(|| error(CompileErrorKind::ParenNotOpen, token))?;
        self.stack.pop();

        if let Some(owner) = self.stack.last() {
            if owner.element.kind == ElementKind::UnaryOperator
                && owner.separators + 1 != owner.element.arity()
            {
                return Err(error(CompileErrorKind::ArgumentCount, token));
            }
        }
        Ok(())
    }

    fn conditional(
        &mut self,
        element: &'static Element,
        token: &Token<'_>,
    ) -> Result<(), CompileError> {
        if element.code == Code::CondElse {
            if self.conditionals == 0 {
                return Err(error(CompileErrorKind::BadConditional, token));
            }
            self.conditionals -= 1;
        } else {
            self.conditionals += 1;
        }

        self.pop_while(|top| top.stack_priority > element.input_priority);
        self.output
            .extend(element.code.instruction(element.stack_effect));
        self.adjust_depth(element.stack_effect);
        if element.code == Code::CondElse {
            self.stack.push(Pending::new(&COND_END));
        }
        self.need_operand = true;
        Ok(())
    }

    fn terminate(&mut self, token: &Token<'_>) -> Result<(), CompileError> {
        while let Some(top) = self.stack.pop() {
            if top.element.kind == ElementKind::OpenParen {
                return Err(error(CompileErrorKind::MissingCloseParen, token));
            }
            self.emit(top);
        }
        if self.conditionals != 0 {
            return Err(error(CompileErrorKind::BadConditional, token));
        }
        match self.depth {
            1 => {}
            depth if depth < 1 => return Err(error(CompileErrorKind::NoResult, token)),
            _ => return Err(error(CompileErrorKind::TooManyResults, token)),
        }
        self.finished = true;
        Ok(())
    }

    /// Emits operators until an open parenthesis is on top of the stack.
    /// Returns `None` if the stack runs out first.
    fn pop_until_open_paren(&mut self) -> Option<()> {
        loop {
            let top = self.stack.last()?;
            if top.element.kind == ElementKind::OpenParen {
                return Some(());
            }
            if let Some(top) = self.stack.pop() {
                self.emit(top);
            }
        }
    }

    fn pop_while(&mut self, mut condition: impl FnMut(&Element) -> bool) {
        while self.stack.last().is_some_and(|top| condition(top.element)) {
            if let Some(top) = self.stack.pop() {
                self.emit(top);
            }
        }
    }

    fn emit(&mut self, pending: Pending) {
        self.output
            .extend(pending.element.code.instruction(pending.stack_effect));
        self.adjust_depth(pending.stack_effect);
    }

    fn adjust_depth(&mut self, effect: i32) {
        self.depth += effect;
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn error_at_end(&self, kind: CompileErrorKind) -> CompileError {
        CompileError {
            kind,
            token: String::new(),
            position: self.source.len(),
        }
    }
}

fn error(kind: CompileErrorKind, token: &Token<'_>) -> CompileError {
    CompileError {
        kind,
        token: token.text.to_string(),
        position: token.position,
    }
}

fn parse_literal(text: &str) -> Option<f64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok().and_then(|v| v.to_f64());
    }
    text.parse::<f64>().ok()
}

/// Literals that survive a round trip through `i32` are stored as integers.
fn narrow_literal(value: f64) -> Instruction {
    match value.to_i32() {
        Some(int) if f64::from(int) == value => Instruction::LiteralInt(int),
        _ => Instruction::LiteralDouble(value),
    }
}
