use num_traits::ToPrimitive;
use thiserror::Error;

use crate::program::{BinaryOp, CompiledProgram, Constant, Instruction, UnaryOp, VarArgOp};

#[cfg(feature = "rayon")]
use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};

/// Internal-consistency failures while running a program.
///
/// A program produced by [`compile`](crate::compile) never triggers these;
/// they indicate a defect or a hand-built program.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("evaluation stack underflow")]
    StackUnderflow,
    #[error("program left {0} values on the stack")]
    ResultCount(usize),
    #[error("program has no end marker")]
    MissingEnd,
    #[error("input {0} was not supplied")]
    InputOutOfRange(usize),
    #[error("conditional without a matching branch")]
    UnmatchedConditional,
}

impl CompiledProgram {
    /// Runs the program against `inputs` (`inputs[0]` is `A`).
    ///
    /// Never fails: an internal error is logged and yields `0.0`.
    pub fn evaluate(&self, inputs: &[f64]) -> f64 {
        let mut stack = Vec::with_capacity(self.max_depth);
        self.evaluate_with(inputs, &mut stack)
    }

    /// Like [`evaluate`](Self::evaluate), but reports internal errors.
    pub fn try_evaluate(&self, inputs: &[f64]) -> Result<f64, EvalError> {
        let mut stack = Vec::with_capacity(self.max_depth);
        self.run(inputs, &mut stack)
    }

    /// Evaluates the program once per row of inputs.
    ///
    /// Scratch stacks are reused across rows (one per worker with the `rayon`
    /// feature).
    pub fn evaluate_rows<R: AsRef<[f64]> + Sync>(&self, rows: &[R]) -> Vec<f64> {
        #[cfg(feature = "rayon")]
        {
            rows.par_iter()
                .map_init(
                    || Vec::with_capacity(self.max_depth),
                    |stack, row| self.evaluate_with(row.as_ref(), stack),
                )
                .collect()
        }
        #[cfg(not(feature = "rayon"))]
        {
            let mut stack = Vec::with_capacity(self.max_depth);
            rows.iter()
                .map(|row| self.evaluate_with(row.as_ref(), &mut stack))
                .collect()
        }
    }

    fn evaluate_with(&self, inputs: &[f64], stack: &mut Vec<f64>) -> f64 {
        match self.run(inputs, stack) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!("internal error evaluating '{}': {}", self.source, err);
                0.0
            }
        }
    }

    fn run(&self, inputs: &[f64], stack: &mut Vec<f64>) -> Result<f64, EvalError> {
        stack.clear();
        let program = &self.instructions;
        let mut pc = 0;

        while let Some(instruction) = program.get(pc) {
            pc += 1;
            match *instruction {
                Instruction::End => {
                    return match stack.as_slice() {
                        [value] => Ok(*value),
                        values => Err(EvalError::ResultCount(values.len())),
                    };
                }
                Instruction::LiteralDouble(value) => stack.push(value),
                Instruction::LiteralInt(value) => stack.push(f64::from(value)),
                Instruction::Fetch(index) => {
                    let value = inputs
                        .get(index)
                        .copied()
                        .ok_or(EvalError::InputOutOfRange(index))?;
                    stack.push(value);
                }
                Instruction::Const(constant) => stack.push(constant.value()),
                Instruction::Unary(op) => {
                    let x = pop(stack)?;
                    stack.push(op.apply(x));
                }
                Instruction::Binary(op) => {
                    let y = pop(stack)?;
                    let x = pop(stack)?;
                    stack.push(op.apply(x, y));
                }
                Instruction::VarArg(op, argc) => {
                    let start = stack
                        .len()
                        .checked_sub(argc)
                        .filter(|_| argc > 0)
                        .ok_or(EvalError::StackUnderflow)?;
                    let value = op.apply(&stack[start..]);
                    stack.truncate(start);
                    stack.push(value);
                }
                Instruction::CondIf => {
                    if pop(stack)? == 0.0 {
                        pc = skip_to(program, pc, Instruction::CondElse)?;
                    }
                }
                Instruction::CondElse => pc = skip_to(program, pc, Instruction::CondEnd)?,
                Instruction::CondEnd => {}
            }
        }
        Err(EvalError::MissingEnd)
    }
}

fn pop(stack: &mut Vec<f64>) -> Result<f64, EvalError> {
    stack.pop().ok_or(EvalError::StackUnderflow)
}

/// Finds the `target` paired with the conditional just executed and returns
/// the position after it. Nested `COND_IF`s each consume one extra `target`.
fn skip_to(program: &[Instruction], from: usize, target: Instruction) -> Result<usize, EvalError> {
    let mut pending = 1;
    for (offset, instruction) in program[from..].iter().enumerate() {
        match *instruction {
            Instruction::End => break,
            Instruction::CondIf => pending += 1,
            found if found == target => {
                pending -= 1;
                if pending == 0 {
                    return Ok(from + offset + 1);
                }
            }
            _ => {}
        }
    }
    Err(EvalError::UnmatchedConditional)
}

fn flag(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

/// Truncates toward zero into 32 bits; values with no integer meaning
/// (NaN, infinities, out of `i64` range) become 0.
fn to_bits(value: f64) -> i32 {
    value.to_i64().map_or(0, |v| v as i32)
}

/// `NaN` in either operand wins.
fn max_nan(x: f64, y: f64) -> f64 {
    if x > y || x.is_nan() {
        x
    } else {
        y
    }
}

fn min_nan(x: f64, y: f64) -> f64 {
    if x < y || x.is_nan() {
        x
    } else {
        y
    }
}

impl Constant {
    pub fn value(self) -> f64 {
        use std::f64::consts::PI;
        match self {
            Self::Pi => PI,
            Self::D2R => PI / 180.0,
            Self::R2D => 180.0 / PI,
            Self::Inf => f64::INFINITY,
            Self::Nan => f64::NAN,
            Self::Random => rand::random::<f64>(),
        }
    }
}

impl UnaryOp {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Self::Neg => -x,
            Self::RelNot => flag(x == 0.0),
            Self::BitNot => f64::from(!to_bits(x)),
            Self::Abs => x.abs(),
            Self::Acos => x.acos(),
            Self::Asin => x.asin(),
            Self::Atan => x.atan(),
            Self::Ceil => x.ceil(),
            Self::Cos => x.cos(),
            Self::Cosh => x.cosh(),
            Self::Exp => x.exp(),
            Self::Floor => x.floor(),
            Self::IsInf => flag(x.is_infinite()),
            Self::Ln => x.ln(),
            Self::Log10 => x.log10(),
            // Halfway cases round away from zero.
            Self::Nint => x.round(),
            Self::Sin => x.sin(),
            Self::Sinh => x.sinh(),
            Self::Sqrt => x.sqrt(),
            Self::Tan => x.tan(),
            Self::Tanh => x.tanh(),
        }
    }
}

impl BinaryOp {
    pub fn apply(self, x: f64, y: f64) -> f64 {
        match self {
            Self::Add => x + y,
            Self::Sub => x - y,
            Self::Mul => x * y,
            Self::Div => x / y,
            Self::Mod => x % y,
            Self::Pow => x.powf(y),
            Self::Atan2 => x.atan2(y),
            Self::Max => max_nan(x, y),
            Self::Min => min_nan(x, y),
            Self::Eq => flag(x == y),
            Self::Ne => flag(x != y),
            Self::Lt => flag(x < y),
            Self::Le => flag(x <= y),
            Self::Gt => flag(x > y),
            Self::Ge => flag(x >= y),
            // Both operands are already on the stack: no short-circuit.
            Self::RelAnd => flag(x != 0.0 && y != 0.0),
            Self::RelOr => flag(x != 0.0 || y != 0.0),
            Self::BitAnd => f64::from(to_bits(x) & to_bits(y)),
            Self::BitOr => f64::from(to_bits(x) | to_bits(y)),
            Self::BitXor => f64::from(to_bits(x) ^ to_bits(y)),
            Self::Shl => f64::from(to_bits(x).wrapping_shl(to_bits(y) as u32)),
            Self::Shr => f64::from(to_bits(x).wrapping_shr(to_bits(y) as u32)),
        }
    }
}

impl VarArgOp {
    pub fn apply(self, args: &[f64]) -> f64 {
        match self {
            Self::Max => args.iter().copied().reduce(max_nan).unwrap_or(f64::NAN),
            Self::Min => args.iter().copied().reduce(min_nan).unwrap_or(f64::NAN),
            Self::Finite => flag(args.iter().all(|v| v.is_finite())),
            Self::IsNan => flag(args.iter().any(|v| v.is_nan())),
        }
    }
}
