use std::fmt;

use bitvec::prelude::*;

/// Number of named inputs, `A` through `L`.
pub const NUM_INPUTS: usize = 12;

/// One bit per named input, set when the program fetches that input.
pub type InputMask = BitArr!(for NUM_INPUTS, in u16);

/// Zero-argument operands.
///
/// `Random` is the only one that is not constant: it yields a fresh uniform
/// sample in `[0, 1)` every time it is executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Constant {
    Pi,
    D2R,
    R2D,
    Inf,
    Nan,
    Random,
}

/// Operators that pop one value and push one value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    RelNot,
    BitNot,
    Abs,
    Acos,
    Asin,
    Atan,
    Ceil,
    Cos,
    Cosh,
    Exp,
    Floor,
    IsInf,
    Ln,
    Log10,
    Nint,
    Sin,
    Sinh,
    Sqrt,
    Tan,
    Tanh,
}

/// Operators that pop two values and push one value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Atan2,
    Max,
    Min,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    RelAnd,
    RelOr,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

/// Function-style operators taking one or more comma-separated arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarArgOp {
    Max,
    Min,
    Finite,
    IsNan,
}

/// A single step of a compiled (reverse-Polish) program.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Instruction {
    LiteralDouble(f64),
    /// Literal that round-trips exactly through `i32`.
    LiteralInt(i32),
    /// Push `inputs[index]`.
    Fetch(usize),
    Const(Constant),
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// Operator plus the number of arguments it pops.
    VarArg(VarArgOp, usize),
    CondIf,
    CondElse,
    CondEnd,
    End,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LiteralDouble(value) => write!(f, "LITERAL_DOUBLE {value}"),
            Self::LiteralInt(value) => write!(f, "LITERAL_INT {value}"),
            Self::Fetch(index) => write!(f, "FETCH_{}", input_name(*index)),
            Self::Const(constant) => write!(f, "{}", upper_debug(constant)),
            Self::Unary(op) => write!(f, "{}", upper_debug(op)),
            Self::Binary(op) => write!(f, "{}", upper_debug(op)),
            Self::VarArg(op, argc) => write!(f, "{} {argc}", upper_debug(op)),
            Self::CondIf => f.write_str("COND_IF"),
            Self::CondElse => f.write_str("COND_ELSE"),
            Self::CondEnd => f.write_str("COND_END"),
            Self::End => f.write_str("END"),
        }
    }
}

fn upper_debug(value: &impl fmt::Debug) -> String {
    format!("{value:?}").to_ascii_uppercase()
}

/// Spelling of the input at `index` (`0` is `A`).
pub fn input_name(index: usize) -> char {
    match u8::try_from(index) {
        Ok(offset) if index < NUM_INPUTS => char::from(b'A' + offset),
        _ => '?',
    }
}

/// The output of [`compile`](crate::compile): an immutable RPN program that
/// can be evaluated any number of times.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledProgram {
    pub(crate) source: String,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) max_depth: usize,
    pub(crate) input_usage: InputMask,
}

impl CompiledProgram {
    /// The formula text this program was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Instructions, always terminated by [`Instruction::End`].
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Peak evaluation stack depth, computed at compile time.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Which of the inputs `A`..`L` the program reads.
    pub fn input_usage(&self) -> &InputMask {
        &self.input_usage
    }

    pub fn uses_input(&self, index: usize) -> bool {
        self.input_usage.get(index).map_or(false, |bit| *bit)
    }
}

impl fmt::Display for CompiledProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instruction in &self.instructions {
            writeln!(f, "{instruction}")?;
        }
        Ok(())
    }
}
