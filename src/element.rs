//! Parse tables for the expression compiler.
//!
//! Every token spelling maps to an immutable [`Element`]. There are two
//! tables because the same spelling can mean different things depending on
//! whether the compiler is waiting for an operand (`-` is negation) or for an
//! operator (`-` is subtraction).

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::program::{BinaryOp, Constant, Instruction, UnaryOp, VarArgOp, NUM_INPUTS};

/// Syntactic role of a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementKind {
    Operand,
    UnaryOperator,
    BinaryOperator,
    VarargOperator,
    Separator,
    OpenParen,
    CloseParen,
    Conditional,
    Terminator,
    StoreOperator,
}

/// What an element contributes to the compiled program.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Code {
    NotGenerated,
    Fetch(usize),
    Const(Constant),
    Unary(UnaryOp),
    Binary(BinaryOp),
    VarArg(VarArgOp),
    CondIf,
    CondElse,
    CondEnd,
    Store,
}

impl Code {
    /// The instruction to emit, given the (possibly call-local) stack effect.
    pub(crate) fn instruction(self, stack_effect: i32) -> Option<Instruction> {
        match self {
            Self::NotGenerated | Self::Store => None,
            Self::Fetch(index) => Some(Instruction::Fetch(index)),
            Self::Const(constant) => Some(Instruction::Const(constant)),
            Self::Unary(op) => Some(Instruction::Unary(op)),
            Self::Binary(op) => Some(Instruction::Binary(op)),
            Self::VarArg(op) => {
                let argc = usize::try_from(1 - stack_effect).unwrap_or(1);
                Some(Instruction::VarArg(op, argc))
            }
            Self::CondIf => Some(Instruction::CondIf),
            Self::CondElse => Some(Instruction::CondElse),
            Self::CondEnd => Some(Instruction::CondEnd),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Element {
    pub name: &'static str,
    pub kind: ElementKind,
    /// Precedence while sitting on the operator stack.
    pub stack_priority: u8,
    /// Precedence of the incoming token.
    pub input_priority: u8,
    /// Net change in evaluation stack depth when executed.
    pub stack_effect: i32,
    pub code: Code,
}

impl Element {
    /// Number of operands a prefix function consumes.
    pub fn arity(&self) -> i32 {
        1 - self.stack_effect
    }
}

const fn operand(name: &'static str, code: Code) -> Element {
    Element {
        name,
        kind: ElementKind::Operand,
        stack_priority: 0,
        input_priority: 0,
        stack_effect: 1,
        code,
    }
}

const fn unary(name: &'static str, op: UnaryOp) -> Element {
    Element {
        name,
        kind: ElementKind::UnaryOperator,
        stack_priority: 7,
        input_priority: 8,
        stack_effect: 0,
        code: Code::Unary(op),
    }
}

const fn function2(name: &'static str, op: BinaryOp) -> Element {
    Element {
        name,
        kind: ElementKind::UnaryOperator,
        stack_priority: 7,
        input_priority: 8,
        stack_effect: -1,
        code: Code::Binary(op),
    }
}

const fn vararg(name: &'static str, op: VarArgOp) -> Element {
    Element {
        name,
        kind: ElementKind::VarargOperator,
        stack_priority: 7,
        input_priority: 8,
        stack_effect: 0,
        code: Code::VarArg(op),
    }
}

const fn binary(name: &'static str, priority: u8, op: BinaryOp) -> Element {
    Element {
        name,
        kind: ElementKind::BinaryOperator,
        stack_priority: priority,
        input_priority: priority,
        stack_effect: -1,
        code: Code::Binary(op),
    }
}

const fn punctuation(
    name: &'static str,
    kind: ElementKind,
    stack_effect: i32,
    code: Code,
) -> Element {
    Element {
        name,
        kind,
        stack_priority: 0,
        input_priority: 0,
        stack_effect,
        code,
    }
}

/// Pushed after `:` so the end of the else-branch can be found later.
pub static COND_END: Element =
    punctuation("<cond-end>", ElementKind::Conditional, 0, Code::CondEnd);

const OPEN_PAREN: Element = Element {
    name: "(",
    kind: ElementKind::OpenParen,
    stack_priority: 0,
    input_priority: 8,
    stack_effect: 0,
    code: Code::NotGenerated,
};

const INPUT_NAMES: [&str; NUM_INPUTS] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L",
];

const OPERAND_ELEMENTS: &[Element] = &[
    OPEN_PAREN,
    unary("-", UnaryOp::Neg),
    unary("!", UnaryOp::RelNot),
    unary("~", UnaryOp::BitNot),
    unary("NOT", UnaryOp::BitNot),
    unary("ABS", UnaryOp::Abs),
    unary("ACOS", UnaryOp::Acos),
    unary("ASIN", UnaryOp::Asin),
    unary("ATAN", UnaryOp::Atan),
    function2("ATAN2", BinaryOp::Atan2),
    unary("CEIL", UnaryOp::Ceil),
    unary("COS", UnaryOp::Cos),
    unary("COSH", UnaryOp::Cosh),
    unary("EXP", UnaryOp::Exp),
    vararg("FINITE", VarArgOp::Finite),
    unary("FLOOR", UnaryOp::Floor),
    unary("ISINF", UnaryOp::IsInf),
    vararg("ISNAN", VarArgOp::IsNan),
    unary("LN", UnaryOp::Ln),
    unary("LOG", UnaryOp::Log10),
    unary("LOGE", UnaryOp::Ln),
    vararg("MAX", VarArgOp::Max),
    vararg("MIN", VarArgOp::Min),
    unary("NINT", UnaryOp::Nint),
    unary("SIN", UnaryOp::Sin),
    unary("SINH", UnaryOp::Sinh),
    unary("SQR", UnaryOp::Sqrt),
    unary("SQRT", UnaryOp::Sqrt),
    unary("TAN", UnaryOp::Tan),
    unary("TANH", UnaryOp::Tanh),
    operand("PI", Code::Const(Constant::Pi)),
    operand("D2R", Code::Const(Constant::D2R)),
    operand("R2D", Code::Const(Constant::R2D)),
    operand("INF", Code::Const(Constant::Inf)),
    operand("NAN", Code::Const(Constant::Nan)),
    operand("RNDM", Code::Const(Constant::Random)),
];

const OPERATOR_ELEMENTS: &[Element] = &[
    binary("+", 4, BinaryOp::Add),
    binary("-", 4, BinaryOp::Sub),
    binary("*", 5, BinaryOp::Mul),
    binary("/", 5, BinaryOp::Div),
    binary("%", 5, BinaryOp::Mod),
    binary("^", 6, BinaryOp::Pow),
    binary("**", 6, BinaryOp::Pow),
    binary(">?", 4, BinaryOp::Max),
    binary("<?", 4, BinaryOp::Min),
    binary("<", 3, BinaryOp::Lt),
    binary("<=", 3, BinaryOp::Le),
    binary(">", 3, BinaryOp::Gt),
    binary(">=", 3, BinaryOp::Ge),
    binary("=", 3, BinaryOp::Eq),
    binary("==", 3, BinaryOp::Eq),
    binary("!=", 3, BinaryOp::Ne),
    binary("#", 3, BinaryOp::Ne),
    binary("&&", 2, BinaryOp::RelAnd),
    binary("&", 2, BinaryOp::BitAnd),
    binary("AND", 2, BinaryOp::BitAnd),
    binary("<<", 2, BinaryOp::Shl),
    binary(">>", 2, BinaryOp::Shr),
    binary("||", 1, BinaryOp::RelOr),
    binary("|", 1, BinaryOp::BitOr),
    binary("OR", 1, BinaryOp::BitOr),
    binary("XOR", 1, BinaryOp::BitXor),
    punctuation("?", ElementKind::Conditional, -1, Code::CondIf),
    punctuation(":", ElementKind::Conditional, -1, Code::CondElse),
    punctuation(":=", ElementKind::StoreOperator, -1, Code::Store),
    punctuation(",", ElementKind::Separator, 0, Code::NotGenerated),
    punctuation(")", ElementKind::CloseParen, 0, Code::NotGenerated),
    punctuation(";", ElementKind::Terminator, 0, Code::NotGenerated),
];

static OPERANDS: Lazy<HashMap<&'static str, Element>> = Lazy::new(|| {
    let inputs = INPUT_NAMES
        .iter()
        .enumerate()
        .map(|(index, name)| operand(*name, Code::Fetch(index)));
    OPERAND_ELEMENTS
        .iter()
        .copied()
        .chain(inputs)
        .map(|element| (element.name, element))
        .collect()
});

static OPERATORS: Lazy<HashMap<&'static str, Element>> = Lazy::new(|| {
    OPERATOR_ELEMENTS
        .iter()
        .map(|element| (element.name, *element))
        .collect()
});

/// Looks up a token that appears where an operand is expected.
///
/// `spelling` must already be upper-cased. Numeric literals are not in the
/// table; see [`is_literal`].
pub fn lookup_operand(spelling: &str) -> Option<&'static Element> {
    OPERANDS.get(spelling)
}

/// Looks up a token that appears where an operator is expected.
pub fn lookup_operator(spelling: &str) -> Option<&'static Element> {
    OPERATORS.get(spelling)
}

/// Numeric literals start with a digit or a decimal point.
pub fn is_literal(token: &str) -> bool {
    token
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_digit() || c == '.')
}

/// Operator spellings recognised by the tokenizer, longest first so that
/// `<=` is never split into `<` and `=`.
pub const OPERATOR_SPELLINGS: &[&str] = &[
    "**", "<=", ">=", "==", "!=", "&&", "||", "<<", ">>", ":=", ">?", "<?", "(", ")", "+", "-", "*",
    "/", "%", "^", "<", ">", "=", "#", "&", "|", "!", "~", "?", ":", ";", ",",
];
