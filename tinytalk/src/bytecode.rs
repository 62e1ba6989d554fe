use std::fmt;

/// Instruction opcodes, stored in the high nibble of an instruction byte.
/// The low nibble is the operand unless the opcode is [`Op::Extended`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Prefix: the low nibble is the real opcode, the next byte its operand.
    Extended = 0,
    /// Push instance variable `n` of the receiver.
    PushInstance = 1,
    /// Push argument `n`, argument 0 being the receiver.
    PushArgument = 2,
    PushTemporary = 3,
    PushLiteral = 4,
    /// Push one of the constants in [`constant`].
    PushConstant = 5,
    /// Store the stack top into instance variable `n`, leaving it on the stack.
    AssignInstance = 6,
    /// Store the stack top into temporary `n`, leaving it on the stack.
    AssignTemporary = 7,
    /// Mark the last `n` stack entries as receiver and arguments of the next send.
    MarkArguments = 8,
    /// Send the selector in literal `n` to the marked arguments.
    SendMessage = 9,
    /// Send unary special selector `n` to the stack top.
    SendUnary = 10,
    /// Send binary special selector `n` to the top two stack entries.
    SendBinary = 11,
    /// Run the primitive numbered by the next byte on the top `n` stack entries.
    DoPrimitive = 13,
    /// One of the operations in [`special`].
    DoSpecial = 15,
}

impl Op {
    pub fn from_nibble(nibble: u8) -> Option<Op> {
        Some(match nibble {
            0 => Op::Extended,
            1 => Op::PushInstance,
            2 => Op::PushArgument,
            3 => Op::PushTemporary,
            4 => Op::PushLiteral,
            5 => Op::PushConstant,
            6 => Op::AssignInstance,
            7 => Op::AssignTemporary,
            8 => Op::MarkArguments,
            9 => Op::SendMessage,
            10 => Op::SendUnary,
            11 => Op::SendBinary,
            13 => Op::DoPrimitive,
            15 => Op::DoSpecial,
            _ => return None,
        })
    }
}

/// Operands of [`Op::PushConstant`]. 0, 1 and 2 push themselves.
pub mod constant {
    pub const MINUS_ONE: u8 = 3;
    pub const CONTEXT: u8 = 4;
    pub const NIL: u8 = 5;
    pub const TRUE: u8 = 6;
    pub const FALSE: u8 = 7;
}

/// Operands of [`Op::DoSpecial`]. Branches and super sends take the next byte.
pub mod special {
    pub const SELF_RETURN: u8 = 1;
    pub const STACK_RETURN: u8 = 2;
    pub const BLOCK_RETURN: u8 = 3;
    pub const DUPLICATE: u8 = 4;
    pub const POP_TOP: u8 = 5;
    pub const BRANCH: u8 = 6;
    pub const BRANCH_IF_TRUE: u8 = 7;
    pub const BRANCH_IF_FALSE: u8 = 8;
    pub const AND_BRANCH: u8 = 9;
    pub const OR_BRANCH: u8 = 10;
    pub const SEND_TO_SUPER: u8 = 11;
}

/// Selectors of [`Op::SendUnary`], by operand.
pub const UNARY_SELECTORS: [&str; 9] = [
    "isNil",
    "notNil",
    "value",
    "new",
    "class",
    "size",
    "basicSize",
    "print",
    "printString",
];

/// Selectors of [`Op::SendBinary`], by operand. The first
/// [`INLINED_BINARY_SELECTORS`] map onto integer primitives 60 and up.
pub const BINARY_SELECTORS: [&str; 16] = [
    "+", "-", "<", ">", "<=", ">=", "=", "~=", "*", "quo:", "rem:", "bitAnd:", "bitXor:",
    "==", ",", "at:",
];

pub const INLINED_BINARY_SELECTORS: u8 = 13;

/// Sent in place of a selector no class understands.
pub const DOES_NOT_UNDERSTAND: &str = "message:notRecognizedWithArguments:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    PushInstance(u8),
    PushArgument(u8),
    PushTemporary(u8),
    PushLiteral(u8),
    PushConstant(u8),
    AssignInstance(u8),
    AssignTemporary(u8),
    MarkArguments(u8),
    SendMessage(u8),
    SendUnary(u8),
    SendBinary(u8),
    DoPrimitive { args: u8, number: u8 },
    SelfReturn,
    StackReturn,
    BlockReturn,
    Duplicate,
    PopTop,
    Branch(u8),
    BranchIfTrue(u8),
    BranchIfFalse(u8),
    AndBranch(u8),
    OrBranch(u8),
    SendToSuper(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError {
    pub byte: u8,
}

impl Instruction {
    /// Decodes one instruction, pulling bytes from `next`.
    /// A stream that ends inside an instruction reads as zero bytes.
    pub fn decode(mut next: impl FnMut() -> u8) -> Result<Instruction, DecodeError> {
        let byte = next();
        let (mut high, mut low) = (byte >> 4, byte & 0x0f);
        if high == Op::Extended as u8 {
            high = low;
            low = next();
        }
        let op = Op::from_nibble(high).ok_or(DecodeError { byte })?;
        Ok(match op {
            Op::Extended => return Err(DecodeError { byte }),
            Op::PushInstance => Instruction::PushInstance(low),
            Op::PushArgument => Instruction::PushArgument(low),
            Op::PushTemporary => Instruction::PushTemporary(low),
            Op::PushLiteral => Instruction::PushLiteral(low),
            Op::PushConstant => Instruction::PushConstant(low),
            Op::AssignInstance => Instruction::AssignInstance(low),
            Op::AssignTemporary => Instruction::AssignTemporary(low),
            Op::MarkArguments => Instruction::MarkArguments(low),
            Op::SendMessage => Instruction::SendMessage(low),
            Op::SendUnary => Instruction::SendUnary(low),
            Op::SendBinary => Instruction::SendBinary(low),
            Op::DoPrimitive => Instruction::DoPrimitive {
                args: low,
                number: next(),
            },
            Op::DoSpecial => match low {
                special::SELF_RETURN => Instruction::SelfReturn,
                special::STACK_RETURN => Instruction::StackReturn,
                special::BLOCK_RETURN => Instruction::BlockReturn,
                special::DUPLICATE => Instruction::Duplicate,
                special::POP_TOP => Instruction::PopTop,
                special::BRANCH => Instruction::Branch(next()),
                special::BRANCH_IF_TRUE => Instruction::BranchIfTrue(next()),
                special::BRANCH_IF_FALSE => Instruction::BranchIfFalse(next()),
                special::AND_BRANCH => Instruction::AndBranch(next()),
                special::OR_BRANCH => Instruction::OrBranch(next()),
                special::SEND_TO_SUPER => Instruction::SendToSuper(next()),
                _ => return Err(DecodeError { byte }),
            },
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PushInstance(n) => write!(f, "PushInstance {n}"),
            Self::PushArgument(n) => write!(f, "PushArgument {n}"),
            Self::PushTemporary(n) => write!(f, "PushTemporary {n}"),
            Self::PushLiteral(n) => write!(f, "PushLiteral #{n}"),
            Self::PushConstant(n) => match *n {
                0..=2 => write!(f, "PushConstant {n}"),
                constant::MINUS_ONE => write!(f, "PushConstant -1"),
                constant::CONTEXT => write!(f, "PushConstant thisContext"),
                constant::NIL => write!(f, "PushConstant nil"),
                constant::TRUE => write!(f, "PushConstant true"),
                constant::FALSE => write!(f, "PushConstant false"),
                _ => write!(f, "PushConstant ?{n}"),
            },
            Self::AssignInstance(n) => write!(f, "AssignInstance {n}"),
            Self::AssignTemporary(n) => write!(f, "AssignTemporary {n}"),
            Self::MarkArguments(n) => write!(f, "MarkArguments {n}"),
            Self::SendMessage(n) => write!(f, "SendMessage #{n}"),
            Self::SendUnary(n) => match UNARY_SELECTORS.get(*n as usize) {
                Some(name) => write!(f, "SendUnary {name}"),
                None => write!(f, "SendUnary ?{n}"),
            },
            Self::SendBinary(n) => match BINARY_SELECTORS.get(*n as usize) {
                Some(name) => write!(f, "SendBinary {name}"),
                None => write!(f, "SendBinary ?{n}"),
            },
            Self::DoPrimitive { args, number } => write!(f, "DoPrimitive {number} ({args})"),
            Self::SelfReturn => write!(f, "SelfReturn"),
            Self::StackReturn => write!(f, "StackReturn"),
            Self::BlockReturn => write!(f, "BlockReturn"),
            Self::Duplicate => write!(f, "Duplicate"),
            Self::PopTop => write!(f, "PopTop"),
            Self::Branch(t) => write!(f, "Branch {t}"),
            Self::BranchIfTrue(t) => write!(f, "BranchIfTrue {t}"),
            Self::BranchIfFalse(t) => write!(f, "BranchIfFalse {t}"),
            Self::AndBranch(t) => write!(f, "AndBranch {t}"),
            Self::OrBranch(t) => write!(f, "OrBranch {t}"),
            Self::SendToSuper(n) => write!(f, "SendToSuper #{n}"),
        }
    }
}

/// Decodes a whole bytecode array into `(offset, instruction)` pairs.
/// Stops at the first undecodable byte.
pub fn disassemble(bytes: &[u8]) -> Vec<(usize, Instruction)> {
    let mut pos = 0;
    let mut out = Vec::new();
    while pos < bytes.len() {
        let start = pos;
        let decoded = Instruction::decode(|| {
            let byte = bytes.get(pos).copied().unwrap_or(0);
            pos += 1;
            byte
        });
        match decoded {
            Ok(instruction) => out.push((start, instruction)),
            Err(_) => break,
        }
    }
    out
}

/// A forward branch waiting for its target.
#[derive(Debug)]
pub struct Label {
    operand_pos: usize,
}

/// Assembles method bytecode.
///
/// Operands above 15 are emitted with the [`Op::Extended`] prefix
/// automatically. Branch targets are absolute byte offsets and must fit a byte.
#[derive(Debug, Default)]
pub struct MethodBuilder {
    buf: Vec<u8>,
}

impl MethodBuilder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn emit(&mut self, op: Op, operand: u8) -> &mut Self {
        if operand < 16 {
            self.buf.push((op as u8) << 4 | operand);
        } else {
            self.buf.push(op as u8);
            self.buf.push(operand);
        }
        self
    }

    pub fn push_instance(&mut self, n: u8) -> &mut Self {
        self.emit(Op::PushInstance, n)
    }

    pub fn push_argument(&mut self, n: u8) -> &mut Self {
        self.emit(Op::PushArgument, n)
    }

    pub fn push_temporary(&mut self, n: u8) -> &mut Self {
        self.emit(Op::PushTemporary, n)
    }

    pub fn push_literal(&mut self, n: u8) -> &mut Self {
        self.emit(Op::PushLiteral, n)
    }

    pub fn push_constant(&mut self, c: u8) -> &mut Self {
        self.emit(Op::PushConstant, c)
    }

    pub fn push_self(&mut self) -> &mut Self {
        self.push_argument(0)
    }

    pub fn assign_instance(&mut self, n: u8) -> &mut Self {
        self.emit(Op::AssignInstance, n)
    }

    pub fn assign_temporary(&mut self, n: u8) -> &mut Self {
        self.emit(Op::AssignTemporary, n)
    }

    pub fn mark_arguments(&mut self, n: u8) -> &mut Self {
        self.emit(Op::MarkArguments, n)
    }

    /// `MarkArguments argc + 1` followed by a send of literal `selector`.
    pub fn send(&mut self, selector: u8, argc: u8) -> &mut Self {
        self.mark_arguments(argc + 1);
        self.emit(Op::SendMessage, selector)
    }

    pub fn send_unary(&mut self, n: u8) -> &mut Self {
        self.emit(Op::SendUnary, n)
    }

    pub fn send_binary(&mut self, n: u8) -> &mut Self {
        self.emit(Op::SendBinary, n)
    }

    pub fn primitive(&mut self, args: u8, number: u8) -> &mut Self {
        self.emit(Op::DoPrimitive, args);
        self.buf.push(number);
        self
    }

    pub fn special(&mut self, code: u8) -> &mut Self {
        self.emit(Op::DoSpecial, code)
    }

    pub fn self_return(&mut self) -> &mut Self {
        self.special(special::SELF_RETURN)
    }

    pub fn stack_return(&mut self) -> &mut Self {
        self.special(special::STACK_RETURN)
    }

    pub fn block_return(&mut self) -> &mut Self {
        self.special(special::BLOCK_RETURN)
    }

    pub fn duplicate(&mut self) -> &mut Self {
        self.special(special::DUPLICATE)
    }

    pub fn pop_top(&mut self) -> &mut Self {
        self.special(special::POP_TOP)
    }

    pub fn send_to_super(&mut self, selector: u8, argc: u8) -> &mut Self {
        self.mark_arguments(argc + 1);
        self.special(special::SEND_TO_SUPER);
        self.buf.push(selector);
        self
    }

    /// Emits one of the branch specials with a placeholder target.
    pub fn branch(&mut self, kind: u8) -> Label {
        debug_assert!((special::BRANCH..=special::OR_BRANCH).contains(&kind));
        self.special(kind);
        self.buf.push(0);
        Label {
            operand_pos: self.buf.len() - 1,
        }
    }

    /// Emits a branch to an already known offset.
    pub fn branch_to(&mut self, kind: u8, target: usize) -> &mut Self {
        let label = self.branch(kind);
        self.bind_to(label, target);
        self
    }

    /// Points `label` at the current offset.
    pub fn bind(&mut self, label: Label) {
        let target = self.buf.len();
        self.bind_to(label, target);
    }

    fn bind_to(&mut self, label: Label, target: usize) {
        self.buf[label.operand_pos] =
            u8::try_from(target).expect("branch target beyond 255 bytes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Instruction> {
        disassemble(bytes).into_iter().map(|(_, i)| i).collect()
    }

    #[test]
    fn narrow_and_extended_operands() {
        let mut b = MethodBuilder::new();
        b.push_literal(3).push_literal(40).push_temporary(15).assign_temporary(16);
        let bytes = b.into_bytes();
        assert_eq!(bytes, vec![0x43, 0x04, 40, 0x3f, 0x07, 16]);
        assert_eq!(decode_all(&bytes), vec![
            Instruction::PushLiteral(3),
            Instruction::PushLiteral(40),
            Instruction::PushTemporary(15),
            Instruction::AssignTemporary(16),
        ]);
    }

    #[test]
    fn sends_and_primitives() {
        let mut b = MethodBuilder::new();
        b.push_self().push_constant(1).send(0, 1).send_binary(0).primitive(2, 60).stack_return();
        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::PushArgument(0),
            Instruction::PushConstant(1),
            Instruction::MarkArguments(2),
            Instruction::SendMessage(0),
            Instruction::SendBinary(0),
            Instruction::DoPrimitive { args: 2, number: 60 },
            Instruction::StackReturn,
        ]);
    }

    #[test]
    fn wide_primitive_argument_counts() {
        let mut b = MethodBuilder::new();
        b.primitive(17, 21);
        assert_eq!(b.bytes(), &[Op::DoPrimitive as u8, 17, 21]);
        assert_eq!(decode_all(b.bytes()), vec![Instruction::DoPrimitive { args: 17, number: 21 }]);
    }

    #[test]
    fn forward_branch() {
        let mut b = MethodBuilder::new();
        b.push_constant(constant::TRUE);
        let label = b.branch(special::BRANCH_IF_FALSE);
        b.push_constant(1);
        b.bind(label);
        b.stack_return();
        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::PushConstant(constant::TRUE),
            Instruction::BranchIfFalse(4),
            Instruction::PushConstant(1),
            Instruction::StackReturn,
        ]);
    }

    #[test]
    fn unknown_opcodes_do_not_decode() {
        assert_eq!(Instruction::decode(|| 0xc0), Err(DecodeError { byte: 0xc0 }));
        assert_eq!(Instruction::decode(|| 0xf0), Err(DecodeError { byte: 0xf0 }));
    }

    #[test]
    fn display_instructions() {
        assert_eq!(Instruction::SendBinary(1).to_string(), "SendBinary -");
        assert_eq!(
            Instruction::PushConstant(constant::CONTEXT).to_string(),
            "PushConstant thisContext"
        );
        assert_eq!(
            Instruction::DoPrimitive { args: 2, number: 60 }.to_string(),
            "DoPrimitive 60 (2)"
        );
    }
}
