use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Opcodes understood by the matcher, the editor and the interpreter.
///
/// This is the subset of CIL that appears in `SimCellOccupier.OnSpawn` and
/// in the guard block inserted in front of its subscription tail.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OpCode {
    Nop,
    Ldarg0,
    Ldarg1,
    Ldnull,
    LdcI4,
    LdcI4_0,
    LdcI4_1,
    Ldsfld,
    Ldfld,
    Stfld,
    Call,
    Callvirt,
    Pop,
    Dup,
    Ret,
    Br,
    BrS,
    Brfalse,
    BrfalseS,
    Brtrue,
    BrtrueS,
}

/// What kind of operand an opcode carries.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OperandKind {
    None,
    Int,
    Field,
    Method,
    Label,
}

const MNEMONICS: &[(OpCode, &str)] = &[
    (OpCode::Nop, "nop"),
    (OpCode::Ldarg0, "ldarg.0"),
    (OpCode::Ldarg1, "ldarg.1"),
    (OpCode::Ldnull, "ldnull"),
    (OpCode::LdcI4, "ldc.i4"),
    (OpCode::LdcI4_0, "ldc.i4.0"),
    (OpCode::LdcI4_1, "ldc.i4.1"),
    (OpCode::Ldsfld, "ldsfld"),
    (OpCode::Ldfld, "ldfld"),
    (OpCode::Stfld, "stfld"),
    (OpCode::Call, "call"),
    (OpCode::Callvirt, "callvirt"),
    (OpCode::Pop, "pop"),
    (OpCode::Dup, "dup"),
    (OpCode::Ret, "ret"),
    (OpCode::Br, "br"),
    (OpCode::BrS, "br.s"),
    (OpCode::Brfalse, "brfalse"),
    (OpCode::BrfalseS, "brfalse.s"),
    (OpCode::Brtrue, "brtrue"),
    (OpCode::BrtrueS, "brtrue.s"),
];

impl OpCode {
    pub fn mnemonic(self) -> &'static str {
        MNEMONICS
            .iter()
            .find(|(op, _)| *op == self)
            .map(|(_, m)| *m)
            .unwrap_or("?")
    }

    /// Case-insensitive lookup of a textual mnemonic.
    pub fn from_mnemonic(s: &str) -> Option<Self> {
        MNEMONICS
            .iter()
            .find(|(_, m)| m.eq_ignore_ascii_case(s))
            .map(|(op, _)| *op)
    }

    pub fn operand_kind(self) -> OperandKind {
        match self {
            OpCode::LdcI4 => OperandKind::Int,
            OpCode::Ldsfld | OpCode::Ldfld | OpCode::Stfld => OperandKind::Field,
            OpCode::Call | OpCode::Callvirt => OperandKind::Method,
            OpCode::Br
            | OpCode::BrS
            | OpCode::Brfalse
            | OpCode::BrfalseS
            | OpCode::Brtrue
            | OpCode::BrtrueS => OperandKind::Label,
            _ => OperandKind::None,
        }
    }

    pub fn is_branch(self) -> bool {
        self.operand_kind() == OperandKind::Label
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A branch target. Labels are attached to instructions, never to indices,
/// so inserting code in front of a labelled instruction keeps every branch
/// pointing at it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Label(pub(crate) u32);

impl Label {
    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Operand {
    None,
    Int(i32),
    Field(String),
    Method(String),
    Label(Label),
}

impl Operand {
    /// Textual form used for structural matching, or `None` when the
    /// instruction has no operand.
    pub fn text(&self) -> Option<String> {
        match self {
            Operand::None => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Int(v) => write!(f, "{}", v),
            Operand::Field(s) | Operand::Method(s) => f.write_str(s),
            Operand::Label(l) => write!(f, "{}", l),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: Operand,
    pub labels: Vec<Label>,
}

impl Instruction {
    pub fn new(opcode: OpCode) -> Self {
        Self {
            opcode,
            operand: Operand::None,
            labels: Vec::new(),
        }
    }

    pub fn with_operand(opcode: OpCode, operand: Operand) -> Self {
        Self {
            opcode,
            operand,
            labels: Vec::new(),
        }
    }

    pub fn int(opcode: OpCode, value: i32) -> Self {
        Self::with_operand(opcode, Operand::Int(value))
    }

    pub fn field(opcode: OpCode, name: &str) -> Self {
        Self::with_operand(opcode, Operand::Field(name.to_string()))
    }

    pub fn method(opcode: OpCode, signature: &str) -> Self {
        Self::with_operand(opcode, Operand::Method(signature.to_string()))
    }

    pub fn branch(opcode: OpCode, target: Label) -> Self {
        Self::with_operand(opcode, Operand::Label(target))
    }

    pub fn branch_target(&self) -> Option<Label> {
        match self.operand {
            Operand::Label(l) if self.opcode.is_branch() => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operand {
            Operand::None => write!(f, "{}", self.opcode),
            Operand::Field(s) | Operand::Method(s) => write!(f, "{} \"{}\"", self.opcode, s),
            other => write!(f, "{} {}", self.opcode, other),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BodyError {
    #[error("instruction {index} branches to {label}, which is not attached to any instruction")]
    UnresolvedLabel { index: usize, label: Label },

    #[error("label {label} is attached to more than one instruction")]
    DuplicateLabel { label: Label },
}

/// An ordered instruction stream plus the label allocator for it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MethodBody {
    name: String,
    instructions: Vec<Instruction>,
    next_label: u32,
}

impl MethodBody {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            instructions: Vec::new(),
            next_label: 0,
        }
    }

    /// Wrap an existing instruction list. The label allocator starts past
    /// every label already used in `instructions`.
    pub fn from_instructions(name: &str, instructions: Vec<Instruction>) -> Self {
        let next_label = instructions
            .iter()
            .flat_map(|ins| ins.labels.iter().copied().chain(ins.branch_target()))
            .map(|l| l.0 + 1)
            .max()
            .unwrap_or(0);
        Self {
            name: name.to_string(),
            instructions,
            next_label,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    pub(crate) fn insert(&mut self, index: usize, ins: Instruction) {
        self.instructions.insert(index, ins);
    }

    pub(crate) fn instruction_mut(&mut self, index: usize) -> Option<&mut Instruction> {
        self.instructions.get_mut(index)
    }

    pub fn define_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Map every attached label to the index of its instruction. When a
    /// label is attached twice the first occurrence wins; `validate`
    /// reports that case.
    pub fn label_index(&self) -> HashMap<Label, usize> {
        let mut map = HashMap::new();
        for (i, ins) in self.instructions.iter().enumerate() {
            for label in &ins.labels {
                map.entry(*label).or_insert(i);
            }
        }
        map
    }

    pub fn resolve(&self, label: Label) -> Option<usize> {
        self.instructions
            .iter()
            .position(|ins| ins.labels.contains(&label))
    }

    /// Check that every branch lands on exactly one instruction.
    pub fn validate(&self) -> Result<(), BodyError> {
        let mut seen = HashMap::new();
        for ins in &self.instructions {
            for label in &ins.labels {
                if seen.insert(*label, ()).is_some() {
                    return Err(BodyError::DuplicateLabel { label: *label });
                }
            }
        }
        for (index, ins) in self.instructions.iter().enumerate() {
            if let Some(label) = ins.branch_target() {
                if !seen.contains_key(&label) {
                    return Err(BodyError::UnresolvedLabel { index, label });
                }
            }
        }
        Ok(())
    }
}
