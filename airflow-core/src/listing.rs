use std::collections::HashMap;
use std::fmt::Write as _;

use thiserror::Error;

use crate::il::{Instruction, Label, MethodBody, OpCode, Operand, OperandKind};

/// Errors that can occur while reading a textual method listing.
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("unknown opcode '{opcode}' on line {line}")]
    UnknownOpcode { line: usize, opcode: String },

    #[error("wrong operand count for {opcode} on line {line}: expected {expected}, got {got}")]
    WrongOperandCount {
        line: usize,
        opcode: String,
        expected: usize,
        got: usize,
    },

    #[error("failed to parse integer '{token}' on line {line}")]
    ParseInt {
        line: usize,
        token: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("unterminated string on line {line}")]
    UnterminatedString { line: usize },

    #[error("label '{label}' used on line {line} is never defined")]
    UndefinedLabel { line: usize, label: String },

    #[error("label '{label}' on line {line} is already defined")]
    DuplicateLabel { line: usize, label: String },

    #[error("label '{label}' on line {line} is not followed by an instruction")]
    DanglingLabel { line: usize, label: String },
}

fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_string = !in_string,
            b'#' if !in_string => return &line[..i],
            b'/' if !in_string && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
    }
    line
}

fn tokenize(line_no: usize, line: &str) -> Result<Vec<String>, ListingError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut s = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '"' {
                    closed = true;
                    break;
                }
                s.push(c);
            }
            if !closed {
                return Err(ListingError::UnterminatedString { line: line_no });
            }
            tokens.push(s);
            continue;
        }
        let mut s = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            s.push(c);
            chars.next();
        }
        tokens.push(s);
    }

    Ok(tokens)
}

fn parse_int_i32(line: usize, token: &str) -> Result<i32, ListingError> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let res = if digits.starts_with(|c| c == '-' || c == '+') {
        // Only one sign, in front of the whole token. `i32` parsing rejects
        // the doubled sign and supplies the error.
        token.parse::<i32>()
    } else if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .filter(|hex| !hex.starts_with('+'))
    {
        // Hex literals are raw 32-bit patterns, as ildasm prints them.
        u32::from_str_radix(hex, 16).map(|v| v as i32)
    } else {
        digits.parse::<i32>().or_else(|e| {
            // i32::MIN has no positive counterpart.
            if negative && digits == "2147483648" {
                Ok(i32::MIN)
            } else {
                Err(e)
            }
        })
    };

    res.map(|v| if negative { v.wrapping_neg() } else { v })
        .map_err(|e| ListingError::ParseInt {
            line,
            token: token.to_string(),
            source: e,
        })
}

#[derive(Default)]
struct LabelTable {
    ids: HashMap<String, Label>,
    defined: HashMap<Label, usize>,
    first_use: Vec<(String, usize)>,
    next: u32,
}

impl LabelTable {
    fn get_or_alloc(&mut self, name: &str) -> Label {
        if let Some(l) = self.ids.get(name) {
            return *l;
        }
        let label = Label(self.next);
        self.next += 1;
        self.ids.insert(name.to_string(), label);
        label
    }
}

/// Read a method listing into a [`MethodBody`].
///
/// Line format (case-insensitive mnemonics; decimal or 0x-prefixed hex
/// integers; field and method references in double quotes):
///
/// - `.method "Name"` sets the body name (otherwise `default_name` is used)
/// - `NAME:` defines a label on the next instruction; it may share a line
///   with that instruction
/// - `ldc.i4 -1699355994`, `call "Int32 Subscribe(...)"`, `brfalse.s NAME`
///
/// Blank lines and text after `#` or `//` are ignored. Label names are
/// renumbered in order of first appearance.
pub fn parse_listing(default_name: &str, src: &str) -> Result<MethodBody, ListingError> {
    let mut name = default_name.to_string();
    let mut instructions: Vec<Instruction> = Vec::new();
    let mut labels = LabelTable::default();
    let mut pending: Vec<(Label, String, usize)> = Vec::new();

    for (idx, raw_line) in src.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let mut tokens = tokenize(line_no, line)?;

        if tokens.first().map(String::as_str) == Some(".method") {
            if tokens.len() != 2 {
                return Err(ListingError::WrongOperandCount {
                    line: line_no,
                    opcode: ".method".to_string(),
                    expected: 1,
                    got: tokens.len() - 1,
                });
            }
            name = tokens.remove(1);
            continue;
        }

        while let Some(label_name) = tokens
            .first()
            .and_then(|t| t.strip_suffix(':'))
            .map(str::to_string)
        {
            tokens.remove(0);
            let label = labels.get_or_alloc(&label_name);
            if labels.defined.insert(label, line_no).is_some() {
                return Err(ListingError::DuplicateLabel {
                    line: line_no,
                    label: label_name,
                });
            }
            pending.push((label, label_name, line_no));
        }

        if tokens.is_empty() {
            continue;
        }

        let op_tok = tokens.remove(0);
        let opcode = OpCode::from_mnemonic(&op_tok).ok_or_else(|| ListingError::UnknownOpcode {
            line: line_no,
            opcode: op_tok.clone(),
        })?;

        let kind = opcode.operand_kind();
        let expected = if kind == OperandKind::None { 0 } else { 1 };
        if tokens.len() != expected {
            return Err(ListingError::WrongOperandCount {
                line: line_no,
                opcode: opcode.mnemonic().to_string(),
                expected,
                got: tokens.len(),
            });
        }

        let operand = match kind {
            OperandKind::None => Operand::None,
            OperandKind::Int => Operand::Int(parse_int_i32(line_no, &tokens[0])?),
            OperandKind::Field => Operand::Field(tokens.remove(0)),
            OperandKind::Method => Operand::Method(tokens.remove(0)),
            OperandKind::Label => {
                let target = tokens.remove(0);
                if !labels.ids.contains_key(&target) {
                    labels.first_use.push((target.clone(), line_no));
                }
                Operand::Label(labels.get_or_alloc(&target))
            }
        };

        let mut ins = Instruction::with_operand(opcode, operand);
        ins.labels = pending.drain(..).map(|(l, _, _)| l).collect();
        instructions.push(ins);
    }

    if let Some((_, label_name, line)) = pending.into_iter().next() {
        return Err(ListingError::DanglingLabel {
            line,
            label: label_name,
        });
    }

    for (label_name, line) in &labels.first_use {
        let label = labels.ids[label_name];
        if !labels.defined.contains_key(&label) {
            return Err(ListingError::UndefinedLabel {
                line: *line,
                label: label_name.clone(),
            });
        }
    }

    Ok(MethodBody::from_instructions(&name, instructions))
}

/// Render a body back to the listing format accepted by [`parse_listing`].
pub fn to_listing(body: &MethodBody) -> String {
    let mut out = String::new();
    let _ = writeln!(out, ".method \"{}\"", body.name());
    for ins in body.instructions() {
        for label in &ins.labels {
            let _ = writeln!(out, "{}:", label);
        }
        let _ = writeln!(out, "    {}", ins);
    }
    out
}
