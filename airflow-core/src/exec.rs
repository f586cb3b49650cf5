use std::collections::HashMap;

use thiserror::Error;

use crate::il::{Label, MethodBody, OpCode, Operand};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Object(String),
    Null,
}

impl Value {
    pub fn from_bool(b: bool) -> Self {
        Value::Int(b as i32)
    }

    /// Truthiness as `brtrue` / `brfalse` see it.
    pub fn is_true(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Object(_) => true,
            Value::Null => false,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("stack underflow at instruction {index} ({opcode})")]
    StackUnderflow { index: usize, opcode: OpCode },

    #[error("instruction {index} branches to {label}, which is not attached to any instruction")]
    UnresolvedLabel { index: usize, label: Label },

    #[error("argument {arg} is not available")]
    MissingArgument { arg: usize },

    #[error("execution ran past the last instruction without returning")]
    FellOffEnd,

    #[error("step limit of {limit} reached")]
    StepLimit { limit: usize },

    #[error("runtime error: {0}")]
    Runtime(String),
}

/// The host side of execution: method calls and field access.
pub trait Runtime {
    /// Pop the call's arguments (receiver first for instance methods) from
    /// `stack` and push the result, if any.
    fn call(&mut self, signature: &str, stack: &mut Vec<Value>) -> Result<(), ExecError>;

    fn load_static(&mut self, field: &str) -> Result<Value, ExecError>;

    fn load_field(&mut self, target: &Value, field: &str) -> Result<Value, ExecError>;

    fn store_field(&mut self, target: &Value, field: &str, value: Value) -> Result<(), ExecError>;
}

/// Number of parameters in a signature such as
/// `Int32 Subscribe(Int32, System.Action`1[System.Object])`.
pub fn parameter_count(signature: &str) -> usize {
    let open = match signature.rfind('(') {
        Some(i) => i,
        None => return 0,
    };
    let inner = signature[open + 1..].trim_end_matches(')').trim();
    if inner.is_empty() {
        return 0;
    }
    let mut depth = 0i32;
    let mut count = 1;
    for c in inner.chars() {
        match c {
            '[' | '<' | '(' => depth += 1,
            ']' | '>' | ')' => depth -= 1,
            ',' if depth == 0 => count += 1,
            _ => {}
        }
    }
    count
}

/// Pop `n` values, returned in push order.
pub fn pop_n(stack: &mut Vec<Value>, n: usize) -> Result<Vec<Value>, ExecError> {
    if stack.len() < n {
        return Err(ExecError::Runtime(format!(
            "call needs {} stack values, {} available",
            n,
            stack.len()
        )));
    }
    Ok(stack.split_off(stack.len() - n))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub returned: Option<Value>,
    /// Index of the `ret` that ended execution.
    pub exit_index: usize,
    pub steps: usize,
}

pub struct Machine<'a> {
    body: &'a MethodBody,
    labels: HashMap<Label, usize>,
    step_limit: usize,
}

impl<'a> Machine<'a> {
    pub const DEFAULT_STEP_LIMIT: usize = 10_000;

    pub fn new(body: &'a MethodBody) -> Self {
        Self {
            body,
            labels: body.label_index(),
            step_limit: Self::DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn run<R: Runtime>(&self, runtime: &mut R, args: &[Value]) -> Result<Outcome, ExecError> {
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0usize;
        let mut steps = 0usize;

        loop {
            let ins = self.body.get(pc).ok_or(ExecError::FellOffEnd)?;
            steps += 1;
            if steps > self.step_limit {
                return Err(ExecError::StepLimit {
                    limit: self.step_limit,
                });
            }

            let underflow = ExecError::StackUnderflow {
                index: pc,
                opcode: ins.opcode,
            };
            let mut next = pc + 1;

            match ins.opcode {
                OpCode::Nop => {}
                OpCode::Ldarg0 | OpCode::Ldarg1 => {
                    let arg = if ins.opcode == OpCode::Ldarg0 { 0 } else { 1 };
                    let v = args.get(arg).cloned().ok_or(ExecError::MissingArgument { arg })?;
                    stack.push(v);
                }
                OpCode::Ldnull => stack.push(Value::Null),
                OpCode::LdcI4 => match ins.operand {
                    Operand::Int(v) => stack.push(Value::Int(v)),
                    _ => return Err(ExecError::Runtime(format!("ldc.i4 at {} has no constant", pc))),
                },
                OpCode::LdcI4_0 => stack.push(Value::Int(0)),
                OpCode::LdcI4_1 => stack.push(Value::Int(1)),
                OpCode::Ldsfld => {
                    let v = runtime.load_static(&ins.operand.to_string())?;
                    stack.push(v);
                }
                OpCode::Ldfld => {
                    let target = stack.pop().ok_or(underflow)?;
                    let v = runtime.load_field(&target, &ins.operand.to_string())?;
                    stack.push(v);
                }
                OpCode::Stfld => {
                    let value = stack.pop().ok_or(underflow.clone())?;
                    let target = stack.pop().ok_or(underflow)?;
                    runtime.store_field(&target, &ins.operand.to_string(), value)?;
                }
                OpCode::Call | OpCode::Callvirt => {
                    runtime.call(&ins.operand.to_string(), &mut stack)?;
                }
                OpCode::Pop => {
                    stack.pop().ok_or(underflow)?;
                }
                OpCode::Dup => {
                    let top = stack.last().cloned().ok_or(underflow)?;
                    stack.push(top);
                }
                OpCode::Ret => {
                    return Ok(Outcome {
                        returned: stack.pop(),
                        exit_index: pc,
                        steps,
                    });
                }
                OpCode::Br | OpCode::BrS => {
                    next = self.target(pc, ins.branch_target())?;
                }
                OpCode::Brfalse | OpCode::BrfalseS | OpCode::Brtrue | OpCode::BrtrueS => {
                    let cond = stack.pop().ok_or(underflow)?.is_true();
                    let on_true = matches!(ins.opcode, OpCode::Brtrue | OpCode::BrtrueS);
                    if cond == on_true {
                        next = self.target(pc, ins.branch_target())?;
                    }
                }
            }

            pc = next;
        }
    }

    fn target(&self, pc: usize, label: Option<Label>) -> Result<usize, ExecError> {
        let label = label.ok_or_else(|| ExecError::Runtime(format!("branch at {} has no label", pc)))?;
        self.labels
            .get(&label)
            .copied()
            .ok_or(ExecError::UnresolvedLabel { index: pc, label })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::parse_listing;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(String, Vec<Value>)>,
        flag: bool,
    }

    impl Runtime for Recorder {
        fn call(&mut self, signature: &str, stack: &mut Vec<Value>) -> Result<(), ExecError> {
            let instance = !signature.contains("::") as usize;
            let args = pop_n(stack, parameter_count(signature) + instance)?;
            self.calls.push((signature.to_string(), args));
            if signature.starts_with("Int32") || signature.starts_with("Boolean") {
                stack.push(Value::Int(0));
            }
            Ok(())
        }

        fn load_static(&mut self, field: &str) -> Result<Value, ExecError> {
            Ok(Value::Object(field.to_string()))
        }

        fn load_field(&mut self, _target: &Value, field: &str) -> Result<Value, ExecError> {
            match field {
                "Boolean flag" => Ok(Value::from_bool(self.flag)),
                _ => Err(ExecError::Runtime(format!("no field {}", field))),
            }
        }

        fn store_field(&mut self, _target: &Value, field: &str, value: Value) -> Result<(), ExecError> {
            match field {
                "Boolean flag" => {
                    self.flag = value.is_true();
                    Ok(())
                }
                _ => Err(ExecError::Runtime(format!("no field {}", field))),
            }
        }
    }

    fn this() -> Vec<Value> {
        vec![Value::Object("occupier".to_string())]
    }

    #[test]
    fn counts_parameters() {
        assert_eq!(parameter_count("Void OnSpawn()"), 0);
        assert_eq!(parameter_count("Int32 Subscribe(Int32, System.Action`1[System.Object])"), 2);
        assert_eq!(parameter_count("Void F(Dictionary`2[Int32, String])"), 1);
        assert_eq!(parameter_count("NoParens"), 0);
    }

    #[test]
    fn conditional_branch_follows_flag() {
        let src = r#"
            ldarg.0
            ldfld "Boolean flag"
            brfalse.s skip
            ldarg.0
            call "Void Work()"
        skip:
            ret
        "#;
        let body = parse_listing("m", src).unwrap();

        let mut rt = Recorder::default();
        Machine::new(&body).run(&mut rt, &this()).unwrap();
        assert!(rt.calls.is_empty());

        let mut rt = Recorder {
            flag: true,
            ..Recorder::default()
        };
        let out = Machine::new(&body).run(&mut rt, &this()).unwrap();
        assert_eq!(rt.calls.len(), 1);
        assert_eq!(rt.calls[0].1, this());
        assert_eq!(out.exit_index, 5);
    }

    #[test]
    fn stores_fields_and_returns_value() {
        let src = "ldarg.0\nldc.i4.1\nstfld \"Boolean flag\"\nldc.i4 42\nret";
        let body = parse_listing("m", src).unwrap();
        let mut rt = Recorder::default();
        let out = Machine::new(&body).run(&mut rt, &this()).unwrap();
        assert!(rt.flag);
        assert_eq!(out.returned, Some(Value::Int(42)));
    }

    #[test]
    fn reports_faults() {
        let mut rt = Recorder::default();

        let body = parse_listing("m", "pop\nret").unwrap();
        assert_eq!(
            Machine::new(&body).run(&mut rt, &this()),
            Err(ExecError::StackUnderflow {
                index: 0,
                opcode: OpCode::Pop
            })
        );

        let body = parse_listing("m", "nop").unwrap();
        assert_eq!(Machine::new(&body).run(&mut rt, &this()), Err(ExecError::FellOffEnd));

        let body = parse_listing("m", "ldarg.1\nret").unwrap();
        assert_eq!(
            Machine::new(&body).run(&mut rt, &this()),
            Err(ExecError::MissingArgument { arg: 1 })
        );

        let body = parse_listing("m", "top: br top").unwrap();
        assert_eq!(
            Machine::new(&body).with_step_limit(50).run(&mut rt, &this()),
            Err(ExecError::StepLimit { limit: 50 })
        );
    }
}
