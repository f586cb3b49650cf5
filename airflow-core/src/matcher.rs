use crate::il::{Instruction, MethodBody, OpCode};

/// A single structural check against one instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    /// Opcode only; the operand is ignored.
    Op(OpCode),
    /// Opcode plus exact operand text.
    OperandEquals(OpCode, String),
    OperandStartsWith(OpCode, String),
    OperandEndsWith(OpCode, String),
}

impl Predicate {
    pub fn matches(&self, ins: &Instruction) -> bool {
        if ins.opcode != self.opcode() {
            return false;
        }
        let text = ins.operand.text();
        match (self, text.as_deref()) {
            (Predicate::Op(_), _) => true,
            (_, None) => false,
            (Predicate::OperandEquals(_, s), Some(t)) => t == s.as_str(),
            (Predicate::OperandStartsWith(_, s), Some(t)) => t.starts_with(s.as_str()),
            (Predicate::OperandEndsWith(_, s), Some(t)) => t.ends_with(s.as_str()),
        }
    }

    pub fn opcode(&self) -> OpCode {
        match self {
            Predicate::Op(op)
            | Predicate::OperandEquals(op, _)
            | Predicate::OperandStartsWith(op, _)
            | Predicate::OperandEndsWith(op, _) => *op,
        }
    }
}

/// An ordered run of predicates matched against consecutive instructions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    steps: Vec<Predicate>,
}

impl Pattern {
    pub fn new(steps: Vec<Predicate>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The `this.Subscribe(K, SomeDelegate); return;` tail:
    /// `ldarg.0; ldc.i4 K; ldsfld *field_suffix; call method_prefix*; pop; ret`.
    pub fn subscribe_tail(event_hash: i32, field_suffix: &str, method_prefix: &str) -> Self {
        Self::new(vec![
            Predicate::Op(OpCode::Ldarg0),
            Predicate::OperandEquals(OpCode::LdcI4, event_hash.to_string()),
            Predicate::OperandEndsWith(OpCode::Ldsfld, field_suffix.to_string()),
            Predicate::OperandStartsWith(OpCode::Call, method_prefix.to_string()),
            Predicate::Op(OpCode::Pop),
            Predicate::Op(OpCode::Ret),
        ])
    }

    /// Whether the pattern matches starting at `index`. A pattern that would
    /// run past the end of the body never matches.
    pub fn matches_at(&self, body: &MethodBody, index: usize) -> bool {
        let window = match body.instructions().get(index..index + self.steps.len()) {
            Some(w) => w,
            None => return false,
        };
        self.steps
            .iter()
            .zip(window)
            .all(|(pred, ins)| pred.matches(ins))
    }
}

/// First index at which `pattern` matches, scanning from the start.
pub fn find(body: &MethodBody, pattern: &Pattern) -> Option<usize> {
    if pattern.is_empty() {
        return None;
    }
    (0..body.len()).find(|&i| pattern.matches_at(body, i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{Instruction, MethodBody, OpCode};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const HASH: i32 = -1699355994;
    const FIELD: &str = "EventSystem.IntraObjectHandler`1[SimCellOccupier] OnBuildingRepairedDelegate";
    const METHOD: &str = "Int32 Subscribe[SimCellOccupier](Int32, EventSystem.IntraObjectHandler`1[SimCellOccupier])";

    fn tail() -> Vec<Instruction> {
        vec![
            Instruction::new(OpCode::Ldarg0),
            Instruction::int(OpCode::LdcI4, HASH),
            Instruction::field(OpCode::Ldsfld, FIELD),
            Instruction::method(OpCode::Call, METHOD),
            Instruction::new(OpCode::Pop),
            Instruction::new(OpCode::Ret),
        ]
    }

    fn pattern() -> Pattern {
        Pattern::subscribe_tail(HASH, "OnBuildingRepairedDelegate", "Int32 Subscribe")
    }

    // Filler never contains ldarg.0, so it cannot start a match by accident.
    fn filler(rng: &mut StdRng, n: usize) -> Vec<Instruction> {
        (0..n)
            .map(|_| match rng.gen_range(0..6) {
                0 => Instruction::new(OpCode::Nop),
                1 => Instruction::int(OpCode::LdcI4, rng.gen()),
                2 => Instruction::field(OpCode::Ldsfld, "Int32 Grid::WidthInCells"),
                3 => Instruction::method(OpCode::Call, "Void Trigger(Int32, System.Object)"),
                4 => Instruction::new(OpCode::Pop),
                _ => Instruction::new(OpCode::Ldnull),
            })
            .collect()
    }

    #[test]
    fn finds_tail_at_any_offset() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        for offset in 0..24 {
            let mut ins = filler(&mut rng, offset);
            ins.extend(tail());
            let after = rng.gen_range(0..5);
            ins.extend(filler(&mut rng, after));
            let body = MethodBody::from_instructions("OnSpawn", ins);
            assert_eq!(find(&body, &pattern()), Some(offset), "offset {}", offset);
        }
    }

    #[test]
    fn broken_prefix_right_before_tail_is_skipped() {
        let mut rng = StdRng::seed_from_u64(0xBEEF);
        // Each prefix starts a match that fails partway, then the real tail.
        let prefixes = [
            vec![Instruction::new(OpCode::Ldarg0)],
            vec![
                Instruction::new(OpCode::Ldarg0),
                Instruction::int(OpCode::LdcI4, HASH),
            ],
            vec![
                Instruction::new(OpCode::Ldarg0),
                Instruction::int(OpCode::LdcI4, HASH),
                Instruction::field(OpCode::Ldsfld, FIELD),
                Instruction::method(OpCode::Call, METHOD),
                Instruction::new(OpCode::Pop),
            ],
        ];
        for prefix in prefixes {
            let lead = rng.gen_range(0..4);
            let mut ins = filler(&mut rng, lead);
            ins.extend(prefix.iter().cloned());
            let expected = ins.len();
            ins.extend(tail());
            let body = MethodBody::from_instructions("OnSpawn", ins);
            assert_eq!(find(&body, &pattern()), Some(expected), "prefix {:?}", prefix);
        }
    }

    #[test]
    fn missing_tail_is_not_found() {
        let mut rng = StdRng::seed_from_u64(7);
        let body = MethodBody::from_instructions("OnSpawn", filler(&mut rng, 40));
        assert_eq!(find(&body, &pattern()), None);
        assert_eq!(find(&MethodBody::new("empty"), &pattern()), None);
    }

    #[test]
    fn first_match_wins() {
        let mut ins = tail();
        ins.extend(tail());
        let body = MethodBody::from_instructions("OnSpawn", ins);
        assert_eq!(find(&body, &pattern()), Some(0));
    }

    #[test]
    fn each_operand_check_is_enforced() {
        let mut wrong_hash = tail();
        wrong_hash[1] = Instruction::int(OpCode::LdcI4, HASH + 1);
        let mut wrong_field = tail();
        wrong_field[2] = Instruction::field(OpCode::Ldsfld, "OnBuildingRepairedDelegateX");
        let mut wrong_call = tail();
        wrong_call[3] = Instruction::method(OpCode::Call, "Void Subscribe(Int32)");
        let mut virt_call = tail();
        virt_call[3] = Instruction::method(OpCode::Callvirt, METHOD);

        for ins in [wrong_hash, wrong_field, wrong_call, virt_call] {
            let body = MethodBody::from_instructions("OnSpawn", ins);
            assert_eq!(find(&body, &pattern()), None);
        }
    }

    #[test]
    fn truncated_tail_does_not_match() {
        let mut ins = tail();
        ins.pop();
        let body = MethodBody::from_instructions("OnSpawn", ins);
        assert_eq!(find(&body, &pattern()), None);
    }
}
