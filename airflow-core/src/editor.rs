use crate::il::{Instruction, Label, MethodBody, OpCode};
use crate::matcher::{self, Pattern};

/// Where a [`Pattern`] matched. Only [`PatchSite::locate`] can produce one,
/// and the site keeps its pattern so the edit can re-check the body it is
/// applied to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PatchSite {
    index: usize,
    pattern: Pattern,
}

impl PatchSite {
    pub fn locate(body: &MethodBody, pattern: &Pattern) -> Option<Self> {
        matcher::find(body, pattern).map(|index| Self {
            index,
            pattern: pattern.clone(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Insert `call hook; brfalse.s L; ret` in front of the matched
    /// instruction and attach the fresh label `L` to it.
    ///
    /// The hook returning false jumps to `L` and runs the original code;
    /// returning true leaves the method. Existing labels stay on the
    /// instructions they were on, so no other branch moves.
    ///
    /// Returns `None` and leaves `body` alone when the pattern no longer
    /// matches at the site, e.g. for a different or edited body.
    pub fn insert_guard(self, body: &mut MethodBody, hook: &str) -> Option<Label> {
        if !self.pattern.matches_at(body, self.index) {
            return None;
        }
        let i = self.index;
        let label = body.define_label();

        body.insert(i, Instruction::method(OpCode::Call, hook));
        body.insert(i + 1, Instruction::branch(OpCode::BrfalseS, label));
        body.insert(i + 2, Instruction::new(OpCode::Ret));

        // The original first instruction of the matched run.
        if let Some(original) = body.instruction_mut(i + 3) {
            original.labels.push(label);
        }

        Some(label)
    }
}
