//! Byte buffer, labels and branch patching shared by every encoder.

use core::fmt;
use core::ops::Range;
use std::collections::HashMap;

use crate::error::EmitError;

/// Branch target handed out by [`crate::Asm::label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Offset field left open by a branch, filled in by [`CodeBuilder::patch_branches`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchKind {
    /// x86 rel32 measured from the end of the field.
    X86Rel32,
    /// AArch64 `B` word, imm26 in words.
    A64Imm26(u32),
    /// AArch64 `CBZ`/`CBNZ` word, imm19 in words at bit 5.
    A64Imm19(u32),
    /// POWER `bc` word, BD in bytes (low two bits clear).
    PpcBd14(u32),
    /// POWER `b` word, LI in bytes (low two bits clear).
    PpcLi24(u32),
    /// MIPS branch word, signed 16-bit word offset from the delay slot.
    MipsS16(u32),
}

#[derive(Debug)]
struct BranchPatch {
    kind: PatchKind,
    at: usize,
    target: Label,
    scope: u32,
}

#[derive(Debug, Clone, Copy)]
struct Bound {
    at: usize,
    scope: u32,
}

/// Byte range and displacement of one pair member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Bytes emitted for this member.
    pub bytes: Range<usize>,
    /// Displacement used by the member's memory operand, if it has one.
    pub disp: Option<u32>,
}

/// Encoding of one logical vector operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    /// Operation name.
    pub mnemonic: &'static str,
    /// One span per pair member, in member order.
    pub chunks: Vec<ChunkSpan>,
}

/// Append-only code buffer with labels and deferred branch patches.
#[derive(Debug)]
pub struct CodeBuilder {
    code: Vec<u8>,
    labels: HashMap<Label, Bound>,
    patches: Vec<BranchPatch>,
    counter: u32,
    scopes: Vec<u32>,
    next_scope: u32,
    expansions: Vec<Expansion>,
    fault: Option<EmitError>,
}

impl CodeBuilder {
    /// Empty buffer with room for `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            code: Vec::with_capacity(capacity),
            labels: HashMap::new(),
            patches: Vec::new(),
            counter: 0,
            scopes: Vec::new(),
            next_scope: 1,
            expansions: Vec::new(),
            fault: None,
        }
    }

    /// Current write offset.
    pub fn position(&self) -> usize {
        self.code.len()
    }

    /// Bytes emitted so far.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Append one little-endian instruction word.
    pub fn push_u32(&mut self, word: u32) {
        self.code.extend_from_slice(&word.to_le_bytes());
    }

    /// Append raw bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// New unbound label.
    pub fn fresh_label(&mut self) -> Label {
        let label = Label(self.counter);
        self.counter += 1;
        label
    }

    /// Bind `label` to the current position.
    pub fn bind(&mut self, label: Label) {
        let bound = Bound {
            at: self.position(),
            scope: self.scope(),
        };
        if self.labels.insert(label, bound).is_some() {
            self.fault(EmitError::LabelRebound(label));
        }
    }

    /// Emit a branch to `label`; the offset field is patched later.
    pub fn emit_branch(&mut self, kind: PatchKind, label: Label) {
        let at = self.position();
        match kind {
            PatchKind::X86Rel32 => self.push_bytes(&[0; 4]),
            PatchKind::A64Imm26(word)
            | PatchKind::A64Imm19(word)
            | PatchKind::PpcBd14(word)
            | PatchKind::PpcLi24(word)
            | PatchKind::MipsS16(word) => self.push_u32(word),
        }
        self.patches.push(BranchPatch {
            kind,
            at,
            target: label,
            scope: self.scope(),
        });
    }

    pub(crate) fn enter_scope(&mut self) {
        let id = self.next_scope;
        self.next_scope += 1;
        self.scopes.push(id);
    }

    pub(crate) fn leave_scope(&mut self) {
        self.scopes.pop();
    }

    fn scope(&self) -> u32 {
        self.scopes.last().copied().unwrap_or(0)
    }

    pub(crate) fn record(&mut self, expansion: Expansion) {
        self.expansions.push(expansion);
    }

    fn fault(&mut self, err: EmitError) {
        if self.fault.is_none() {
            self.fault = Some(err);
        }
    }

    /// Resolve every pending branch against the bound labels.
    pub fn patch_branches(&mut self) -> Result<(), EmitError> {
        if let Some(err) = self.fault.take() {
            return Err(err);
        }

        for patch in &self.patches {
            let bound = *self
                .labels
                .get(&patch.target)
                .ok_or(EmitError::UnboundLabel(patch.target))?;
            if bound.scope != patch.scope {
                return Err(EmitError::CrossesRoundingScope {
                    label: patch.target,
                });
            }

            let target = bound.at as i64;
            let at = patch.at as i64;
            let out_of_range = |offset: i64| EmitError::BranchOutOfRange {
                label: patch.target,
                offset,
            };

            match patch.kind {
                PatchKind::X86Rel32 => {
                    let offset = target - (at + 4);
                    let rel = i32::try_from(offset).map_err(|_| out_of_range(offset))?;
                    self.code[patch.at..patch.at + 4].copy_from_slice(&rel.to_le_bytes());
                }
                kind => {
                    let word = encode_offset(kind, target - at).ok_or_else(|| {
                        let offset = target - at;
                        out_of_range(offset)
                    })?;
                    self.code[patch.at..patch.at + 4].copy_from_slice(&word.to_le_bytes());
                }
            }
        }

        Ok(())
    }

    /// Patch branches and hand back the code with its expansion records.
    pub fn finish(mut self) -> Result<(Vec<u8>, Vec<Expansion>), EmitError> {
        self.patch_branches()?;
        Ok((self.code, self.expansions))
    }
}

fn signed_fits(value: i64, bits: u32) -> bool {
    let limit = 1i64 << (bits - 1);
    (-limit..limit).contains(&value)
}

/// Merge a byte offset (measured from the branch word) into its field.
fn encode_offset(kind: PatchKind, offset: i64) -> Option<u32> {
    if offset % 4 != 0 {
        return None;
    }
    match kind {
        PatchKind::X86Rel32 => None,
        PatchKind::A64Imm26(word) => {
            let imm = offset >> 2;
            signed_fits(imm, 26).then(|| word | (imm as u32 & 0x03ff_ffff))
        }
        PatchKind::A64Imm19(word) => {
            let imm = offset >> 2;
            signed_fits(imm, 19).then(|| word | ((imm as u32 & 0x7ffff) << 5))
        }
        PatchKind::PpcBd14(word) => {
            signed_fits(offset, 16).then(|| word | (offset as u32 & 0xfffc))
        }
        PatchKind::PpcLi24(word) => {
            signed_fits(offset, 26).then(|| word | (offset as u32 & 0x03ff_fffc))
        }
        PatchKind::MipsS16(word) => {
            let imm = (offset - 4) >> 2;
            signed_fits(imm, 16).then(|| word | (imm as u32 & 0xffff))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(code: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(code[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn backward_and_forward_a64() {
        let mut b = CodeBuilder::new(64);
        let top = b.fresh_label();
        let end = b.fresh_label();
        b.bind(top);
        b.push_u32(0xd503_201f);
        b.emit_branch(PatchKind::A64Imm19(0x3500_0010), end);
        b.emit_branch(PatchKind::A64Imm26(0x1400_0000), top);
        b.bind(end);
        let (code, _) = b.finish().expect("patch");
        // cbnz w16, +8
        assert_eq!(word(&code, 4), 0x3500_0050);
        // b -8
        assert_eq!(word(&code, 8), 0x17ff_fffe);
    }

    #[test]
    fn x86_rel32_counts_from_field_end() {
        let mut b = CodeBuilder::new(16);
        let end = b.fresh_label();
        b.push_bytes(&[0x0f, 0x84]);
        b.emit_branch(PatchKind::X86Rel32, end);
        b.push_bytes(&[0x90, 0x90]);
        b.bind(end);
        let (code, _) = b.finish().expect("patch");
        assert_eq!(&code[..6], &[0x0f, 0x84, 0x02, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn mips_offset_is_relative_to_delay_slot() {
        let mut b = CodeBuilder::new(16);
        let end = b.fresh_label();
        b.emit_branch(PatchKind::MipsS16(0x457f_0000), end);
        b.push_u32(0);
        b.push_u32(0);
        b.bind(end);
        let (code, _) = b.finish().expect("patch");
        assert_eq!(word(&code, 0), 0x457f_0002);
    }

    #[test]
    fn ppc_forward_branch() {
        let mut b = CodeBuilder::new(16);
        let end = b.fresh_label();
        b.emit_branch(PatchKind::PpcBd14(0x419a_0000), end);
        b.push_u32(0x6000_0000);
        b.bind(end);
        let (code, _) = b.finish().expect("patch");
        assert_eq!(word(&code, 0), 0x419a_0008);
    }

    #[test]
    fn unbound_label_is_reported() {
        let mut b = CodeBuilder::new(8);
        let nowhere = b.fresh_label();
        b.emit_branch(PatchKind::A64Imm26(0x1400_0000), nowhere);
        assert_eq!(b.finish().unwrap_err(), EmitError::UnboundLabel(nowhere));
    }

    #[test]
    fn rebinding_is_reported() {
        let mut b = CodeBuilder::new(8);
        let l = b.fresh_label();
        b.bind(l);
        b.bind(l);
        assert_eq!(b.finish().unwrap_err(), EmitError::LabelRebound(l));
    }

    #[test]
    fn branch_out_of_scope_is_rejected() {
        let mut b = CodeBuilder::new(8);
        let outside = b.fresh_label();
        b.enter_scope();
        b.emit_branch(PatchKind::A64Imm26(0x1400_0000), outside);
        b.leave_scope();
        b.bind(outside);
        assert_eq!(
            b.finish().unwrap_err(),
            EmitError::CrossesRoundingScope { label: outside }
        );
    }

    #[test]
    fn imm19_range_is_checked() {
        assert!(encode_offset(PatchKind::A64Imm19(0), 4 * ((1 << 18) - 1)).is_some());
        assert!(encode_offset(PatchKind::A64Imm19(0), 4 * (1 << 18)).is_none());
        assert!(encode_offset(PatchKind::A64Imm19(0), 6).is_none());
    }
}
