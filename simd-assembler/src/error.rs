//! Errors raised while assembling a kernel.

use crate::builder::Label;

/// Failure reported by [`crate::Asm::finish`].
///
/// Operand legality is checked when the kernel is compiled; everything that
/// is left is about control flow, which can only be resolved once every label
/// has been bound.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    /// A branch names a label that was never bound.
    #[error("branch to unbound label {0}")]
    UnboundLabel(Label),
    /// A label was bound at two positions.
    #[error("label {0} bound twice")]
    LabelRebound(Label),
    /// The branch displacement does not fit the encoding's offset field.
    #[error("branch to label {label} out of range (offset {offset})")]
    BranchOutOfRange {
        /// Branch target.
        label: Label,
        /// Byte distance that failed to encode.
        offset: i64,
    },
    /// The branch would enter or leave a scoped rounding-mode override.
    #[error("branch to label {label} crosses a rounding scope")]
    CrossesRoundingScope {
        /// Branch target.
        label: Label,
    },
}
