use super::Extension;
use crate::core::claim::{ClaimArena, TxnRef};

/// Baseline: no claim is ever drawn, the whole debit is untracked.
pub(super) fn extend(arena: &ClaimArena, transaction: TxnRef) -> Extension {
    Extension {
        untracked: arena.transaction(transaction).debit(),
        ..Extension::default()
    }
}
