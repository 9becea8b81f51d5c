use super::Extension;
use crate::core::claim::{Claim, ClaimArena, TxnRef};
use crate::error::AccountingError;
use rust_decimal::Decimal;

/// LIFO: pop the most recent claims until the debit is covered.
///
/// The last claim touched is split when it holds more than what is still
/// needed; its leftover stays on the stack. Children come back in their
/// original stack order so the target sees the same relative recency.
pub(super) fn extend(
    claims: &mut Vec<Claim>,
    arena: &mut ClaimArena,
    transaction: TxnRef,
    resolution: Decimal,
) -> Result<Extension, AccountingError> {
    let mut need = arena.transaction(transaction).debit();
    let mut children = Vec::new();
    let mut dropped = Decimal::ZERO;

    while need > Decimal::ZERO {
        let Some(top) = claims.last_mut() else {
            break;
        };
        let take = need.min(top.amount());
        top.decrement(take)?;
        need -= take;

        let source = top.id();
        let leftover = top.amount();
        if leftover < resolution {
            dropped += leftover;
            claims.pop();
        }

        let carried = arena.transaction(transaction).pass_through(take);
        if carried >= resolution {
            let id = arena.extend(source, transaction);
            children.push(Claim::new(id, carried));
        } else {
            dropped += take;
        }
    }

    children.reverse();
    Ok(Extension {
        children,
        untracked: need,
        dropped,
    })
}
