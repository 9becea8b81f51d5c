use super::Extension;
use crate::core::claim::{Claim, ClaimArena, TxnRef};
use crate::error::AccountingError;
use rust_decimal::Decimal;

/// Proportional: every open claim gives up the same share of itself.
///
/// The share is `debit / balance`, so untracked balance contributes its own
/// share too; that part comes back as the untracked remainder.
pub(super) fn extend(
    claims: &mut Vec<Claim>,
    balance: Decimal,
    arena: &mut ClaimArena,
    transaction: TxnRef,
    resolution: Decimal,
) -> Result<Extension, AccountingError> {
    let debit = arena.transaction(transaction).debit();
    if balance <= Decimal::ZERO {
        return Ok(Extension {
            untracked: debit,
            ..Extension::default()
        });
    }

    let split = (debit / balance).min(Decimal::ONE);
    let mut children = Vec::new();
    let mut dropped = Decimal::ZERO;
    let mut drawn = Decimal::ZERO;

    for claim in claims.iter_mut() {
        let take = claim.amount() * split;
        claim.decrement(take)?;
        drawn += take;

        let carried = arena.transaction(transaction).pass_through(take);
        if carried >= resolution {
            let id = arena.extend(claim.id(), transaction);
            children.push(Claim::new(id, carried));
        } else {
            dropped += take;
        }
    }

    claims.retain(|claim| {
        if claim.amount() < resolution {
            dropped += claim.amount();
            false
        } else {
            true
        }
    });

    Ok(Extension {
        children,
        untracked: (debit - drawn).max(Decimal::ZERO),
        dropped,
    })
}
