use crate::model::*;

use super::EngineError;

// The transition-authorization table. One function per guarded operation:
// first the capability row (who), then the state row (when). Mutations call
// these in that order, so a customer poking a foreign reservation never
// learns more than "not found" (scoping happens before any of this).

/// Quantity update: owner while pending, admin any row. The pending-only
/// state rule applies to everyone and is checked separately.
pub(crate) fn authorize_update(actor: &Actor, r: &Reservation) -> Result<(), EngineError> {
    if actor.is_admin() || (actor.owns(r) && r.status == ReservationStatus::Pending) {
        Ok(())
    } else {
        Err(EngineError::Forbidden("only pending reservations may be changed by their owner"))
    }
}

/// Confirmation is admin-only.
pub(crate) fn authorize_confirm(actor: &Actor) -> Result<(), EngineError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Forbidden("confirmation requires the admin capability"))
    }
}

/// Cancel: owner or admin, in any live state.
pub(crate) fn authorize_cancel(actor: &Actor, r: &Reservation) -> Result<(), EngineError> {
    if actor.is_admin() || actor.owns(r) {
        Ok(())
    } else {
        Err(EngineError::Forbidden("cancel requires ownership or the admin capability"))
    }
}

/// Delete: owner while pending, admin any row. Admins still hit the
/// confirmed-row state gate below.
pub(crate) fn authorize_delete(actor: &Actor, r: &Reservation) -> Result<(), EngineError> {
    if actor.is_admin() || (actor.owns(r) && r.status == ReservationStatus::Pending) {
        Ok(())
    } else {
        Err(EngineError::Forbidden("only pending reservations may be deleted by their owner"))
    }
}

/// Schedule management is admin-only.
pub(crate) fn authorize_schedule_admin(actor: &Actor) -> Result<(), EngineError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Forbidden("schedule management requires the admin capability"))
    }
}

/// Confirm and quantity-update both require a pending row.
pub(crate) fn check_pending(r: &Reservation) -> Result<(), EngineError> {
    match r.status {
        ReservationStatus::Pending => Ok(()),
        other => Err(EngineError::NotPending(other)),
    }
}

/// Cancel-after-cancel is a reported error, not a silent no-op.
pub(crate) fn check_cancellable(r: &Reservation) -> Result<(), EngineError> {
    match r.status {
        ReservationStatus::Cancelled => Err(EngineError::AlreadyCancelled(r.id)),
        _ => Ok(()),
    }
}

/// A confirmed row is never deletable; cancelling is the only way out,
/// because that path releases the seats the row holds.
pub(crate) fn check_deletable(r: &Reservation) -> Result<(), EngineError> {
    match r.status {
        ReservationStatus::Confirmed => Err(EngineError::ConfirmedNotDeletable(r.id)),
        _ => Ok(()),
    }
}
