//! Last-operation lifecycle of a service instance.
//!
//! An operation starts `in progress` and moves once to `succeeded` or
//! `failed`. A terminal operation is only ever replaced by [`start`].

use chrono::{DateTime, Utc};
use service_broker_sdk::{LastOperation, OperationState, OperationType};

use super::error::DomainError;

/// Fresh `(operation_type, in progress)` operation.
#[must_use]
pub fn start(operation_type: OperationType, now: DateTime<Utc>) -> LastOperation {
    LastOperation {
        operation_type,
        state: OperationState::InProgress,
        description: None,
        broker_operation: None,
        created_at: now,
        updated_at: now,
    }
}

/// Move an in-progress operation to a terminal state.
///
/// # Errors
///
/// Returns `InvalidTransition` when `op` is already terminal or `to` is
/// `in progress`.
pub fn transition(
    op: &mut LastOperation,
    to: OperationState,
    description: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    if op.state.is_terminal() || !to.is_terminal() {
        return Err(DomainError::InvalidTransition {
            operation_type: op.operation_type,
            from: op.state,
            to,
        });
    }
    op.state = to;
    if description.is_some() {
        op.description = description;
    }
    op.updated_at = now;
    Ok(())
}

/// Store the broker's operation token on an accepted operation.
pub fn accept(op: &mut LastOperation, broker_operation: Option<String>, now: DateTime<Utc>) {
    op.broker_operation = broker_operation;
    op.updated_at = now;
}

/// Update the description of a running operation.
///
/// Returns `true` when the description changed.
pub fn describe(op: &mut LastOperation, description: Option<String>, now: DateTime<Utc>) -> bool {
    if description.is_none() || op.description == description {
        return false;
    }
    op.description = description;
    op.updated_at = now;
    true
}

/// Description stored when polling gave up.
#[must_use]
pub fn poll_expired_description(operation_type: OperationType) -> String {
    format!("Service Broker failed to {operation_type} within the required time.")
}

/// True when `current` is still the same running operation as `expected`.
///
/// Used after reloading a row under lock to detect that another actor
/// finished or replaced the operation in the meantime.
#[must_use]
pub fn still_running(current: Option<&LastOperation>, expected: &LastOperation) -> bool {
    current.is_some_and(|op| {
        op.is_in_progress()
            && op.operation_type == expected.operation_type
            && op.created_at == expected.created_at
    })
}
