//! Deliver / RecordFormatter traits - the two collaborators behind every sink
//!
//! A sink is `formatter -> delivery`: the formatter turns a `Record` into the
//! bytes or fields a transport understands, the delivery pushes them out and
//! reports success or failure. Retry and pacing live in the dispatcher, never
//! in a delivery implementation.

use crate::{ContractError, FormattedOutput, Record};

/// Delivery collaborator
///
/// All delivery implementations must implement this trait.
#[trait_variant::make(Deliver: Send)]
pub trait LocalDeliver {
    /// Delivery name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Deliver one formatted output
    ///
    /// # Errors
    /// Any error counts as a failed attempt; the caller decides whether to retry.
    async fn deliver(&mut self, output: &FormattedOutput) -> Result<(), ContractError>;

    /// Release transport resources
    async fn close(&mut self) -> Result<(), ContractError>;
}

/// Record transform
///
/// Pure function `Record -> FormattedOutput`; must not block.
pub trait RecordFormatter: Send + Sync {
    /// Formatter name (used for logging)
    fn name(&self) -> &str;

    /// Render a record
    fn format(&self, record: &Record) -> Result<FormattedOutput, ContractError>;
}
