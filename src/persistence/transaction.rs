//! Scoped unit-of-work execution.

use tracing::{debug, warn};

use super::events::EventSink;
use super::store::Store;
use super::unit::UnitOfWork;
use crate::error::Result;

/// Run `body` inside a fresh unit of work.
///
/// On `Ok` the staged changes are committed and the staged events are
/// published. On `Err`, or if `body` panics, the unit is dropped and
/// nothing is written.
pub fn execute<T>(
    store: &dyn Store,
    events: &dyn EventSink,
    body: impl FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
) -> Result<T> {
    let mut uow = UnitOfWork::new(store);
    match body(&mut uow) {
        Ok(value) => {
            let (changes, published) = uow.into_parts();
            store.commit(changes)?;
            for event in published {
                events.publish(event);
            }
            Ok(value)
        }
        Err(e) => {
            if uow.is_dirty() {
                warn!(error = %e, "Rolling back staged changes");
            } else {
                debug!(error = %e, "Rolling back");
            }
            Err(e)
        }
    }
}
