//! Object locking shared by every running job.

mod manager;
mod reference;
mod task;

pub use manager::{
    LockGuard, LockHolder, LockInfo, LockManager, LockRequest, LockType, UnlockToken,
    DEFAULT_LOCK_TIMEOUT,
};
pub use reference::{LockObjectReference, ObjectType};
pub use task::UnlockObjectTask;
