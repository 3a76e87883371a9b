//! Read/write lock manager keyed by object reference.
//!
//! Locks are granted to a [`LockHolder`] (normally a job). A holder may
//! acquire the same object more than once; every grant returns its own
//! [`UnlockToken`] and the object stays locked until every grant of every
//! holder is released. Waiters block on a condition variable with a
//! deadline, so the manager is meant to be called from blocking contexts
//! (worker threads or `spawn_blocking`).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::reference::LockObjectReference;
use crate::error::{Error, Result};

/// Default wait before a lock request gives up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Lock mode. `Write` is exclusive, `Read` is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    Read,
    Write,
}

impl std::fmt::Display for LockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockType::Read => write!(f, "read"),
            LockType::Write => write!(f, "write"),
        }
    }
}

/// Identity that owns lock grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockHolder(pub Uuid);

impl LockHolder {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LockHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LockHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A request for one lock on one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub object: LockObjectReference,
    pub lock_type: LockType,
    pub holder: LockHolder,
}

impl LockRequest {
    pub fn new(object: LockObjectReference, lock_type: LockType, holder: LockHolder) -> Self {
        Self {
            object,
            lock_type,
            holder,
        }
    }

    pub fn write(object: LockObjectReference, holder: LockHolder) -> Self {
        Self::new(object, LockType::Write, holder)
    }

    pub fn read(object: LockObjectReference, holder: LockHolder) -> Self {
        Self::new(object, LockType::Read, holder)
    }
}

/// Proof of a single grant. Passing it to [`LockManager::release_lock`]
/// releases exactly that grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockToken {
    grant: u64,
    object: LockObjectReference,
    holder: LockHolder,
    lock_type: LockType,
}

impl UnlockToken {
    pub fn object(&self) -> &LockObjectReference {
        &self.object
    }

    pub fn holder(&self) -> LockHolder {
        self.holder
    }

    /// Mode that was requested when this grant was made.
    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }
}

/// Point-in-time view of one lock, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    pub object: LockObjectReference,
    pub lock_type: LockType,
    pub holders: Vec<LockHolder>,
    pub grants: usize,
    pub waiting: usize,
}

/// One holder's grants on an object, each with the mode it was made in.
#[derive(Debug, Default)]
struct Holding {
    grants: BTreeMap<u64, LockType>,
}

impl Holding {
    /// Strongest mode among the grants still held.
    fn lock_type(&self) -> LockType {
        self.grants
            .values()
            .copied()
            .max()
            .unwrap_or(LockType::Read)
    }

    fn set_all(&mut self, lock_type: LockType) {
        for mode in self.grants.values_mut() {
            *mode = lock_type;
        }
    }
}

#[derive(Debug, Default)]
struct LockRecord {
    holders: BTreeMap<LockHolder, Holding>,
    upgrading: Option<LockHolder>,
    waiting: usize,
}

impl LockRecord {
    fn lock_type(&self) -> Option<LockType> {
        self.holders.values().map(Holding::lock_type).max()
    }

    fn can_grant(&self, holder: LockHolder, lock_type: LockType) -> bool {
        match self.holders.get(&holder) {
            Some(held) => {
                lock_type == LockType::Read
                    || held.lock_type() == LockType::Write
                    || self.holders.len() == 1
            }
            None => match lock_type {
                LockType::Read => {
                    self.lock_type() != Some(LockType::Write) && self.upgrading.is_none()
                }
                LockType::Write => self.holders.is_empty(),
            },
        }
    }

    fn grant(&mut self, holder: LockHolder, lock_type: LockType, grant: u64) {
        self.holders
            .entry(holder)
            .or_default()
            .grants
            .insert(grant, lock_type);
    }

    fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.waiting == 0 && self.upgrading.is_none()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    records: HashMap<LockObjectReference, LockRecord>,
    next_grant: u64,
}

impl LockTable {
    fn record(&mut self, object: &LockObjectReference) -> &mut LockRecord {
        self.records.entry(object.clone()).or_default()
    }

    fn remove_if_idle(&mut self, object: &LockObjectReference) {
        if self.records.get(object).is_some_and(LockRecord::is_idle) {
            self.records.remove(object);
        }
    }

    fn issue(&mut self, request: &LockRequest) -> UnlockToken {
        self.next_grant += 1;
        let grant = self.next_grant;
        self.record(&request.object)
            .grant(request.holder, request.lock_type, grant);
        UnlockToken {
            grant,
            object: request.object.clone(),
            holder: request.holder,
            lock_type: request.lock_type,
        }
    }
}

/// Map from object reference to read/write lock state.
#[derive(Debug)]
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    default_timeout: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl LockManager {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `ready` accepts the record for `object` or the deadline passes.
    fn wait_on<'a>(
        &'a self,
        mut table: MutexGuard<'a, LockTable>,
        object: &LockObjectReference,
        deadline: Instant,
        mut ready: impl FnMut(&LockRecord) -> bool,
    ) -> (MutexGuard<'a, LockTable>, bool) {
        loop {
            if ready(table.record(object)) {
                return (table, true);
            }
            let now = Instant::now();
            if now >= deadline {
                return (table, false);
            }
            table = self
                .released
                .wait_timeout(table, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Grant the lock immediately if it is compatible with the current holders.
    pub fn try_acquire_lock(&self, request: &LockRequest) -> Option<UnlockToken> {
        let mut table = self.table();
        if table
            .record(&request.object)
            .can_grant(request.holder, request.lock_type)
        {
            Some(table.issue(request))
        } else {
            table.remove_if_idle(&request.object);
            None
        }
    }

    /// Acquire a lock, waiting up to `timeout` for conflicting holders to release.
    ///
    /// A holder that already reads the object and asks for a write lock is
    /// upgraded in place once it is the only holder. While it waits, new
    /// readers from other holders are held back. Only one holder may wait
    /// for an upgrade on a given object; a second one fails with
    /// [`Error::LockUpgradeConflict`] instead of deadlocking.
    pub fn acquire_lock(&self, request: &LockRequest, timeout: Duration) -> Result<UnlockToken> {
        let deadline = Instant::now() + timeout;
        let mut table = self.table();

        let record = table.record(&request.object);
        let upgrading = request.lock_type == LockType::Write
            && record
                .holders
                .get(&request.holder)
                .is_some_and(|h| h.lock_type() == LockType::Read);
        if upgrading {
            match record.upgrading {
                Some(other) if other != request.holder => {
                    return Err(Error::LockUpgradeConflict {
                        object: request.object.to_string(),
                    });
                }
                _ => record.upgrading = Some(request.holder),
            }
        }
        record.waiting += 1;

        let (mut table, granted) = self.wait_on(table, &request.object, deadline, |r| {
            r.can_grant(request.holder, request.lock_type)
        });

        let record = table.record(&request.object);
        record.waiting -= 1;
        if upgrading {
            record.upgrading = None;
        }

        if granted {
            let token = table.issue(request);
            debug!(
                object = %request.object,
                lock_type = %request.lock_type,
                holder = %request.holder,
                "Lock granted"
            );
            Ok(token)
        } else {
            table.remove_if_idle(&request.object);
            drop(table);
            if upgrading {
                self.released.notify_all();
            }
            warn!(
                object = %request.object,
                lock_type = %request.lock_type,
                holder = %request.holder,
                ?timeout,
                "Timed out waiting for lock"
            );
            Err(Error::LockTimeout {
                object: request.object.to_string(),
                lock_type: request.lock_type,
                timeout,
            })
        }
    }

    /// Acquire with the manager's default timeout.
    pub fn acquire(&self, request: &LockRequest) -> Result<UnlockToken> {
        self.acquire_lock(request, self.default_timeout)
    }

    /// Upgrade the holder's read lock on the object to a write lock.
    ///
    /// Returns `true` when the holder ends up with a write lock, including
    /// when it already had one. Returns `false` when the holder has no lock
    /// on the object, another holder is already upgrading, or the other
    /// readers did not release within the default timeout.
    pub fn upgrade_lock_with_wait(&self, request: &LockRequest) -> bool {
        let deadline = Instant::now() + self.default_timeout;
        let mut table = self.table();
        let record = table.record(&request.object);

        match record.holders.get(&request.holder).map(Holding::lock_type) {
            None => {
                table.remove_if_idle(&request.object);
                return false;
            }
            Some(LockType::Write) => return true,
            Some(LockType::Read) => {}
        }
        if record.upgrading.is_some_and(|other| other != request.holder) {
            return false;
        }
        record.upgrading = Some(request.holder);

        let (mut table, granted) = self.wait_on(table, &request.object, deadline, |r| {
            r.holders.len() == 1
        });
        let record = table.record(&request.object);
        record.upgrading = None;
        let upgraded = granted
            && match record.holders.get_mut(&request.holder) {
                Some(held) => {
                    held.set_all(LockType::Write);
                    true
                }
                None => false,
            };
        drop(table);
        if !upgraded {
            self.released.notify_all();
        }
        upgraded
    }

    /// Turn the holder's write lock into a read lock and wake waiting readers.
    pub fn downgrade_lock(&self, request: &LockRequest) -> bool {
        let mut table = self.table();
        let downgraded = match table
            .records
            .get_mut(&request.object)
            .and_then(|r| r.holders.get_mut(&request.holder))
        {
            Some(held) if held.lock_type() == LockType::Write => {
                held.set_all(LockType::Read);
                true
            }
            _ => false,
        };
        drop(table);
        if downgraded {
            self.released.notify_all();
        }
        downgraded
    }

    /// Release one grant. Releasing a grant that is no longer held is a no-op.
    pub fn release_lock(&self, token: &UnlockToken) -> bool {
        let mut table = self.table();
        let released = match table.records.get_mut(&token.object) {
            Some(record) => match record.holders.get_mut(&token.holder) {
                Some(held) => {
                    let removed = held.grants.remove(&token.grant).is_some();
                    if held.grants.is_empty() {
                        record.holders.remove(&token.holder);
                    }
                    removed
                }
                None => false,
            },
            None => false,
        };
        table.remove_if_idle(&token.object);
        drop(table);

        if released {
            debug!(object = %token.object, holder = %token.holder, "Lock released");
            self.released.notify_all();
        } else {
            debug!(object = %token.object, "Lock already released");
        }
        released
    }

    /// Release every grant owned by `holder`. Returns the number of grants released.
    pub fn release_all(&self, holder: &LockHolder) -> usize {
        let mut table = self.table();
        let mut released = 0;
        for record in table.records.values_mut() {
            if let Some(held) = record.holders.remove(holder) {
                released += held.grants.len();
            }
        }
        table.records.retain(|_, record| !record.is_idle());
        drop(table);

        if released > 0 {
            info!(%holder, released, "Released remaining locks");
            self.released.notify_all();
        }
        released
    }

    /// Acquire several locks for one holder in canonical order.
    ///
    /// If an object appears more than once the strongest mode wins. When
    /// any acquisition fails, the grants already made are released before
    /// the error is returned.
    pub fn acquire_many(
        &self,
        holder: LockHolder,
        objects: &[(LockObjectReference, LockType)],
        timeout: Duration,
    ) -> Result<Vec<UnlockToken>> {
        let mut wanted: BTreeMap<&LockObjectReference, LockType> = BTreeMap::new();
        for (object, lock_type) in objects {
            let entry = wanted.entry(object).or_insert(*lock_type);
            *entry = (*entry).max(*lock_type);
        }

        let deadline = Instant::now() + timeout;
        let mut tokens = Vec::with_capacity(wanted.len());
        for (object, lock_type) in wanted {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let request = LockRequest::new(object.clone(), lock_type, holder);
            match self.acquire_lock(&request, remaining) {
                Ok(token) => tokens.push(token),
                Err(e) => {
                    for token in tokens.iter().rev() {
                        self.release_lock(token);
                    }
                    return Err(match e {
                        Error::LockTimeout { object, lock_type, .. } => Error::LockTimeout {
                            object,
                            lock_type,
                            timeout,
                        },
                        other => other,
                    });
                }
            }
        }
        Ok(tokens)
    }

    /// Acquire the same mode on every object and return a guard that
    /// releases them when dropped.
    pub fn acquire_all(
        &self,
        holder: LockHolder,
        objects: impl IntoIterator<Item = LockObjectReference>,
        lock_type: LockType,
        timeout: Duration,
    ) -> Result<LockGuard<'_>> {
        let objects: Vec<_> = objects.into_iter().map(|o| (o, lock_type)).collect();
        let tokens = self.acquire_many(holder, &objects, timeout)?;
        Ok(LockGuard {
            manager: self,
            tokens,
        })
    }

    pub fn is_locked(&self, object: &LockObjectReference) -> bool {
        self.lock_type(object).is_some()
    }

    /// Effective mode on an object, `None` when unlocked.
    pub fn lock_type(&self, object: &LockObjectReference) -> Option<LockType> {
        self.table().records.get(object).and_then(LockRecord::lock_type)
    }

    /// Objects on which `holder` has at least one grant.
    pub fn held_by(&self, holder: &LockHolder) -> Vec<(LockObjectReference, LockType)> {
        let table = self.table();
        let mut held: Vec<_> = table
            .records
            .iter()
            .filter_map(|(object, record)| {
                record
                    .holders
                    .get(holder)
                    .map(|h| (object.clone(), h.lock_type()))
            })
            .collect();
        held.sort_by(|a, b| a.0.cmp(&b.0));
        held
    }

    pub fn snapshot(&self) -> Vec<LockInfo> {
        let table = self.table();
        let mut infos: Vec<_> = table
            .records
            .iter()
            .filter_map(|(object, record)| {
                let lock_type = record.lock_type()?;
                Some(LockInfo {
                    object: object.clone(),
                    lock_type,
                    holders: record.holders.keys().copied().collect(),
                    grants: record.holders.values().map(|h| h.grants.len()).sum(),
                    waiting: record.waiting,
                })
            })
            .collect();
        infos.sort_by(|a, b| a.object.cmp(&b.object));
        infos
    }
}

/// Grants that are released together when the guard is dropped.
#[derive(Debug)]
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    tokens: Vec<UnlockToken>,
}

impl LockGuard<'_> {
    pub fn tokens(&self) -> &[UnlockToken] {
        &self.tokens
    }

    /// Keep the grants past the guard's lifetime. The caller becomes
    /// responsible for releasing them.
    pub fn into_tokens(mut self) -> Vec<UnlockToken> {
        std::mem::take(&mut self.tokens)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        for token in self.tokens.iter().rev() {
            self.manager.release_lock(token);
        }
    }
}
