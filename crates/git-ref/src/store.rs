use git_hash::ObjectId;
use git_utils::lockfile::LockOptions;

use crate::error::RefError;
use crate::name::RefName;
use crate::reflog::ReflogEntry;
use crate::Reference;

/// Configurable lock-acquisition behavior for ref transactions:
/// `lock-timeout-ms`, `lock-retry-interval-ms`, `stale-lock-threshold-ms`,
/// and `break-stale`.
///
/// This is `git-ref`'s view of the lower-level mechanism in
/// `git_utils::lockfile::LockOptions`; `FilesRefStore` converts between the
/// two at the point it acquires a lock.
#[derive(Debug, Clone, Copy)]
pub struct LockPolicy {
    pub timeout_ms: u64,
    pub retry_interval_ms: u64,
    pub stale_threshold_ms: Option<u64>,
    pub break_stale: bool,
}

impl Default for LockPolicy {
    fn default() -> Self {
        let defaults = LockOptions::default();
        Self {
            timeout_ms: defaults.timeout_ms,
            retry_interval_ms: defaults.retry_interval_ms,
            stale_threshold_ms: defaults.stale_threshold_ms,
            break_stale: defaults.break_stale,
        }
    }
}

impl From<LockPolicy> for LockOptions {
    fn from(policy: LockPolicy) -> Self {
        LockOptions {
            timeout_ms: policy.timeout_ms,
            retry_interval_ms: policy.retry_interval_ms,
            stale_threshold_ms: policy.stale_threshold_ms,
            break_stale: policy.break_stale,
        }
    }
}

/// Trait for pluggable reference storage backends.
///
/// Provides the core operations: resolve, update, iterate, and reflog access.
/// The default implementation is `FilesRefStore` (loose refs + packed-refs).
pub trait RefStore: Send + Sync {
    /// Resolve a ref name to a Reference (may be Direct or Symbolic).
    fn resolve(&self, name: &RefName) -> Result<Option<Reference>, RefError>;

    /// Resolve a ref name to its final OID, following symbolic ref chains.
    fn resolve_to_oid(&self, name: &RefName) -> Result<Option<ObjectId>, RefError>;

    /// Iterate refs with an optional prefix filter.
    /// Results are sorted lexicographically by full ref name.
    fn iter(
        &self,
        prefix: Option<&str>,
    ) -> Result<Box<dyn Iterator<Item = Result<Reference, RefError>> + '_>, RefError>;

    /// Read the reflog for a ref.
    fn reflog(&self, name: &RefName) -> Result<Vec<ReflogEntry>, RefError>;

    /// Append a reflog entry for a ref.
    fn append_reflog(&self, name: &RefName, entry: &ReflogEntry) -> Result<(), RefError>;
}

/// Atomic batch of ref updates.
///
/// Collects multiple ref updates and applies them atomically:
/// all succeed or all fail.
pub struct RefTransaction {
    pub(crate) updates: Vec<RefUpdate>,
}

/// A single update within a transaction.
pub struct RefUpdate {
    pub name: RefName,
    pub action: RefUpdateAction,
    pub reflog_message: Option<String>,
}

/// The action to perform on a ref within a transaction.
pub enum RefUpdateAction {
    /// Create a new ref (fails if it already exists).
    Create { new_target: ObjectId },
    /// Update an existing ref.
    ///
    /// `old_target` follows the null/zero/value three-way rule: `None` means
    /// unconditional (accept whatever the current value is), `Some(oid)`
    /// where `oid.is_null()` means the ref must not currently exist, and any
    /// other `Some(oid)` is a compare-and-swap against the current value.
    /// `force` bypasses the check entirely and always writes `new_target`.
    Update {
        old_target: Option<ObjectId>,
        new_target: ObjectId,
        force: bool,
    },
    /// Delete a ref.
    ///
    /// `old_target` follows the same three-way rule as `Update`; `None`
    /// deletes whatever is currently there without a CAS check.
    Delete {
        old_target: Option<ObjectId>,
        force: bool,
    },
    /// Set a symbolic ref to point to another ref.
    SetSymbolic { target: RefName },
}

impl RefTransaction {
    /// Create a new empty transaction.
    pub fn new() -> Self {
        Self {
            updates: Vec::new(),
        }
    }

    /// Add an update (CAS) operation to the transaction: succeeds only if
    /// the ref currently holds `old`.
    pub fn update(
        &mut self,
        name: RefName,
        old: ObjectId,
        new: ObjectId,
        message: impl Into<String>,
    ) {
        self.updates.push(RefUpdate {
            name,
            action: RefUpdateAction::Update {
                old_target: Some(old),
                new_target: new,
                force: false,
            },
            reflog_message: Some(message.into()),
        });
    }

    /// Add an unconditional update: write `new` regardless of the ref's
    /// current value (creating it if absent).
    pub fn update_unconditional(&mut self, name: RefName, new: ObjectId, message: impl Into<String>) {
        self.updates.push(RefUpdate {
            name,
            action: RefUpdateAction::Update {
                old_target: None,
                new_target: new,
                force: false,
            },
            reflog_message: Some(message.into()),
        });
    }

    /// Add a forced update, bypassing any CAS check.
    pub fn update_forced(&mut self, name: RefName, new: ObjectId, message: impl Into<String>) {
        self.updates.push(RefUpdate {
            name,
            action: RefUpdateAction::Update {
                old_target: None,
                new_target: new,
                force: true,
            },
            reflog_message: Some(message.into()),
        });
    }

    /// Add a create operation to the transaction.
    pub fn create(&mut self, name: RefName, target: ObjectId, message: impl Into<String>) {
        self.updates.push(RefUpdate {
            name,
            action: RefUpdateAction::Create { new_target: target },
            reflog_message: Some(message.into()),
        });
    }

    /// Add a delete operation to the transaction: succeeds only if the ref
    /// currently holds `old`.
    pub fn delete(&mut self, name: RefName, old: ObjectId, message: impl Into<String>) {
        self.updates.push(RefUpdate {
            name,
            action: RefUpdateAction::Delete {
                old_target: Some(old),
                force: false,
            },
            reflog_message: Some(message.into()),
        });
    }

    /// Add an unconditional delete: remove the ref regardless of its
    /// current value.
    pub fn delete_unconditional(&mut self, name: RefName, message: impl Into<String>) {
        self.updates.push(RefUpdate {
            name,
            action: RefUpdateAction::Delete {
                old_target: None,
                force: false,
            },
            reflog_message: Some(message.into()),
        });
    }

    /// Add a set-symbolic operation to the transaction.
    pub fn set_symbolic(
        &mut self,
        name: RefName,
        target: RefName,
        message: impl Into<String>,
    ) {
        self.updates.push(RefUpdate {
            name,
            action: RefUpdateAction::SetSymbolic { target },
            reflog_message: Some(message.into()),
        });
    }

    /// Get the list of updates in this transaction.
    pub fn updates(&self) -> &[RefUpdate] {
        &self.updates
    }

    /// Check if the transaction is empty.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

impl Default for RefTransaction {
    fn default() -> Self {
        Self::new()
    }
}
