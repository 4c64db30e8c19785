//! The catalog side of ingestion: stored records, editorial locks,
//! content eligibility and the merge that writes fetched data.

pub mod eligibility;
pub mod error;
pub mod locks;
pub mod merge;
pub mod series;
pub mod store;

pub use eligibility::{EligibilityGate, EligibilityPolicy, Override, PairingPolicy, PolicyDecision, Verdict};
pub use error::CatalogError;
pub use locks::{FieldLock, GlobalLockPolicy, GlobalPolicyCache, LockResolver, ResolvedLocks};
pub use merge::{MergeAction, MergeEngine, MergeOutcome, WorkChange, WorkPatch};
pub use series::{PrimaryWorkSelector, SiblingWork};
pub use store::{
    CatalogStore, LockStore, MemoryCatalogStore, MemoryLockStore, MemoryOverrideStore,
    OverrideStore, PgCatalogStore, PgLockStore, PgOverrideStore,
};
