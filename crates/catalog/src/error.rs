use thiserror::Error;

use shelf_core::{StoreError, SubjectKind, Tier};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("tier '{tier}' may not {action}")]
    Forbidden { tier: Tier, action: &'static str },

    #[error("'{field}' is not a lockable field on a {}", .kind.as_str())]
    UnknownField { kind: SubjectKind, field: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
