//! `fleetledger-recon` — reconciliation engine for the order ledger.
//!
//! Pure engine crate: receives canonical records and the stored snapshot
//! they resolve against, returns versioned snapshots plus classified audit
//! changes. No IO or persistence dependencies.

pub mod classify;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod key;
pub mod model;

pub use engine::{reconcile, Resolution};
pub use error::ReconError;
pub use fingerprint::Fingerprint;
pub use key::BusinessKey;
pub use model::{
    CanonicalField, ChangeType, FieldDelta, MatchStatus, OrderChange, OrderSnapshot, RawRecord,
};
