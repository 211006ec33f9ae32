//! `fleetledger-store` — SQLite persistence for the order ledger.

pub mod batch;
pub mod error;
pub mod ledger;

pub use batch::BatchWriter;
pub use error::StoreError;
pub use ledger::{
    ChangeFilter, ChangeRecord, FileStatus, Ledger, SessionRow, SessionStatus, SourceFileRow,
};
