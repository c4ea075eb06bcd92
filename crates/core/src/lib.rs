//! Core types, query building and storage contracts for pirsch.

pub mod error;
pub mod field;
pub mod filter;
pub mod fingerprint;
pub mod hit;
pub mod limits;
pub mod model;
pub mod query;
pub mod session;
pub mod stats;
pub mod store;

pub use error::{Error, ErrorKind, Result};
pub use field::{Affinity, Field};
pub use filter::{Direction, Filter, Platform, Search, Sort};
pub use fingerprint::{fingerprint, Salts};
pub use hit::{EventRequest, HitRequest};
pub use model::*;
pub use query::{Query, QueryArg, Table};
pub use session::SessionState;
pub use stats::*;
pub use store::Store;
