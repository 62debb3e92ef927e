//! Cache-driven pool import reconciliation engine.
//!
//! Data flows one direction through this crate:
//!
//! ```text
//! raw records -> filter -> ownership resolution -> attach/mount -> status
//! ```
//!
//! Nothing here retains state across invocations; each [`driver::run_search`]
//! call is a self-contained session against an injected [`runtime::PoolRuntime`].

pub mod driver;
pub mod filter;
pub mod orchestrate;
pub mod resolve;
pub mod runtime;

pub use driver::{
    CandidateSource, ImportOutcome, SearchRequest, SweepOptions, SweepReport, exit_status,
    import_all, run_search,
};
pub use filter::Candidate;
pub use runtime::{FixedHost, HostIdentity, PoolHandle, PoolRuntime, Session, SystemHost};
