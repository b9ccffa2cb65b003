//! sqlgate core
//!
//! Types, traits and error handling shared by every stage of the query
//! pipeline.

pub mod classification;
pub mod clock;
pub mod error;
pub mod types;

pub use classification::{Classification, OperationKind, QueryClassifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{FilterError, FilterResult};
pub use types::*;
