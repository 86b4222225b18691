// Application layer: report assembly over an AggregateSource.

pub mod dashboard;
pub mod error;
pub mod reporting;
pub mod service;
pub mod source;

pub use dashboard::*;
pub use error::*;
pub use reporting::*;
pub use service::*;
pub use source::*;
