//! Core data model.

pub mod request;

pub use request::{Kind, NewRequest, Request, RequestFilter, RequestId, Status, WorkerId};
