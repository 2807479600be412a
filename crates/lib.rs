pub mod domain;
pub mod infra;
pub mod internal_api;
pub mod observability;
pub mod payments;
