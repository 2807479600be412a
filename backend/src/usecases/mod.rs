pub mod accounts;
pub mod billing;
pub mod proxy;
