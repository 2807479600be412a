pub mod billing;
pub mod enums;
pub mod users;
