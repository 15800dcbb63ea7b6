pub mod order;
pub mod package;
pub mod payment;
pub mod user;
