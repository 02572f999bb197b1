pub mod error;
pub mod long_double;
pub mod session;
pub mod source;
pub mod types;
