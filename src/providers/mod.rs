pub mod base;
pub mod tiingo;
