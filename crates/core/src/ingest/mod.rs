pub mod error;
pub mod fmp;
pub mod provider;
