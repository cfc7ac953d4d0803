pub mod error;
pub(crate) mod time;
