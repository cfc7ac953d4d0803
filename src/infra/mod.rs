pub mod credentials;
pub mod logging;
