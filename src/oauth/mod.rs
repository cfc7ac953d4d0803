pub mod client;
pub mod refresh;
pub mod token_exchange;
