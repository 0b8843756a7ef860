mod rest;

pub use rest::{classify_error, BinanceClient};
