pub mod clock;
pub mod config;
pub mod error;
pub mod exchange;
pub mod progress;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, TESTNET_BASE_URL};
pub use error::{Error, ErrorKind, OrderError, Result};
pub use exchange::ExchangeClient;
pub use progress::{NullSink, ProgressSink};
pub use types::*;
