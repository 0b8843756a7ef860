pub mod binance;
pub mod cancel;
pub mod executor;
pub mod lifecycle;
pub mod run;
pub mod schedule;
pub mod slicer;

pub use binance::BinanceClient;
pub use cancel::CancelFlag;
pub use executor::{OrderExecutor, TwapRequest};
pub use lifecycle::TwapManager;
pub use run::{validate_plan, TwapHandle, TwapRun};
pub use schedule::schedule_offsets;
pub use common::MAX_QUANTITY_PRECISION;
pub use slicer::{slice_quantity, MAX_SLICE_COUNT};
