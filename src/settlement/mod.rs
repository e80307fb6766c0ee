pub mod evaluator;
pub mod market;

pub use evaluator::{evaluate, Settlement};
pub use market::{parse_market, parse_market_for, Market};
