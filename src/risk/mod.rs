pub mod sizing;

pub use sizing::{regime_factor, KellySizer, SizingResult};
