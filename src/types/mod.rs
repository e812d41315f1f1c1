pub mod trading;
pub mod candle;

pub use trading::*;
pub use candle::*;
