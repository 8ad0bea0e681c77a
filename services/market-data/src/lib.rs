//! Market data for the signal service: live quotes, candles and chart rendering.

pub mod chart;
pub mod types;
pub mod sources {
    pub mod binance;
}

pub use chart::{ChartArtifact, ChartConfig, ChartRenderer, CandlestickRenderer, Overlay, RenderError};
pub use sources::binance::BinanceClient;
pub use types::*;
