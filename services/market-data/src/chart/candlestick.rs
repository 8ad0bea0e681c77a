use super::{
    colors, draw_filled_rect, draw_horizontal_line, draw_line, draw_vertical_line, ChartArtifact,
    ChartConfig, ChartRenderer, Overlay, RenderError,
};
use crate::types::{Candle, CandleSource, TimeFrame};
use image::RgbImage;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;

/// Files below this size are treated as a failed render
const MIN_ARTIFACT_BYTES: u64 = 1024;

/// Renders candlestick charts from a [`CandleSource`] into PNG files
pub struct CandlestickRenderer {
    source: Arc<dyn CandleSource>,
    output_dir: PathBuf,
    config: ChartConfig,
}

impl CandlestickRenderer {
    /// Fewer candles than this and the chart is not worth analysing
    pub const MIN_CANDLES: usize = 50;
    /// Candles requested per chart
    pub const CANDLE_LIMIT: usize = 200;

    pub fn new(source: Arc<dyn CandleSource>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            output_dir: output_dir.into(),
            config: ChartConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ChartConfig) -> Self {
        self.config = config;
        self
    }

    fn file_name(symbol: &str, timeframe: TimeFrame) -> String {
        let sym: String = symbol
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        format!("chart_{}_{}_{}.png", sym, timeframe, uuid::Uuid::new_v4().simple())
    }
}

#[async_trait::async_trait]
impl ChartRenderer for CandlestickRenderer {
    async fn render(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        overlay: Option<&Overlay>,
    ) -> Result<ChartArtifact, RenderError> {
        let candles = self
            .source
            .candles(symbol, timeframe, Self::CANDLE_LIMIT)
            .await?;

        if candles.len() < Self::MIN_CANDLES {
            return Err(RenderError::InsufficientData {
                timeframe,
                available: candles.len(),
                required: Self::MIN_CANDLES,
            });
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let artifact = ChartArtifact::new(
            self.output_dir.join(Self::file_name(symbol, timeframe)),
            timeframe,
        );

        // Artifact moves into the blocking task: an abandoned render still cleans up
        let overlay = overlay.cloned();
        let config = self.config.clone();
        let artifact = tokio::task::spawn_blocking(move || {
            draw_chart(&candles, overlay.as_ref(), &config)
                .save_with_format(artifact.path(), image::ImageFormat::Png)
                .map(|_| artifact)
        })
        .await
        .map_err(|e| RenderError::Encode(e.to_string()))?
        .map_err(|e| RenderError::Encode(e.to_string()))?;

        let size = tokio::fs::metadata(artifact.path()).await?.len();
        if size < MIN_ARTIFACT_BYTES {
            return Err(RenderError::Encode(format!(
                "chart file is only {} bytes",
                size
            )));
        }

        tracing::debug!(
            symbol,
            timeframe = %timeframe,
            path = %artifact.path().display(),
            bytes = size,
            "Rendered chart"
        );
        Ok(artifact)
    }
}

/// Vertical price axis mapped onto pixel rows
#[derive(Debug, Clone, Copy)]
pub(crate) struct PriceScale {
    lo: f64,
    hi: f64,
    top: u32,
    bottom: u32,
}

impl PriceScale {
    pub(crate) fn fit(candles: &[Candle], overlay: Option<&Overlay>, config: &ChartConfig) -> Self {
        let mut lo = f64::MAX;
        let mut hi = f64::MIN;
        for c in candles {
            lo = lo.min(to_f64(c.low));
            hi = hi.max(to_f64(c.high));
        }
        if let Some(overlay) = overlay {
            for level in overlay_levels(overlay) {
                lo = lo.min(level);
                hi = hi.max(level);
            }
        }
        if lo > hi {
            lo = 0.0;
            hi = 1.0;
        }

        let span = hi - lo;
        let pad = if span > 0.0 {
            span * 0.02
        } else {
            (hi.abs() * 0.01).max(1.0)
        };

        Self {
            lo: lo - pad,
            hi: hi + pad,
            top: config.margin,
            bottom: config.height.saturating_sub(config.margin + 1).max(config.margin),
        }
    }

    pub(crate) fn y(&self, price: f64) -> u32 {
        let t = ((self.hi - price) / (self.hi - self.lo)).clamp(0.0, 1.0);
        self.top + (t * f64::from(self.bottom - self.top)).round() as u32
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn overlay_levels(overlay: &Overlay) -> Vec<f64> {
    let mut levels = vec![to_f64(overlay.stop_loss), to_f64(overlay.take_profit)];
    if let Some(entry) = overlay.entry {
        levels.push(to_f64(entry));
    }
    levels
}

/// Simple moving average of closes; `None` until the window fills
fn sma(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; candles.len()];
    }
    let closes: Vec<f64> = candles.iter().map(|c| to_f64(c.close)).collect();
    let mut out = Vec::with_capacity(closes.len());
    let mut sum = 0.0;
    for (i, close) in closes.iter().enumerate() {
        sum += close;
        if i >= period {
            sum -= closes[i - period];
        }
        out.push((i + 1 >= period).then(|| sum / period as f64));
    }
    out
}

/// Draw candles, a moving average and optional trade levels
pub fn draw_chart(candles: &[Candle], overlay: Option<&Overlay>, config: &ChartConfig) -> RgbImage {
    let mut img = RgbImage::from_pixel(config.width, config.height, config.background);
    let left = config.margin;
    let right = config.width.saturating_sub(config.margin + 1).max(left);
    let scale = PriceScale::fit(candles, overlay, config);

    for i in 0..=4u32 {
        let y = scale.top + (scale.bottom - scale.top) * i / 4;
        draw_horizontal_line(&mut img, y, left, right, colors::GRID, None);
    }

    if candles.is_empty() {
        return img;
    }

    let slot = f64::from(right - left) / candles.len() as f64;
    let body_width = ((slot * 0.6) as u32).max(1);
    let center_x = |i: usize| left as f64 + slot * (i as f64 + 0.5);

    for (i, candle) in candles.iter().enumerate() {
        let cx = center_x(i) as u32;
        let color = if candle.close >= candle.open {
            config.bullish_color
        } else {
            config.bearish_color
        };

        draw_vertical_line(
            &mut img,
            cx,
            scale.y(to_f64(candle.high)),
            scale.y(to_f64(candle.low)),
            color,
        );

        let y_open = scale.y(to_f64(candle.open));
        let y_close = scale.y(to_f64(candle.close));
        let body_top = y_open.min(y_close);
        let body_height = (y_open.max(y_close) - body_top).max(1);
        draw_filled_rect(
            &mut img,
            cx.saturating_sub(body_width / 2),
            body_top,
            body_width,
            body_height,
            color,
        );
    }

    let averages = sma(candles, config.sma_period);
    let points: Vec<(i64, i64)> = averages
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (center_x(i) as i64, i64::from(scale.y(v)))))
        .collect();
    for pair in points.windows(2) {
        draw_line(&mut img, pair[0], pair[1], colors::BLUE);
    }

    if let Some(overlay) = overlay {
        let mut level = |price: Decimal, color: image::Rgb<u8>, dash: Option<u32>| {
            let y = scale.y(to_f64(price));
            draw_horizontal_line(&mut img, y, left, right, color, dash);
            draw_horizontal_line(&mut img, y + 1, left, right, color, dash);
        };
        level(overlay.stop_loss, colors::RED, None);
        level(overlay.take_profit, colors::GREEN, None);
        if let Some(entry) = overlay.entry {
            level(entry, colors::WHITE, Some(8));
        }
    }

    img
}
