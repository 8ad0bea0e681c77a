//! Chart rendering
//!
//! Turns candles into PNG files that can be handed to a vision model.
//! Every rendered file is owned by a [`ChartArtifact`] and removed from disk
//! when the artifact is dropped, whether the caller succeeded or bailed out.

mod candlestick;

pub use candlestick::{draw_chart, CandlestickRenderer};

use crate::types::{MarketDataError, TimeFrame};
use image::{Rgb, RgbImage};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};

/// Common color definitions
pub mod colors {
    use image::Rgb;

    pub const GREEN: Rgb<u8> = Rgb([0, 200, 83]);
    pub const RED: Rgb<u8> = Rgb([255, 68, 68]);
    pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
    pub const BACKGROUND: Rgb<u8> = Rgb([19, 23, 34]);
    pub const GRID: Rgb<u8> = Rgb([42, 46, 57]);
    pub const BLUE: Rgb<u8> = Rgb([33, 150, 243]);
    pub const ORANGE: Rgb<u8> = Rgb([255, 152, 0]);
}

/// Image configuration
#[derive(Debug, Clone)]
pub struct ChartConfig {
    pub width: u32,
    pub height: u32,
    pub margin: u32,
    pub background: Rgb<u8>,
    pub bullish_color: Rgb<u8>,
    pub bearish_color: Rgb<u8>,
    /// Period of the moving average drawn over the candles
    pub sma_period: usize,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            margin: 40,
            background: colors::BACKGROUND,
            bullish_color: colors::GREEN,
            bearish_color: colors::RED,
            sma_period: 21,
        }
    }
}

/// Trade levels drawn on top of a chart for the validation pass
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    /// `None` for market entries
    pub entry: Option<Decimal>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// A rendered chart file on disk.
///
/// The file is deleted when this value is dropped.
#[derive(Debug)]
pub struct ChartArtifact {
    path: PathBuf,
    timeframe: TimeFrame,
}

impl ChartArtifact {
    pub fn new(path: PathBuf, timeframe: TimeFrame) -> Self {
        Self { path, timeframe }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timeframe(&self) -> TimeFrame {
        self.timeframe
    }

    pub async fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

impl Drop for ChartArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed chart file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), "Failed to remove chart file: {}", e),
        }
    }
}

/// Error types for chart rendering
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("not enough candles for {timeframe}: got {available}, need {required}")]
    InsufficientData {
        timeframe: TimeFrame,
        available: usize,
        required: usize,
    },

    #[error("candle source failed: {0}")]
    Source(#[from] MarketDataError),

    #[error("chart I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("chart encoding failed: {0}")]
    Encode(String),

    #[error("rendering {timeframe} timed out after {secs}s")]
    Timeout { timeframe: TimeFrame, secs: u64 },
}

/// Renders one chart for a symbol and timeframe
#[async_trait::async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        overlay: Option<&Overlay>,
    ) -> Result<ChartArtifact, RenderError>;
}

/// Helper function to draw a filled rectangle
pub fn draw_filled_rect(
    img: &mut RgbImage,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    color: Rgb<u8>,
) {
    let (img_width, img_height) = img.dimensions();
    for py in y..y.saturating_add(height).min(img_height) {
        for px in x..x.saturating_add(width).min(img_width) {
            img.put_pixel(px, py, color);
        }
    }
}

/// Helper function to draw a vertical line
pub fn draw_vertical_line(img: &mut RgbImage, x: u32, y1: u32, y2: u32, color: Rgb<u8>) {
    let (start, end) = if y1 < y2 { (y1, y2) } else { (y2, y1) };
    let (img_width, img_height) = img.dimensions();
    if x >= img_width || img_height == 0 {
        return;
    }
    for y in start..=end.min(img_height - 1) {
        img.put_pixel(x, y, color);
    }
}

/// Helper function to draw a horizontal line, optionally dashed
pub fn draw_horizontal_line(
    img: &mut RgbImage,
    y: u32,
    x1: u32,
    x2: u32,
    color: Rgb<u8>,
    dash: Option<u32>,
) {
    let (start, end) = if x1 < x2 { (x1, x2) } else { (x2, x1) };
    let (img_width, img_height) = img.dimensions();
    if y >= img_height || img_width == 0 {
        return;
    }
    for x in start..=end.min(img_width - 1) {
        if let Some(dash) = dash.filter(|d| *d > 0) {
            if ((x - start) / dash) % 2 == 1 {
                continue;
            }
        }
        img.put_pixel(x, y, color);
    }
}

/// Straight line between two points (Bresenham)
pub fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x0, mut y0) = from;
    let (x1, y1) = to;
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let (w, h) = (img.width() as i64, img.height() as i64);

    loop {
        if x0 >= 0 && y0 >= 0 && x0 < w && y0 < h {
            img.put_pixel(x0 as u32, y0 as u32, color);
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_helpers_clip_to_image() {
        let mut img = RgbImage::from_pixel(10, 10, colors::BACKGROUND);
        draw_filled_rect(&mut img, 8, 8, 5, 5, colors::RED);
        draw_vertical_line(&mut img, 0, 5, 50, colors::GREEN);
        draw_horizontal_line(&mut img, 20, 0, 9, colors::BLUE, None);

        assert_eq!(*img.get_pixel(9, 9), colors::RED);
        assert_eq!(*img.get_pixel(0, 9), colors::GREEN);
        assert_eq!(*img.get_pixel(5, 5), colors::BACKGROUND);
    }

    #[test]
    fn test_dashed_line_skips_gaps() {
        let mut img = RgbImage::from_pixel(12, 2, colors::BACKGROUND);
        draw_horizontal_line(&mut img, 0, 0, 11, colors::WHITE, Some(3));

        assert_eq!(*img.get_pixel(0, 0), colors::WHITE);
        assert_eq!(*img.get_pixel(3, 0), colors::BACKGROUND);
        assert_eq!(*img.get_pixel(6, 0), colors::WHITE);
    }

    #[test]
    fn test_draw_line_hits_both_ends() {
        let mut img = RgbImage::from_pixel(20, 20, colors::BACKGROUND);
        draw_line(&mut img, (1, 18), (17, 2), colors::ORANGE);
        assert_eq!(*img.get_pixel(1, 18), colors::ORANGE);
        assert_eq!(*img.get_pixel(17, 2), colors::ORANGE);
    }

    #[test]
    fn test_artifact_removes_file_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.png");
        std::fs::write(&path, b"png").unwrap();

        let artifact = ChartArtifact::new(path.clone(), TimeFrame::Hour1);
        assert!(artifact.path().exists());
        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn test_artifact_drop_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = ChartArtifact::new(dir.path().join("never-written.png"), TimeFrame::Day1);
        drop(artifact);
    }
}
