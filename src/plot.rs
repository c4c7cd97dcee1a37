use crate::waveform::CalibratedSignal;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::*;
use std::io::Cursor;

#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    #[error("Signal has no samples to plot")]
    EmptySignal,

    #[error("Failed to render plot: {0}")]
    Render(String),
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for PlotError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        Self::Render(format!("{value:?}"))
    }
}

impl From<image::ImageError> for PlotError {
    fn from(value: image::ImageError) -> Self {
        Self::Render(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub font: &'static str,
    pub x_label: &'static str,
    pub y_label: &'static str,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 600,
            font: "serif",
            x_label: "Time (s)",
            y_label: "Amplitude",
        }
    }
}

/// Render the signal in black with optional red event markers, as PNG bytes.
///
/// The time axis spans `[0, max(t)]` in scientific notation; the amplitude
/// axis adds half a unit of headroom on both sides.
pub fn render_signal_png(
    signal: &CalibratedSignal,
    events: Option<&[usize]>,
    title: &str,
    style: &PlotStyle,
) -> Result<Vec<u8>, PlotError> {
    let (y_min, y_max) = signal.amplitude_range().ok_or(PlotError::EmptySignal)?;
    let x_max = match signal.duration() {
        d if d > 0.0 => d,
        _ => 1.0,
    };

    let mut buffer = vec![0u8; style.width as usize * style.height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .margin(20)
            .caption(title, (style.font, 24))
            .set_label_area_size(LabelAreaPosition::Left, 70)
            .set_label_area_size(LabelAreaPosition::Bottom, 50)
            .build_cartesian_2d(0f64..x_max, (y_min - 0.5)..(y_max + 0.5))?;

        chart
            .configure_mesh()
            .x_desc(style.x_label)
            .y_desc(style.y_label)
            .axis_desc_style((style.font, 18))
            .label_style((style.font, 14))
            .x_label_formatter(&|x: &f64| format!("{x:.1e}"))
            .bold_line_style(&BLACK.mix(0.2))
            .light_line_style(&BLACK.mix(0.05))
            .draw()?;

        chart.draw_series(LineSeries::new(
            signal.time.iter().copied().zip(signal.signal.iter().copied()),
            BLACK.stroke_width(2),
        ))?;

        if let Some(events) = events {
            let markers = events.iter().filter_map(|&i| {
                Some((*signal.time.get(i)?, *signal.signal.get(i)?))
            });
            chart.draw_series(markers.map(|point| Circle::new(point, 6, RED.filled())))?;
        }

        root.present()?;
    }
    encode_png(buffer, style.width, style.height)
}

fn encode_png(buffer: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>, PlotError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer)
        .ok_or_else(|| PlotError::Render("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
