//! Scatter plot of normalized relative fitness along one chromosome.
//!
//! One image per normalized result file. A failure in here is reported as a
//! warning by the caller and never fails the pipeline.

use anyhow::Result;
use plotters::prelude::*;
use std::path::Path;

const WIDTH: u32 = 1600;
const HEIGHT: u32 = 900;
const POINT_SIZE: i32 = 4;
const POINT_OPACITY: f64 = 0.8;

const COLOR_STEEL_BLUE: RGBColor = RGBColor(46, 134, 171); // #2E86AB
const COLOR_GRID: RGBColor = RGBColor(200, 200, 200);

/// Draw `(position, normalized weight)` points to a PNG at `path`.
pub fn scatter_plot(points: &[(f64, f64)], path: &Path) -> Result<()> {
    if points.is_empty() {
        anyhow::bail!("No data to plot");
    }

    let x_min = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let x_max = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let x_margin = (x_max - x_min).max(1.0) * 0.02;

    let root = BitMapBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Normalized Data Plot", ("sans-serif", 24).into_font())
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d((x_min - x_margin)..(x_max + x_margin), 0.0..1.0f64)?;

    chart
        .configure_mesh()
        .x_desc("Position in Chr")
        .y_desc("Relative fitness")
        .x_label_style(("sans-serif", 12))
        .y_label_style(("sans-serif", 12))
        .light_line_style(COLOR_GRID.mix(0.3))
        .draw()?;

    chart.draw_series(points.iter().map(|&(x, y)| {
        Circle::new((x, y), POINT_SIZE, COLOR_STEEL_BLUE.mix(POINT_OPACITY).filled())
    }))?;

    root.present()?;
    Ok(())
}
