//! PNG charts over persisted summary records.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::report::{RunStatistics, SummaryRecord};

const PURPLE: RGBColor = RGBColor(128, 0, 128);

/// One labelled run for the comparison chart.
pub struct RunSeries {
    pub label: String,
    pub records: Vec<SummaryRecord>,
}

/// Sibling of a results CSV: `foo.csv` becomes `foo_plots.png`.
pub fn plot_path_for(csv_path: &Path) -> PathBuf {
    let stem = csv_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("benchmark");
    csv_path.with_file_name(format!("{}_plots.png", stem))
}

/// (concurrency, metric) pairs, sorted by concurrency.
pub fn metric_points(
    records: &[SummaryRecord],
    metric: impl Fn(&SummaryRecord) -> f64,
) -> Vec<(f64, f64)> {
    let mut points: Vec<(f64, f64)> = records
        .iter()
        .map(|record| (record.concurrency as f64, metric(record)))
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    points
}

fn axis_max(values: impl Iterator<Item = f64>) -> f64 {
    let max = values.fold(0.0_f64, f64::max);
    if max > 0.0 {
        max * 1.1
    } else {
        1.0
    }
}

/// Four panels against concurrency: tokens/s, success rate, requests/s, total time.
pub fn plot_run(records: &[SummaryRecord], title: &str, path: &Path) -> Result<()> {
    if records.is_empty() {
        return Err(anyhow!("no records to plot for {}", title));
    }

    let root = BitMapBackend::new(path, (1200, 800)).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled(title, ("sans-serif", 28))?;
    let panels = root.split_evenly((2, 2));

    let throughput = metric_points(records, |r| r.tokens_per_second);
    let success = metric_points(records, |r| r.success_rate_percent);
    let request_rate = metric_points(records, |r| r.requests_per_second);
    let total_time = metric_points(records, |r| r.total_time);

    let throughput_max = axis_max(throughput.iter().map(|p| p.1));
    let request_rate_max = axis_max(request_rate.iter().map(|p| p.1));
    let total_time_max = axis_max(total_time.iter().map(|p| p.1));

    draw_line_panel(
        &panels[0],
        "Throughput vs Concurrency",
        "Tokens per Second",
        &throughput,
        throughput_max,
        BLUE,
    )?;
    draw_line_panel(
        &panels[1],
        "Success Rate vs Concurrency",
        "Success Rate (%)",
        &success,
        105.0,
        GREEN,
    )?;
    draw_line_panel(
        &panels[2],
        "Request Rate vs Concurrency",
        "Requests per Second",
        &request_rate,
        request_rate_max,
        RED,
    )?;
    draw_line_panel(
        &panels[3],
        "Total Time vs Concurrency",
        "Total Time (seconds)",
        &total_time,
        total_time_max,
        PURPLE,
    )?;

    root.present()?;
    Ok(())
}

fn draw_line_panel(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    caption: &str,
    y_desc: &str,
    points: &[(f64, f64)],
    y_max: f64,
    color: RGBColor,
) -> Result<()> {
    let x_max = axis_max(points.iter().map(|p| p.0));

    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 20))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..x_max, 0f64..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Concurrent Users")
        .y_desc(y_desc)
        .x_label_formatter(&|x| format!("{:.0}", x))
        .y_label_formatter(&|y| format!("{:.1}", y))
        .draw()?;

    chart.draw_series(LineSeries::new(points.to_vec(), color.stroke_width(3)))?;
    chart.draw_series(
        points
            .iter()
            .map(|point| Circle::new(*point, 4, color.filled())),
    )?;
    Ok(())
}

/// Tokens/s against concurrency, one line per run.
pub fn plot_comparison(series: &[RunSeries], path: &Path) -> Result<()> {
    if series.len() < 2 {
        return Err(anyhow!("need at least 2 runs to compare, got {}", series.len()));
    }

    let lines: Vec<(String, Vec<(f64, f64)>)> = series
        .iter()
        .map(|run| {
            (
                run.label.clone(),
                metric_points(&run.records, |r| r.tokens_per_second),
            )
        })
        .collect();
    let all_points: Vec<&(f64, f64)> = lines.iter().flat_map(|(_, points)| points).collect();
    let x_max = axis_max(all_points.iter().map(|p| p.0));
    let y_max = axis_max(all_points.iter().map(|p| p.1));

    let root = BitMapBackend::new(path, (1000, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Throughput Comparison Across Benchmark Runs", ("sans-serif", 28))
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(0f64..x_max, 0f64..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Concurrent Users")
        .y_desc("Tokens per Second")
        .x_label_formatter(&|x| format!("{:.0}", x))
        .y_label_formatter(&|y| format!("{:.1}", y))
        .draw()?;

    for (idx, (label, points)) in lines.into_iter().enumerate() {
        let style = Palette99::pick(idx).stroke_width(3);
        chart
            .draw_series(LineSeries::new(points, style))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], style));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Bar panels per provider: peak throughput, average success rate, peak request
/// rate and the concurrency at which throughput peaked.
pub fn plot_provider_comparison(providers: &[(String, RunStatistics)], path: &Path) -> Result<()> {
    if providers.is_empty() {
        return Err(anyhow!("no providers to compare"));
    }

    let labels: Vec<String> = providers.iter().map(|(name, _)| name.clone()).collect();
    let root = BitMapBackend::new(path, (1200, 800)).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled("Provider Performance Comparison", ("sans-serif", 28))?;
    let panels = root.split_evenly((2, 2));

    let peak_throughput: Vec<f64> = providers
        .iter()
        .map(|(_, s)| s.peak_tokens_per_second)
        .collect();
    let success: Vec<f64> = providers
        .iter()
        .map(|(_, s)| s.average_success_rate)
        .collect();
    let request_rate: Vec<f64> = providers
        .iter()
        .map(|(_, s)| s.peak_requests_per_second)
        .collect();
    let optimal: Vec<f64> = providers
        .iter()
        .map(|(_, s)| s.peak_throughput_concurrency as f64)
        .collect();

    draw_bar_panel(
        &panels[0],
        "Peak Throughput by Provider",
        "Tokens per Second",
        &labels,
        &peak_throughput,
        BLUE,
    )?;
    draw_bar_panel(
        &panels[1],
        "Average Success Rate by Provider",
        "Success Rate (%)",
        &labels,
        &success,
        GREEN,
    )?;
    draw_bar_panel(
        &panels[2],
        "Peak Request Rate by Provider",
        "Requests per Second",
        &labels,
        &request_rate,
        RED,
    )?;
    draw_bar_panel(
        &panels[3],
        "Optimal Concurrency by Provider",
        "Concurrent Users",
        &labels,
        &optimal,
        PURPLE,
    )?;

    root.present()?;
    Ok(())
}

fn draw_bar_panel(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    caption: &str,
    y_desc: &str,
    labels: &[String],
    values: &[f64],
    color: RGBColor,
) -> Result<()> {
    let y_max = axis_max(values.iter().copied());

    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 20))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d((0usize..labels.len()).into_segmented(), 0f64..y_max)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(labels.len())
        .x_label_formatter(&|value| match value {
            SegmentValue::CenterOf(idx) | SegmentValue::Exact(idx) => {
                labels.get(*idx).cloned().unwrap_or_default()
            }
            SegmentValue::Last => String::new(),
        })
        .y_desc(y_desc)
        .draw()?;

    chart.draw_series(
        Histogram::vertical(&chart)
            .style(color.filled())
            .margin(10)
            .data(values.iter().copied().enumerate()),
    )?;
    Ok(())
}
