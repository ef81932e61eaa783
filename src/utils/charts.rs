//! SVG line charts for training curves.
//!
//! A [`Canvas`] owns the output directory and chart size; each plot is an
//! explicit [`Figure`] built from it, so no figure state is shared between
//! callers.

use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::error::Result;

const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;

const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

/// Series colours, assigned in insertion order
pub const PALETTE: [&str; 4] = ["#3498db", "#e74c3c", "#2ecc71", "#9b59b6"];

/// A named sequence of per-epoch values
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub values: Vec<f64>,
    pub color: String,
}

/// Output directory and chart dimensions shared by a set of figures
#[derive(Debug, Clone)]
pub struct Canvas {
    output_dir: PathBuf,
    width: f64,
    height: f64,
}

impl Canvas {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            width: 800.0,
            height: 500.0,
        }
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Start a new, empty figure on this canvas
    pub fn figure(&self, title: &str) -> Figure {
        Figure {
            title: title.to_string(),
            x_label: "Epochs".to_string(),
            y_label: "Percentage".to_string(),
            series: Vec::new(),
            width: self.width,
            height: self.height,
        }
    }

    /// Render `figure` to `<output_dir>/<name>.svg`
    pub fn save(&self, figure: &Figure, name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!("{}.svg", name));
        fs::write(&path, figure.render())?;
        tracing::debug!("Wrote chart {:?}", path);
        Ok(path)
    }
}

/// A single line chart
#[derive(Debug, Clone)]
pub struct Figure {
    title: String,
    x_label: String,
    y_label: String,
    series: Vec<DataSeries>,
    width: f64,
    height: f64,
}

impl Figure {
    pub fn x_label(mut self, label: &str) -> Self {
        self.x_label = label.to_string();
        self
    }

    pub fn y_label(mut self, label: &str) -> Self {
        self.y_label = label.to_string();
        self
    }

    /// Add a line; colour comes from [`PALETTE`]
    pub fn line(mut self, name: &str, values: &[f64]) -> Self {
        let color = PALETTE[self.series.len() % PALETTE.len()].to_string();
        self.series.push(DataSeries {
            name: name.to_string(),
            values: values.to_vec(),
            color,
        });
        self
    }

    pub fn series(&self) -> &[DataSeries] {
        &self.series
    }

    /// Render the figure as an SVG document
    pub fn render(&self) -> String {
        let plot_width = self.width - MARGIN_LEFT - MARGIN_RIGHT;
        let plot_height = self.height - MARGIN_TOP - MARGIN_BOTTOM;

        let (x_max, y_min, y_max) = self.ranges();
        let x_span = if x_max > 0.0 { x_max } else { 1.0 };
        let y_span = if y_max > y_min { y_max - y_min } else { 1.0 };

        let to_x = |i: usize| MARGIN_LEFT + (i as f64 / x_span) * plot_width;
        let to_y = |v: f64| MARGIN_TOP + plot_height - ((v - y_min) / y_span) * plot_height;

        let mut svg = String::new();

        svg.push_str(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"#,
            w = self.width,
            h = self.height
        ));
        svg.push_str(&format!(
            r#"<rect width="{}" height="{}" fill="white"/>"#,
            self.width, self.height
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
            self.width / 2.0,
            COLOR_TEXT,
            escape_xml(&self.title)
        ));

        // Grid lines and y ticks
        for i in 0..=5 {
            let value = y_min + (i as f64 / 5.0) * y_span;
            let y = to_y(value);
            svg.push_str(&format!(
                r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
                MARGIN_LEFT,
                y,
                MARGIN_LEFT + plot_width,
                y,
                COLOR_GRID
            ));
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{:.3}</text>"#,
                MARGIN_LEFT - 10.0,
                y + 4.0,
                COLOR_TEXT,
                value
            ));
        }

        // Axes
        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
            MARGIN_LEFT,
            MARGIN_TOP + plot_height,
            MARGIN_LEFT + plot_width,
            MARGIN_TOP + plot_height,
            COLOR_AXIS
        ));
        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
            MARGIN_LEFT,
            MARGIN_TOP,
            MARGIN_LEFT,
            MARGIN_TOP + plot_height,
            COLOR_AXIS
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
            MARGIN_LEFT + plot_width / 2.0,
            self.height - 20.0,
            COLOR_TEXT,
            escape_xml(&self.x_label)
        ));
        svg.push_str(&format!(
            r#"<text x="20" y="{y}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {y})">{}</text>"#,
            COLOR_TEXT,
            escape_xml(&self.y_label),
            y = self.height / 2.0
        ));

        for series in &self.series {
            if series.values.is_empty() {
                continue;
            }

            // Non-finite values (a diverged loss) leave a gap in the line
            let mut commands = Vec::with_capacity(series.values.len());
            let mut pen_down = false;
            for (i, v) in series.values.iter().enumerate() {
                if !v.is_finite() {
                    pen_down = false;
                    continue;
                }
                let cmd = if pen_down { "L" } else { "M" };
                commands.push(format!("{} {} {}", cmd, to_x(i), to_y(*v)));
                pen_down = true;
            }
            if commands.is_empty() {
                continue;
            }

            svg.push_str(&format!(
                r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"/>"#,
                commands.join(" "),
                series.color
            ));

            let finite = series.values.iter().enumerate().filter(|(_, v)| v.is_finite());
            for (i, v) in finite {
                svg.push_str(&format!(
                    r#"<circle cx="{}" cy="{}" r="4" fill="{}" stroke="white" stroke-width="2"/>"#,
                    to_x(i),
                    to_y(*v),
                    series.color
                ));
            }
        }

        // X ticks, one per epoch of the longest series
        let longest = self.series.iter().map(|s| s.values.len()).max().unwrap_or(0);
        for i in 0..longest {
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{}</text>"#,
                to_x(i),
                MARGIN_TOP + plot_height + 20.0,
                COLOR_TEXT,
                i
            ));
        }

        // Legend only when there is something to tell apart
        if self.series.len() > 1 {
            let mut legend_y = MARGIN_TOP + 10.0;
            for series in &self.series {
                svg.push_str(&format!(
                    r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
                    self.width - MARGIN_RIGHT - 150.0,
                    legend_y,
                    series.color
                ));
                svg.push_str(&format!(
                    r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
                    self.width - MARGIN_RIGHT - 130.0,
                    legend_y + 12.0,
                    COLOR_TEXT,
                    escape_xml(&series.name)
                ));
                legend_y += 25.0;
            }
        }

        svg.push_str("</svg>");
        svg
    }

    /// (last x index, y min, y max) across all series
    fn ranges(&self) -> (f64, f64, f64) {
        let mut y_min = f64::INFINITY;
        let mut y_max = f64::NEG_INFINITY;
        let mut longest = 0usize;

        for s in &self.series {
            longest = longest.max(s.values.len());
            for v in s.values.iter().filter(|v| v.is_finite()) {
                y_min = y_min.min(*v);
                y_max = y_max.max(*v);
            }
        }

        if !y_min.is_finite() {
            return (0.0, 0.0, 1.0);
        }

        (longest.saturating_sub(1) as f64, y_min.min(0.0), y_max)
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_line_chart_written() {
        let dir = TempDir::new().unwrap();
        let canvas = Canvas::new(dir.path());
        let figure = canvas
            .figure("Train loss")
            .line("loss", &[0.9, 0.6, 0.4]);

        let path = canvas.save(&figure, "Train_loss").unwrap();
        assert!(path.exists());
        let svg = std::fs::read_to_string(path).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Train loss"));
    }

    #[test]
    fn test_single_point_series_renders_finite_coordinates() {
        let canvas = Canvas::new(".");
        let svg = canvas.figure("one epoch").line("loss", &[0.5]).render();
        assert!(!svg.contains("NaN"));
        assert!(!svg.contains("inf"));
    }

    #[test]
    fn test_non_finite_values_leave_a_gap() {
        let canvas = Canvas::new(".");
        let svg = canvas
            .figure("diverged")
            .line("loss", &[0.8, f64::NAN, 0.4, f64::INFINITY])
            .render();
        assert!(!svg.contains("NaN"));
        assert!(!svg.contains("inf"));
        assert_eq!(svg.matches("<circle").count(), 2);
        assert_eq!(svg.matches(" M ").count() + svg.matches("\"M ").count(), 2);
    }

    #[test]
    fn test_legend_names_escaped() {
        let canvas = Canvas::new(".");
        let svg = canvas
            .figure("Stats")
            .line("a<b", &[1.0, 2.0])
            .line("c", &[2.0, 1.0])
            .render();
        assert!(svg.contains("a&lt;b"));
    }

    #[test]
    fn test_figures_are_independent() {
        let canvas = Canvas::new(".");
        let first = canvas.figure("first").line("a", &[1.0]);
        let second = canvas.figure("second");
        assert_eq!(first.series().len(), 1);
        assert!(second.series().is_empty());
    }
}
