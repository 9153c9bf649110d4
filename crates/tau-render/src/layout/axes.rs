/// Axis with tick generation and data→pixel mapping.
///
/// Histogram axes keep the exact data range; ticks are placed inside it.
#[derive(Debug, Clone)]
pub struct Axis {
    pub min: f64,
    pub max: f64,
    pub log: bool,
    pub label: String,
    pub tick_positions: Vec<f64>,
    pub tick_labels: Vec<String>,
    pub minor_ticks: Vec<f64>,
}

impl Axis {
    /// Linear axis over `[min, max]` with "nice number" ticks inside it.
    pub fn linear(min: f64, max: f64, target_ticks: usize) -> Self {
        let (min, max) = if (max - min).abs() < 1e-15 { (min - 1.0, max + 1.0) } else { (min, max) };
        let step = nice_step((max - min) / (target_ticks.max(2) - 1) as f64);
        let eps = step * 1e-6;
        let mut ticks = Vec::new();
        let mut labels = Vec::new();
        let mut k = (min / step - 1e-6).ceil() as i64;
        while (k as f64) * step <= max + eps {
            let v = k as f64 * step;
            ticks.push(v);
            labels.push(format_tick(v, step));
            k += 1;
        }

        let minor_step = step / 5.0;
        let mut minor = Vec::new();
        let mut m = (min / minor_step - 1e-6).ceil() as i64;
        while (m as f64) * minor_step <= max + eps {
            let v = m as f64 * minor_step;
            if m % 5 != 0 {
                minor.push(v);
            }
            m += 1;
        }

        Self { min, max, log: false, label: String::new(), tick_positions: ticks, tick_labels: labels, minor_ticks: minor }
    }

    /// Logarithmic axis over `[min, max]`; non-positive limits are clamped.
    pub fn log(min: f64, max: f64) -> Self {
        let min = if min > 0.0 { min } else { 1e-3 };
        let max = if max > min { max } else { min * 10.0 };
        let lo = min.log10().floor() as i32;
        let hi = max.log10().ceil() as i32;

        let mut ticks = Vec::new();
        let mut labels = Vec::new();
        let mut minor = Vec::new();
        for exp in lo..=hi {
            let v = 10.0_f64.powi(exp);
            if v >= min * (1.0 - 1e-9) && v <= max * (1.0 + 1e-9) {
                ticks.push(v);
                labels.push(format!("10{}", superscript(exp)));
            }
            for m in 2..=9 {
                let mv = m as f64 * v;
                if mv > min && mv < max {
                    minor.push(mv);
                }
            }
        }

        Self { min, max, log: true, label: String::new(), tick_positions: ticks, tick_labels: labels, minor_ticks: minor }
    }

    /// Categorical axis: one labelled tick per bin centre.
    pub fn bin_labels(edges: &[f64], labels: &[String]) -> Self {
        let min = edges.first().copied().unwrap_or(0.0);
        let max = edges.last().copied().unwrap_or(1.0);
        let centres = edges.windows(2).map(|w| 0.5 * (w[0] + w[1]));
        Self {
            min,
            max,
            log: false,
            label: String::new(),
            tick_positions: centres.collect(),
            tick_labels: labels.to_vec(),
            minor_ticks: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Map a data value to pixel coordinate.
    pub fn data_to_pixel(&self, value: f64, px_min: f64, px_max: f64) -> f64 {
        let frac = if self.log {
            let v = value.max(self.min * 1e-3).ln();
            (v - self.min.ln()) / (self.max.ln() - self.min.ln())
        } else {
            (value - self.min) / (self.max - self.min)
        };
        px_min + frac * (px_max - px_min)
    }

    /// Map a value and clamp it to the pixel range.
    pub fn clamped(&self, value: f64, px_min: f64, px_max: f64) -> f64 {
        let (lo, hi) = if px_min < px_max { (px_min, px_max) } else { (px_max, px_min) };
        self.data_to_pixel(value, px_min, px_max).clamp(lo, hi)
    }
}

fn nice_step(rough: f64) -> f64 {
    let exp = rough.abs().log10().floor();
    let frac = rough / 10.0_f64.powf(exp);
    let nice_frac = if frac <= 1.5 {
        1.0
    } else if frac <= 3.5 {
        2.0
    } else if frac <= 7.5 {
        5.0
    } else {
        10.0
    };
    nice_frac * 10.0_f64.powf(exp)
}

fn format_tick(value: f64, step: f64) -> String {
    let decimals = if step >= 1.0 { 0 } else { (-step.log10().floor()) as usize };
    if decimals == 0 {
        let v = if value.abs() < step * 0.01 { 0.0 } else { value };
        format!("{}", v.round() as i64)
    } else {
        format!("{:.prec$}", value, prec = decimals)
    }
}

fn superscript(n: i32) -> String {
    n.to_string()
        .chars()
        .map(|c| match c {
            '-' => '\u{207B}',
            '0' => '\u{2070}',
            '1' => '\u{00B9}',
            '2' => '\u{00B2}',
            '3' => '\u{00B3}',
            '4' => '\u{2074}',
            '5' => '\u{2075}',
            '6' => '\u{2076}',
            '7' => '\u{2077}',
            '8' => '\u{2078}',
            '9' => '\u{2079}',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_keeps_range() {
        let ax = Axis::linear(0.0, 200.0, 6);
        assert_eq!((ax.min, ax.max), (0.0, 200.0));
        assert_eq!(ax.tick_labels, ["0", "50", "100", "150", "200"]);
        let ax = Axis::linear(0.55, 1.45, 4);
        assert_eq!(ax.tick_labels, ["0.6", "0.8", "1.0", "1.2", "1.4"]);
    }

    #[test]
    fn data_to_pixel_linear() {
        let ax = Axis::linear(0.0, 100.0, 5);
        assert!((ax.data_to_pixel(50.0, 0.0, 500.0) - 250.0).abs() < 1e-9);
        assert_eq!(ax.clamped(1e6, 400.0, 100.0), 100.0);
    }

    #[test]
    fn log_axis() {
        let ax = Axis::log(0.5, 2000.0);
        assert!(ax.log);
        assert_eq!(ax.tick_labels, ["10\u{2070}", "10\u{00B9}", "10\u{00B2}", "10\u{00B3}"]);
        assert!((ax.data_to_pixel(ax.max, 0.0, 1.0) - 1.0).abs() < 1e-12);
        assert!(Axis::log(0.0, -1.0).min > 0.0);
    }

    #[test]
    fn bins() {
        let ax = Axis::bin_labels(&[0.0, 1.0, 2.0], &["pass".into(), "fail".into()]);
        assert_eq!(ax.tick_positions, vec![0.5, 1.5]);
    }

    #[test]
    fn nice_step_values() {
        assert!((nice_step(3.2) - 2.0).abs() < 1e-9);
        assert!((nice_step(0.7) - 0.5).abs() < 1e-9);
        assert!((nice_step(15.0) - 10.0).abs() < 1e-9);
    }
}
