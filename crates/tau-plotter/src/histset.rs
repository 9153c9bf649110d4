//! Concrete histogram bundles per (selection, variable).

use serde::{Deserialize, Serialize};
use tau_core::{Graph, Histogram, Histogram2D};

use crate::Result;

/// Observed, expected and signal histograms of one (selection, variable) pair.
///
/// `exp` is in stack draw order, top to bottom.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistSet {
    /// Selection key.
    pub selection: String,
    /// Variable key.
    pub variable: String,
    /// Observed data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Histogram>,
    /// Observed data as a graph with asymmetric Poisson errors, when dividing by bin width.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_graph: Option<Graph>,
    /// Expected processes.
    #[serde(default)]
    pub exp: Vec<Histogram>,
    /// Signal overlays.
    #[serde(default)]
    pub sig: Vec<Histogram>,
    /// Combined stat+syst band of the expected stack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errband: Option<Graph>,
}

impl HistSet {
    /// Empty set.
    pub fn new(selection: impl Into<String>, variable: impl Into<String>) -> Self {
        Self { selection: selection.into(), variable: variable.into(), ..Self::default() }
    }

    /// Insert an expected histogram at `index` (appended when `None` or past the end).
    pub fn insert_exp(&mut self, index: Option<usize>, hist: Histogram) {
        match index {
            Some(i) if i < self.exp.len() => self.exp.insert(i, hist),
            _ => self.exp.push(hist),
        }
    }

    /// Sum of the expected histograms.
    pub fn total_exp(&self) -> Result<Option<Histogram>> {
        let mut it = self.exp.iter();
        let Some(first) = it.next() else {
            return Ok(None);
        };
        let mut total = first.clone().renamed(format!("{}_{}_total", self.variable, self.selection));
        total.title = "Total expected".into();
        for h in it {
            total.add(h, 1.0)?;
        }
        Ok(Some(total))
    }

    /// Every histogram: data, expected, then signal.
    pub fn all(&self) -> impl Iterator<Item = &Histogram> {
        self.data.iter().chain(&self.exp).chain(&self.sig)
    }

    /// Divide every histogram by its bin widths. Observed data is kept as a
    /// graph with asymmetric errors first when it uses Poisson errors.
    pub fn divide_by_bin_width(&mut self) {
        if let Some(d) = &mut self.data {
            if d.error_mode == tau_core::ErrorMode::Poisson {
                self.data_graph = Some(Graph::from_poisson(d, true));
            }
            d.divide_by_bin_width();
        }
        self.exp.iter_mut().chain(self.sig.iter_mut()).for_each(Histogram::divide_by_bin_width);
    }

    /// Yield table (name, title, integral, error) as text; also logged at info level.
    pub fn display(&self) -> String {
        let mut lines = vec![format!("{:>12} {:>10}   {:<24} {}", "yield", "error", "name", "title")];
        let row = |h: &Histogram| {
            let err: f64 = (0..h.n_bins()).map(|i| h.sumw2[i]).sum::<f64>().sqrt();
            format!("{:>12.2} {:>10.2}   {:<24} {}", h.integral(), err, h.name, h.title)
        };
        if let Some(d) = &self.data {
            lines.push(row(d));
        }
        lines.extend(self.exp.iter().map(row));
        if let Ok(Some(t)) = self.total_exp() {
            lines.push(row(&t));
        }
        lines.extend(self.sig.iter().map(row));
        let text = lines.join("\n");
        log::info!("{} / {}:\n{text}", self.selection, self.variable);
        text
    }

    /// Drop all histograms.
    pub fn close(&mut self) {
        self.data = None;
        self.data_graph = None;
        self.exp.clear();
        self.sig.clear();
        self.errband = None;
    }
}

/// 2-D counterpart of [`HistSet`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistSet2D {
    /// Observed data.
    pub data: Option<Histogram2D>,
    /// Expected processes.
    pub exp: Vec<Histogram2D>,
    /// Signal processes.
    pub sig: Vec<Histogram2D>,
}

/// Values keyed by selection and variable, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistDict<T> {
    entries: Vec<(String, Vec<(String, T)>)>,
}

impl<T> Default for HistDict<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> HistDict<T> {
    /// Empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the value of `(selection, variable)`.
    pub fn insert(&mut self, selection: &str, variable: &str, value: T) {
        let i = match self.entries.iter().position(|(s, _)| s == selection) {
            Some(i) => i,
            None => {
                self.entries.push((selection.to_string(), Vec::new()));
                self.entries.len() - 1
            }
        };
        let vars = &mut self.entries[i].1;
        match vars.iter_mut().find(|(v, _)| v == variable) {
            Some(slot) => slot.1 = value,
            None => vars.push((variable.to_string(), value)),
        }
    }

    /// Value of `(selection, variable)`.
    pub fn get(&self, selection: &str, variable: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(s, _)| s == selection)
            .and_then(|(_, vars)| vars.iter().find(|(v, _)| v == variable))
            .map(|(_, t)| t)
    }

    /// Mutable value of `(selection, variable)`.
    pub fn get_mut(&mut self, selection: &str, variable: &str) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|(s, _)| s == selection)
            .and_then(|(_, vars)| vars.iter_mut().find(|(v, _)| v == variable))
            .map(|(_, t)| t)
    }

    /// Selection keys.
    pub fn selections(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(s, _)| s.as_str())
    }

    /// `(selection, variable, value)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &T)> {
        self.entries
            .iter()
            .flat_map(|(s, vars)| vars.iter().map(move |(v, t)| (s.as_str(), v.as_str(), t)))
    }

    /// Mutable values in insertion order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.iter_mut().flat_map(|(_, vars)| vars.iter_mut().map(|(_, t)| t))
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.len()).sum()
    }

    /// `true` if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistDict<HistSet> {
    /// Drop every histogram.
    pub fn close(&mut self) {
        self.values_mut().for_each(HistSet::close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(name: &str, v: [f64; 3]) -> Histogram {
        let mut h = Histogram::new(name, vec![0.0, 1.0, 3.0, 7.0]).unwrap();
        h.bin_content = v.to_vec();
        h.sumw2 = v.to_vec();
        h
    }

    #[test]
    fn total_and_insert() {
        let mut set = HistSet::new("sr", "m_vis");
        set.exp = vec![h("ZTT", [1.0, 2.0, 3.0]), h("TT", [1.0, 1.0, 1.0])];
        set.insert_exp(Some(1), h("QCD", [0.5, 0.5, 0.5]));
        set.insert_exp(None, h("W", [0.0, 0.0, 1.0]));
        let names: Vec<&str> = set.exp.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["ZTT", "QCD", "TT", "W"]);
        assert_eq!(set.total_exp().unwrap().unwrap().bin_content, vec![2.5, 3.5, 5.5]);
        assert!(set.display().contains("QCD"));
    }

    #[test]
    fn per_width_keeps_poisson_graph() {
        let mut set = HistSet::new("sr", "m_vis");
        let mut d = h("data", [2.0, 2.0, 2.0]);
        d.error_mode = tau_core::ErrorMode::Poisson;
        set.data = Some(d);
        set.exp = vec![h("ZTT", [2.0, 2.0, 2.0])];
        set.divide_by_bin_width();
        assert_eq!(set.exp[0].bin_content, vec![2.0, 1.0, 0.5]);
        let g = set.data_graph.as_ref().unwrap();
        assert_eq!(g.points[2].y, 0.5);
        assert!(g.points[2].ey_hi > g.points[2].ey_lo);
        set.close();
        assert_eq!(set.all().count(), 0);
    }

    #[test]
    fn dict_order_and_replace() {
        let mut d: HistDict<i32> = HistDict::new();
        d.insert("sr", "m_vis", 1);
        d.insert("cr", "m_vis", 2);
        d.insert("sr", "pt_1", 3);
        d.insert("sr", "m_vis", 4);
        let all: Vec<_> = d.iter().collect();
        assert_eq!(all, vec![("sr", "m_vis", &4), ("sr", "pt_1", &3), ("cr", "m_vis", &2)]);
        assert_eq!(d.len(), 3);
        *d.get_mut("cr", "m_vis").unwrap() += 1;
        assert_eq!(d.get("cr", "m_vis"), Some(&3));
    }
}
