//! Selections: a boolean event filter with display metadata.

use crate::context::Context;
use crate::strings::{join_cuts, join_weights, make_filename};
use crate::variable::{Variable, any_pattern_matches};

/// A named event filter, optionally weighted.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Short name.
    pub name: String,
    /// Display title.
    pub title: String,
    /// File- and directory-safe name.
    pub filename: String,
    /// Boolean cut expression.
    pub selection: String,
    /// Extra weight for events passing the cut.
    pub weight: String,
    /// Only plot variables matching one of these patterns.
    pub only: Vec<String>,
    /// Never plot variables matching one of these patterns.
    pub veto: Vec<String>,
    context: Context<String>,
}

impl Selection {
    /// Selection with `name` as title and a file name derived from it.
    pub fn new(name: impl Into<String>, cut: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            filename: make_filename(&name),
            name,
            selection: cut.into(),
            weight: String::new(),
            only: Vec::new(),
            veto: Vec::new(),
            context: Context::default(),
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the file name.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: impl Into<String>) -> Self {
        self.weight = weight.into();
        self
    }

    /// Set `only` patterns.
    pub fn with_only(mut self, only: Vec<String>) -> Self {
        self.only = only;
        self
    }

    /// Set `veto` patterns.
    pub fn with_veto(mut self, veto: Vec<String>) -> Self {
        self.veto = veto;
        self
    }

    /// Channel-dependent cut overrides.
    pub fn with_context(mut self, context: Context<String>) -> Self {
        self.context = context;
        self
    }

    /// Alias of the cut expression.
    pub fn cut(&self) -> &str {
        &self.selection
    }

    /// Strings a variable's `only`/`veto` patterns are matched against.
    pub fn probes(&self) -> [&str; 3] {
        [&self.selection, &self.name, &self.filename]
    }

    /// Whether this selection allows `var_name` under its own `only`/`veto` lists.
    pub fn accepts(&self, var_name: &str) -> bool {
        if any_pattern_matches(&self.veto, &[var_name]) {
            return false;
        }
        self.only.is_empty() || any_pattern_matches(&self.only, &[var_name])
    }

    /// Whether `var` is plotted for this selection.
    pub fn plotfor(&self, var: &Variable) -> bool {
        plot_allowed(var, self)
    }

    /// AND-combine with other selections. Titles join with `, `, file names with `_`,
    /// weights multiply.
    pub fn combine(&self, others: &[&Selection]) -> Selection {
        let all: Vec<&Selection> = std::iter::once(self).chain(others.iter().copied()).collect();
        let names: Vec<&str> = all.iter().map(|s| s.name.as_str()).filter(|s| !s.is_empty()).collect();
        let titles: Vec<&str> = all.iter().map(|s| s.title.as_str()).filter(|s| !s.is_empty()).collect();
        let files: Vec<&str> =
            all.iter().map(|s| s.filename.as_str()).filter(|s| !s.is_empty()).collect();
        let cuts: Vec<&str> = all.iter().map(|s| s.selection.as_str()).collect();
        let weights: Vec<&str> = all.iter().map(|s| s.weight.as_str()).collect();
        Selection {
            name: names.join(", "),
            title: titles.join(", "),
            filename: files.join("_"),
            selection: join_cuts(&cuts),
            weight: join_weights(&weights),
            only: self.only.clone(),
            veto: self.veto.clone(),
            context: self.context.clone(),
        }
    }

    /// Copy with `tag` added to name and file name; the cut is unchanged.
    pub fn shift(&self, tag: &str) -> Selection {
        let tag = if !tag.is_empty() && !tag.starts_with('_') { format!("_{tag}") } else { tag.to_string() };
        let mut s = self.clone();
        s.name = format!("{}{}", self.name, tag);
        s.filename = format!("{}{}", self.filename, tag);
        s
    }

    /// Replace the cut by the override matching `probes` (e.g. the channel), if any.
    pub fn changecontext(&mut self, probes: &[&str]) {
        if let Some(cut) = self.context.get_any(probes) {
            self.selection = cut.clone();
        }
    }

    /// Cut multiplied by the weight, as a draw expression.
    pub fn drawcmd(&self) -> String {
        match (self.selection.is_empty(), self.weight.is_empty()) {
            (_, true) => self.selection.clone(),
            (true, false) => self.weight.clone(),
            (false, false) => format!("({})*{}", self.selection, self.weight),
        }
    }
}

/// A variable is plotted for a selection iff both sides allow it.
pub fn plot_allowed(var: &Variable, sel: &Selection) -> bool {
    var.accepts(&sel.probes()) && sel.accepts(&var.name) && sel.accepts(var.base_name())
}

impl Variable {
    /// Whether this variable is plotted for `sel`.
    pub fn plotfor(&self, sel: &Selection) -> bool {
        plot_allowed(self, sel)
    }
}
