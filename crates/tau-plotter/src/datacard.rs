//! Datacard inputs: shape files of nominal and varied histograms.
//!
//! A shape file holds one directory per selection (named by the selection's
//! file name) with the literal cut string and one histogram per process:
//! `data_obs` for observed data, the process name for nominal expected and
//! signal shapes, and `<process>_<syst>Up` / `Down` for variations.
//! [`createinputs`] fills and writes them; [`plotinputs`] reads them back.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tau_core::Histogram;

use crate::era::AnalysisContext;
use crate::errorband::{SystTriplet, geterrorband};
use crate::histset::HistSet;
use crate::sampleset::{GetHistsOptions, SampleSet};
use crate::selection::Selection;
use crate::stack::{ComparisonArtifact, Stack};
use crate::strings::{glob_match, make_hist_name};
use crate::variable::Variable;
use crate::{Error, Result};

/// Schema of [`ShapeFile`].
pub const SHAPES_SCHEMA: &str = "taufw_shapes_v1";
/// Process name of observed data.
pub const DATA_OBS: &str = "data_obs";

/// Role of a process in a shape directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    /// Observed data.
    Data,
    /// Expected background.
    Exp,
    /// Signal.
    Sig,
}

/// One histogram of a shape directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeEntry {
    /// Process name with the systematic tag, e.g. `ZTT_shape_tesUp`.
    pub process: String,
    /// Data, expected or signal.
    pub role: ProcessRole,
    /// The histogram.
    pub hist: Histogram,
}

/// One selection's shapes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapeDirectory {
    /// Literal selection string.
    pub selection: String,
    /// Histograms in writing order.
    pub histograms: Vec<ShapeEntry>,
}

impl ShapeDirectory {
    /// Histogram of `process`.
    pub fn get(&self, process: &str) -> Option<&Histogram> {
        self.histograms.iter().find(|e| e.process == process).map(|e| &e.hist)
    }

    /// Insert or replace the histogram of `process`.
    pub fn insert(&mut self, process: &str, role: ProcessRole, hist: Histogram) {
        match self.histograms.iter_mut().find(|e| e.process == process) {
            Some(e) => {
                e.role = role;
                e.hist = hist;
            }
            None => self.histograms.push(ShapeEntry { process: process.to_string(), role, hist }),
        }
    }
}

/// Era, channel and luminosity of a shape file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeStyle {
    /// Era tag.
    pub era: String,
    /// Channel tag.
    pub channel: String,
    /// Integrated luminosity in fb⁻¹.
    pub lumi: f64,
    /// Centre-of-mass energy in TeV.
    pub cme: f64,
}

/// A shape file: directories keyed by selection file name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeFile {
    /// [`SHAPES_SCHEMA`].
    pub schema_version: String,
    /// Provenance.
    pub style: ShapeStyle,
    /// Directories in writing order.
    pub directories: Vec<(String, ShapeDirectory)>,
}

impl ShapeFile {
    /// Empty file for a context.
    pub fn new(ctx: &AnalysisContext) -> Self {
        Self {
            schema_version: SHAPES_SCHEMA.into(),
            style: ShapeStyle {
                era: ctx.era.clone(),
                channel: ctx.channel.clone(),
                lumi: ctx.lumi,
                cme: ctx.cme,
            },
            directories: Vec::new(),
        }
    }

    /// Read a shape file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::FileUnavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let file: ShapeFile = serde_json::from_slice(&bytes)?;
        if file.schema_version != SHAPES_SCHEMA {
            return Err(Error::Config(format!(
                "{}: unsupported schema '{}'",
                path.display(),
                file.schema_version
            )));
        }
        Ok(file)
    }

    /// Write through a temporary sibling, then rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Directory of a selection.
    pub fn directory(&self, name: &str) -> Option<&ShapeDirectory> {
        self.directories.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// Directory of a selection, created if missing.
    pub fn directory_mut(&mut self, name: &str) -> &mut ShapeDirectory {
        let i = match self.directories.iter().position(|(n, _)| n == name) {
            Some(i) => i,
            None => {
                self.directories.push((name.to_string(), ShapeDirectory::default()));
                self.directories.len() - 1
            }
        };
        &mut self.directories[i].1
    }
}

/// Options of [`createinputs`].
#[derive(Debug, Clone)]
pub struct CreateInputsOptions {
    /// Systematic tag appended to process names, e.g. `_shape_tesUp`. Empty for nominal.
    pub tag: String,
    /// Estimator, e.g. `QCD_ABCD`.
    pub method: Option<String>,
    /// Only write processes matching these patterns (all when empty).
    pub filter: Vec<String>,
    /// Start a new file instead of updating an existing one.
    pub recreate: bool,
    /// Set negative bins to zero.
    pub clamp_negative: bool,
    /// Write `p` between digits as `.` (`m125p5` becomes `m125.5`).
    pub replace_p: bool,
}

impl Default for CreateInputsOptions {
    fn default() -> Self {
        Self {
            tag: String::new(),
            method: None,
            filter: Vec::new(),
            recreate: false,
            clamp_negative: true,
            replace_p: false,
        }
    }
}

/// Output path of a variable: `$OBS` is the variable's file name; `$ERA`,
/// `$CHANNEL` and `$TAG` come from the context.
pub fn shapes_path(template: &str, var: &Variable, ctx: &AnalysisContext) -> PathBuf {
    PathBuf::from(ctx.expand(&template.replace("$OBS", &var.filename)))
}

fn process_name(hist: &Histogram, prefix: &str, replace_p: bool) -> String {
    let name = hist.name.strip_prefix(prefix).unwrap_or(&hist.name);
    if !replace_p {
        return name.to_string();
    }
    static FLOAT_P: OnceLock<Regex> = OnceLock::new();
    let re = FLOAT_P.get_or_init(|| Regex::new(r"(\d)p(\d)").expect("valid regex"));
    re.replace_all(name, "$1.$2").into_owned()
}

fn clamp(hist: &mut Histogram) {
    let mut n = 0;
    for i in 0..hist.n_bins() {
        if hist.bin_content[i] < 0.0 {
            let err = hist.bin_error(i);
            hist.set_bin(i, 0.0, err);
            n += 1;
        }
    }
    if n > 0 {
        log::debug!("{}: {n} negative bin(s) set to zero", hist.name);
    }
}

/// Estimator of a pass: a filtered pass only re-estimates QCD when the
/// filter names it, since the estimate subtracts every expected sample.
fn pass_method(opts: &CreateInputsOptions) -> Option<String> {
    let method = opts.method.clone()?;
    if opts.filter.is_empty() || opts.filter.iter().any(|p| glob_match(p, "QCD")) {
        Some(method)
    } else {
        log::debug!("createinputs{}: {method} skipped, filter {:?} excludes QCD", opts.tag, opts.filter);
        None
    }
}

/// Shape files filled in memory over one or more passes and written together
/// by [`ShapeInputs::save`].
#[derive(Debug, Clone, Default)]
pub struct ShapeInputs {
    files: Vec<(PathBuf, ShapeFile)>,
}

impl ShapeInputs {
    /// No files yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths that [`save`](Self::save) would write.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|(p, _)| p.clone()).collect()
    }

    /// Shape file of `path`, if filled.
    pub fn file(&self, path: &Path) -> Option<&ShapeFile> {
        self.files.iter().find(|(p, _)| p == path).map(|(_, f)| f)
    }

    fn file_mut(&mut self, path: &Path, ctx: &AnalysisContext, recreate: bool) -> Result<&mut ShapeFile> {
        let i = match self.files.iter().position(|(p, _)| p == path) {
            Some(i) => i,
            None => {
                let file = if recreate || !path.exists() { ShapeFile::new(ctx) } else { ShapeFile::load(path)? };
                self.files.push((path.to_path_buf(), file));
                self.files.len() - 1
            }
        };
        Ok(&mut self.files[i].1)
    }

    /// Fill every (selection, variable) pair of one pass. Observed data is
    /// only taken from the nominal pass (empty tag).
    pub fn fill(
        &mut self,
        template: &str,
        set: &SampleSet,
        variables: &[Variable],
        selections: &[Selection],
        opts: &CreateInputsOptions,
    ) -> Result<()> {
        let vars: Vec<Variable> = variables.iter().map(|v| v.clone().with_divide_by_bin_width(false)).collect();
        let hopts = GetHistsOptions {
            method: pass_method(opts),
            tag: opts.tag.clone(),
            filter: opts.filter.clone(),
            errband: false,
            ..GetHistsOptions::default()
        };
        let hists = set.gethists(&vars, selections, &hopts)?;
        let nominal = opts.tag.is_empty();

        for var in &vars {
            if !selections.iter().any(|sel| hists.get(&sel.filename, &var.filename).is_some()) {
                continue;
            }
            let path = shapes_path(template, var, &set.ctx);
            let file = self.file_mut(&path, &set.ctx, opts.recreate)?;
            for sel in selections {
                let Some(hs) = hists.get(&sel.filename, &var.filename) else {
                    continue;
                };
                let prefix = format!("{}_", make_hist_name(&[&var.filename, &sel.filename]));
                let dir = file.directory_mut(&sel.filename);
                dir.selection = sel.selection.clone();
                let entries = hs
                    .data
                    .iter()
                    .filter(|_| nominal)
                    .map(|h| (ProcessRole::Data, h))
                    .chain(hs.exp.iter().map(|h| (ProcessRole::Exp, h)))
                    .chain(hs.sig.iter().map(|h| (ProcessRole::Sig, h)));
                for (role, h) in entries {
                    let process = match role {
                        ProcessRole::Data => DATA_OBS.to_string(),
                        _ => process_name(h, &prefix, opts.replace_p),
                    };
                    let mut h = h.clone().renamed(process.clone());
                    h.x_title = var.title.clone();
                    if opts.clamp_negative && role != ProcessRole::Data {
                        clamp(&mut h);
                    }
                    dir.insert(&process, role, h);
                }
            }
        }
        Ok(())
    }

    /// Write every filled file. Returns the written paths.
    pub fn save(&self) -> Result<Vec<PathBuf>> {
        for (path, file) in &self.files {
            file.save(path)?;
            log::info!("createinputs: wrote {}", path.display());
        }
        Ok(self.paths())
    }
}

/// Fill every (selection, variable) pair and write the histograms into one
/// shape file per variable. Returns the written paths.
///
/// All samples are filled before anything is written, so a failing sample
/// leaves existing files untouched. Use [`ShapeInputs`] directly to fill
/// several passes before writing any of them.
pub fn createinputs(
    template: &str,
    set: &SampleSet,
    variables: &[Variable],
    selections: &[Selection],
    opts: &CreateInputsOptions,
) -> Result<Vec<PathBuf>> {
    let mut inputs = ShapeInputs::new();
    inputs.fill(template, set, variables, selections, opts)?;
    inputs.save()
}

/// A systematic read back by [`plotinputs`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystVariation {
    /// Name; variations are stored as `<process>_<name>Up` and `Down`.
    pub name: String,
    /// Processes it applies to (all expected processes when empty).
    #[serde(default)]
    pub processes: Vec<String>,
}

/// Plots of one (selection, variable) pair of a shape file.
#[derive(Debug, Clone)]
pub struct PlotInputs {
    /// Shape file.
    pub path: PathBuf,
    /// Nominal stack; its error band includes the variations.
    pub stack: Stack,
    /// Up / nominal / down per process and systematic.
    pub comparisons: Vec<ComparisonArtifact>,
}

fn is_variation(process: &str, systs: &[SystVariation]) -> bool {
    systs.iter().any(|s| {
        process.ends_with(&format!("_{}Up", s.name)) || process.ends_with(&format!("_{}Down", s.name))
    })
}

/// Read back the shape files written by [`createinputs`]: one stack per
/// (selection, variable) and one comparison per varied process.
pub fn plotinputs(
    template: &str,
    systs: &[SystVariation],
    variables: &[Variable],
    selections: &[Selection],
    ctx: &AnalysisContext,
) -> Result<Vec<PlotInputs>> {
    let mut out = Vec::new();
    for var in variables {
        let path = shapes_path(template, var, ctx);
        let file = ShapeFile::load(&path)?;
        for sel in selections {
            let Some(dir) = file.directory(&sel.filename) else {
                log::warn!("plotinputs: no directory '{}' in {}", sel.filename, path.display());
                continue;
            };
            let mut set = HistSet::new(&sel.filename, &var.filename);
            for e in &dir.histograms {
                if is_variation(&e.process, systs) {
                    continue;
                }
                match e.role {
                    ProcessRole::Data => set.data = Some(e.hist.clone()),
                    ProcessRole::Exp => set.exp.push(e.hist.clone()),
                    ProcessRole::Sig => set.sig.push(e.hist.clone()),
                }
            }
            let divide = var.divides_by_bin_width();
            let per_width = |mut h: Histogram| {
                if divide {
                    h.divide_by_bin_width();
                }
                h
            };

            let mut triplets = Vec::new();
            let mut comparisons = Vec::new();
            for syst in systs {
                let applies = |p: &str| {
                    syst.processes.is_empty()
                        || syst.processes.iter().any(|pat| crate::strings::glob_match(pat, p))
                };
                let (mut up_total, mut down_total): (Option<Histogram>, Option<Histogram>) = (None, None);
                let mut varied = false;
                for nom in &set.exp {
                    let up = dir.get(&format!("{}_{}Up", nom.name, syst.name)).filter(|_| applies(&nom.name));
                    let down = dir.get(&format!("{}_{}Down", nom.name, syst.name)).filter(|_| applies(&nom.name));
                    if let (Some(u), Some(d)) = (up, down) {
                        varied = true;
                        let mut nominal = per_width(nom.clone());
                        nominal.title = nom.name.clone();
                        let t = SystTriplet::new(&syst.name, per_width(u.clone()), nominal, per_width(d.clone()));
                        comparisons.push(ComparisonArtifact::new(&t, &var.title, ctx));
                    }
                    for (total, h) in [(&mut up_total, up.unwrap_or(nom)), (&mut down_total, down.unwrap_or(nom))] {
                        match total {
                            Some(t) => t.add(h, 1.0)?,
                            None => *total = Some(h.clone()),
                        }
                    }
                }
                if !varied {
                    log::warn!("plotinputs: no variation '{}' in {}/{}", syst.name, path.display(), sel.filename);
                    continue;
                }
                if let (Some(u), Some(n), Some(d)) = (up_total, set.total_exp()?, down_total) {
                    triplets.push(SystTriplet::new(&syst.name, per_width(u), per_width(n), per_width(d)));
                }
            }

            if divide {
                set.divide_by_bin_width();
            }
            set.errband = geterrorband(&set.exp, &triplets)?;
            let selection = Selection::new(&sel.name, &dir.selection)
                .with_title(&sel.title)
                .with_filename(&sel.filename);
            out.push(PlotInputs { path: path.clone(), stack: Stack::new(set, var, &selection, ctx), comparisons });
        }
    }
    Ok(out)
}
