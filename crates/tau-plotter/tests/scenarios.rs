//! End-to-end scenarios over in-memory event tables.

use std::sync::Arc;

use approx::assert_relative_eq;
use tau_core::{Bookkeeping, ExecutionMode, Graph, MemorySource};
use tau_plotter::datacard::{CreateInputsOptions, ProcessRole, ShapeFile, ShapeInputs, createinputs};
use tau_plotter::ratio::{Denominator, Numerator};
use tau_plotter::sample::{BookOptions, FillPlan};
use tau_plotter::stitch::StitchOptions;
use tau_plotter::{
    AnalysisContext, GetHistsOptions, GraphRatioMode, Histogram, Ratio, Sample, SampleSet, Selection, Variable,
    gethistratio,
};

fn table(name: &str, cols: Vec<(&str, Vec<f64>)>, sumw: f64) -> Arc<MemorySource> {
    let cols = cols.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    Arc::new(
        MemorySource::new(name, cols)
            .unwrap()
            .with_cluster_size(512)
            .with_bookkeeping(Bookkeeping { sumw: Some(sumw), nevents: None }),
    )
}

fn nup_table(name: &str, counts: &[(f64, usize)], sumw: f64) -> Arc<MemorySource> {
    let nup: Vec<f64> = counts.iter().flat_map(|&(p, n)| std::iter::repeat_n(p, n)).collect();
    let m = vec![50.0; nup.len()];
    table(name, vec![("NUP", nup), ("m_vis", m)], sumw)
}

#[test]
fn stitched_yield_matches_inclusive_cross_section() {
    let ctx = AnalysisContext::new("2018", "mutau").unwrap().with_lumi(10.0);
    // inclusive multiplicities follow the jet-binned cross sections: 1/5 and 0.5/5
    let incl = Sample::mc("DYJetsToLL_M-50", "Drell-Yan", 5.0)
        .with_source(nup_table("incl", &[(0.0, 7000), (1.0, 2000), (2.0, 1000)], 10000.0));
    let dy1 = Sample::mc("DY1JetsToLL_M-50", "DY + 1j", 1.0).with_source(nup_table("dy1", &[(1.0, 1000)], 1000.0));
    let dy2 = Sample::mc("DY2JetsToLL_M-50", "DY + 2j", 0.5).with_source(nup_table("dy2", &[(2.0, 1000)], 1000.0));
    let mut set =
        SampleSet::new(ctx, None, vec![incl, dy1, dy2], vec![]).with_mode(ExecutionMode::Parallel(2));
    let opts = StitchOptions { name: Some("DY".into()), kfactor: Some(1.2), ..StitchOptions::default() };
    set.stitch(&["DY*JetsToLL_M-50"], opts).unwrap();
    assert_eq!(set.exp.len(), 1);
    assert_eq!(set.exp[0].children().len(), 3);

    let vars = [Variable::uniform("m_vis", 1, 0.0, 100.0).unwrap()];
    let sels = [Selection::new("incl", "")];
    let opts = GetHistsOptions { errband: false, ..GetHistsOptions::default() };
    let hists = set.gethists(&vars, &sels, &opts).unwrap();
    let dy = &hists.get("incl", "m_vis").unwrap().exp[0];
    assert_relative_eq!(dy.integral(), 10.0 * 1.2 * 5.0 * 1000.0, max_relative = 1e-6);
}

#[test]
fn variable_width_bins_are_divided() {
    let var = Variable::with_edges("m_vis", vec![0.0, 1.0, 3.0, 7.0]).unwrap();
    assert!(var.divides_by_bin_width());
    let mut h = var.gethist(None, None, false).unwrap();
    for x in [0.5, 2.0, 5.0] {
        h.fill(x, 2.0);
    }
    h.divide_by_bin_width();
    assert_eq!(h.bin_content, vec![2.0, 1.0, 0.5]);
    assert_eq!(var.y_title(), "Events / bin width");
}

#[test]
fn blinding_snaps_outwards() {
    let uniform = Variable::uniform("m_vis", 40, 0.0, 200.0).unwrap();
    assert_eq!(uniform.blind(70.0, 110.0).unwrap(), "(m_vis<70 || 110<m_vis)");
    let edges = Variable::with_edges("m_vis", vec![0.0, 50.0, 80.0, 120.0, 200.0]).unwrap();
    assert_eq!(edges.blind(70.0, 110.0).unwrap(), "(m_vis<50 || 120<m_vis)");
}

fn regions(rows: &[(f64, f64, usize)]) -> Arc<MemorySource> {
    // (q_2, iso_1, count) with q_1 = 1 and m_vis = 50
    let mut q2 = Vec::new();
    let mut iso = Vec::new();
    for &(q, i, n) in rows {
        q2.extend(std::iter::repeat_n(q, n));
        iso.extend(std::iter::repeat_n(i, n));
    }
    let n = q2.len();
    table("regions", vec![("q_1", vec![1.0; n]), ("q_2", q2), ("iso_1", iso), ("m_vis", vec![50.0; n])], 1000.0)
}

#[test]
fn qcd_from_data_only() {
    let ctx = AnalysisContext::new("2018", "mutau").unwrap().with_lumi(1.0);
    // A (OS tight) 100, B (SS tight) 40, C (OS anti) 200, D (SS anti) 80
    let data = Sample::data("Data", "Observed")
        .with_source(regions(&[(-1.0, 0.1, 100), (1.0, 0.1, 40), (-1.0, 0.3, 200), (1.0, 0.3, 80)]));
    let set = SampleSet::new(ctx, Some(data), vec![], vec![]).with_mode(ExecutionMode::Sequential);
    let vars = [Variable::uniform("m_vis", 4, 0.0, 100.0).unwrap()];
    let sels = [Selection::new("sr", "q_1*q_2<0 && iso_1<0.15")];
    let hists = set.gethists(&vars, &sels, &GetHistsOptions::default().with_method("QCD_ABCD")).unwrap();
    let hs = hists.get("sr", "m_vis").unwrap();
    assert_eq!(hs.data.as_ref().unwrap().integral(), 100.0);
    assert_eq!(hs.exp.len(), 1);
    assert_relative_eq!(hs.exp[0].integral(), 200.0 * 40.0 / 80.0, max_relative = 1e-12);
}

#[test]
fn qcd_skipped_without_data() {
    let ctx = AnalysisContext::new("2018", "mutau").unwrap().with_lumi(1.0);
    let mc = Sample::mc("W", "W + jets", 1.0).with_source(regions(&[(-1.0, 0.1, 10)]));
    let set = SampleSet::new(ctx, None, vec![mc], vec![]).with_mode(ExecutionMode::Sequential);
    let vars = [Variable::uniform("m_vis", 4, 0.0, 100.0).unwrap()];
    let sels = [Selection::new("sr", "q_1*q_2<0 && iso_1<0.15")];
    let hists = set.gethists(&vars, &sels, &GetHistsOptions::default().with_method("QCD_ABCD")).unwrap();
    let titles: Vec<&str> = hists.get("sr", "m_vis").unwrap().exp.iter().map(|h| h.title.as_str()).collect();
    assert_eq!(titles, ["W + jets"]);
}

#[test]
fn data_over_stack() {
    let mut obs = Histogram::uniform("data", 3, 0.0, 3.0).unwrap();
    obs.bin_content = vec![25.0, 20.0, 0.0];
    let graph = Graph::from_poisson(&obs, false);
    let mut a = Histogram::uniform("a", 3, 0.0, 3.0).unwrap();
    a.bin_content = vec![30.0, 6.0, 0.5];
    let mut b = a.clone().renamed("b");
    b.bin_content = vec![20.0, 4.0, 0.5];
    let r = Ratio::new(&[Numerator::Graph(graph.clone())], &Denominator::Stack(vec![a, b]), GraphRatioMode::Snap, None)
        .unwrap();
    let pts = &r.graphs[0].points;
    assert_relative_eq!(pts[0].y, 25.0 / 50.0);
    assert_relative_eq!(pts[1].y, 20.0 / 10.0);
    assert_eq!(pts[2].y, 0.0);
    assert_eq!(pts[2].ey_lo, 0.0);
    assert_relative_eq!(pts[2].ey_hi, graph.points[2].ey_hi);
    assert_relative_eq!(pts[0].ey_hi, graph.points[0].ey_hi / 50.0);
}

#[test]
fn self_ratio_is_unity() {
    let mut h = Histogram::uniform("h", 4, 0.0, 4.0).unwrap();
    h.bin_content = vec![3.0, 0.0, 7.5, 1.0];
    h.sumw2 = h.bin_content.clone();
    assert_eq!(gethistratio(&h, &h).bin_content, vec![1.0; 4]);
}

fn shapes_set() -> SampleSet {
    let ctx = AnalysisContext::new("2018", "mutau").unwrap().with_lumi(1.0);
    let m = |xs: &[f64]| vec![("m_vis", xs.to_vec())];
    let data = Sample::data("Data", "Observed").with_source(table("data", m(&[30.0, 70.0, 70.0]), 0.0));
    let ztt = Sample::mc("ZTT", "Z -> tautau", 1.0).with_source(table("ztt", m(&[70.0, 70.0]), 1000.0));
    let tt = Sample::mc("TT", "ttbar", 1.0).with_source(table("tt", m(&[30.0]), 1000.0));
    SampleSet::new(ctx, Some(data), vec![ztt, tt], vec![]).with_mode(ExecutionMode::Sequential)
}

#[test]
fn createinputs_writes_nominal_and_variations() {
    let dir = tempfile::tempdir().unwrap();
    let template = format!("{}/$OBS_$CHANNEL-$ERA.shapes.json", dir.path().display());
    let set = shapes_set();
    let vars = [Variable::uniform("m_vis", 2, 0.0, 100.0).unwrap()];
    let sels = [Selection::new("baseline", "m_vis>20")];

    let written = createinputs(&template, &set, &vars, &sels, &CreateInputsOptions::default()).unwrap();
    assert_eq!(written.len(), 1);
    assert!(written[0].ends_with("m_vis_mutau-2018.shapes.json"));
    for (dir_tag, weight) in [("_shape_tesUp", "1.03"), ("_shape_tesDown", "0.97")] {
        let shifted = set.shiftweight(&["ZTT"], "", weight);
        let opts = CreateInputsOptions { tag: dir_tag.into(), filter: vec!["ZTT".into()], ..Default::default() };
        createinputs(&template, &shifted, &vars, &sels, &opts).unwrap();
    }

    let file = ShapeFile::load(&written[0]).unwrap();
    let d = file.directory("baseline").unwrap();
    assert_eq!(d.selection, "m_vis>20");
    let names: Vec<&str> = d.histograms.iter().map(|e| e.process.as_str()).collect();
    assert_eq!(names, ["data_obs", "ZTT", "TT", "ZTT_shape_tesUp", "ZTT_shape_tesDown"]);
    assert_eq!(d.histograms[0].role, ProcessRole::Data);
    assert_eq!(d.get("data_obs").unwrap().integral(), 3.0);
    assert_relative_eq!(d.get("ZTT_shape_tesUp").unwrap().integral(), 2.06, max_relative = 1e-12);
    assert_relative_eq!(d.get("ZTT_shape_tesDown").unwrap().integral(), 1.94, max_relative = 1e-12);
}

fn abcd_set() -> SampleSet {
    let ctx = AnalysisContext::new("2018", "mutau").unwrap().with_lumi(1.0);
    let data = Sample::data("Data", "Observed")
        .with_source(regions(&[(-1.0, 0.1, 100), (1.0, 0.1, 40), (-1.0, 0.3, 200), (1.0, 0.3, 80)]));
    // unit weights: xsec 1 pb, 1 fb^-1, sumw 1000
    let ztt = Sample::mc("ZTT", "Z -> tautau", 1.0).with_source(regions(&[(-1.0, 0.1, 5), (-1.0, 0.3, 10)]));
    let tt = Sample::mc("TT", "ttbar", 1.0).with_source(regions(&[(-1.0, 0.3, 50)]));
    SampleSet::new(ctx, Some(data), vec![ztt, tt], vec![]).with_mode(ExecutionMode::Sequential)
}

#[test]
fn filtered_variation_keeps_qcd_nominal() {
    let dir = tempfile::tempdir().unwrap();
    let template = format!("{}/$OBS.shapes.json", dir.path().display());
    let set = abcd_set();
    let vars = [Variable::uniform("m_vis", 4, 0.0, 100.0).unwrap()];
    let sels = [Selection::new("sr", "q_1*q_2<0 && iso_1<0.15")];
    let nominal = CreateInputsOptions { method: Some("QCD_ABCD".into()), recreate: true, ..Default::default() };

    let mut inputs = ShapeInputs::new();
    inputs.fill(&template, &set, &vars, &sels, &nominal).unwrap();
    let opts = CreateInputsOptions { tag: "_tesUp".into(), filter: vec!["ZTT".into()], ..nominal.clone() };
    inputs.fill(&template, &set, &vars, &sels, &opts).unwrap();
    let written = inputs.save().unwrap();

    let file = ShapeFile::load(&written[0]).unwrap();
    let d = file.directory("sr").unwrap();
    // (C - MC in C) * B / D = (200 - 60) * 40 / 80
    assert_relative_eq!(d.get("QCD").unwrap().integral(), 70.0, max_relative = 1e-9);
    assert!(d.get("QCD_tesUp").is_none());
    assert_relative_eq!(d.get("ZTT_tesUp").unwrap().integral(), d.get("ZTT").unwrap().integral());
    assert!(d.get("TT_tesUp").is_none());
}

#[test]
fn failing_variation_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let template = format!("{}/$OBS.shapes.json", dir.path().display());
    let set = shapes_set();
    let vars = [Variable::uniform("m_vis", 2, 0.0, 100.0).unwrap()];
    let sels = [Selection::new("baseline", "m_vis>20")];

    let mut inputs = ShapeInputs::new();
    let nominal = CreateInputsOptions { recreate: true, ..Default::default() };
    inputs.fill(&template, &set, &vars, &sels, &nominal).unwrap();
    assert_eq!(inputs.paths().len(), 1);
    let shifted = set.shiftweight(&["ZTT"], "", "tes_weight_up");
    let opts = CreateInputsOptions { tag: "_tesUp".into(), filter: vec!["ZTT".into()], ..nominal };
    let err = inputs.fill(&template, &shifted, &vars, &sels, &opts).unwrap_err();
    assert!(err.is_fill_time(), "{err}");
    assert!(!inputs.paths()[0].exists());
}

#[test]
fn mc_yield_is_cross_section_times_lumi() {
    let ctx = AnalysisContext::new("2018", "mutau").unwrap();
    let flat: Vec<f64> = (0..400).map(|i| i as f64 / 4.0).collect();
    let s = Sample::mc("X", "X", 0.37)
        .with_lumi(2.5)
        .with_scale(1.1)
        .with_source(table("flat", vec![("x", flat)], 400.0));
    let vars = [Variable::uniform("x", 10, 0.0, 100.0).unwrap()];
    let plan = FillPlan::new(&vars, &[Selection::new("all", "")], &ctx.channel);
    let rd = s.book(&plan, &BookOptions::default()).unwrap();
    rd.run(ExecutionMode::Parallel(3)).unwrap();
    let first = rd.get("all", "x", "X").unwrap().histogram().unwrap();
    assert_relative_eq!(first.integral(), 0.37 * 2.5 * 1000.0 * 1.1, max_relative = 1e-6);
    rd.run(ExecutionMode::Sequential).unwrap();
    assert_eq!(rd.get("all", "x", "X").unwrap().histogram().unwrap(), first);
}
