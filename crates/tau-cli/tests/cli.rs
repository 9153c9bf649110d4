use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tau_core::{Bookkeeping, write_parquet};
use tau_plotter::ShapeFile;

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_taufw"))
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

/// Ten events per sample: opposite-sign pairs with m_vis spread over [0, 200).
fn write_sample(dir: &Path, name: &str, sumw: Option<f64>) {
    let m_vis: Vec<f64> = (0..10).map(|i| 10.0 + 20.0 * i as f64).collect();
    let q_1 = vec![1.0; 10];
    let q_2 = vec![-1.0; 10];
    let genweight = vec![1.0; 10];
    let columns = vec![
        ("m_vis".to_string(), m_vis),
        ("q_1".to_string(), q_1),
        ("q_2".to_string(), q_2),
        ("genweight".to_string(), genweight),
    ];
    let bookkeeping = Bookkeeping { sumw, nevents: sumw };
    write_parquet(&dir.join(format!("{name}.parquet")), &columns, bookkeeping, 4).unwrap();
}

fn fixture(dir: &Path, variable: &str) -> PathBuf {
    write_sample(dir, "SingleMuon", None);
    write_sample(dir, "ZTT", Some(1000.0));
    write_sample(dir, "TT", Some(1000.0));
    let config = format!(
        r##"
era: UL2018
channel: mutau
lumi: 1.0
files: "{dir}/$SAMPLE.parquet"
weight: genweight
samples:
  data:
    - [Data, SingleMuon, "Observed"]
  exp:
    - [DY, ZTT, "Z -> tau tau", 100.0]
    - [Top, TT, "ttbar", 50.0]
selections:
  - {{name: baseline, cut: "q_1*q_2<0", title: "#mu#tau_{{h}}"}}
variables:
  - {{name: {variable}, bins: [10, 0, 200], title: "m_{{vis}} [GeV]"}}
systematics:
  - name: shape_tes
    processes: [ZTT]
    up: {{weight: "1.03"}}
    down: {{weight: "0.97"}}
"##,
        dir = dir.display()
    );
    let path = dir.join("analysis.yml");
    std::fs::write(&path, config).unwrap();
    path
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

#[test]
fn hists_and_stack_write_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = fixture(dir.path(), "m_vis");
    let out_dir = dir.path().join("out");
    let (cfg_s, out_s) = (cfg.to_string_lossy().into_owned(), out_dir.to_string_lossy().into_owned());

    let out = run(&["hists", "--config", &cfg_s, "--out", &out_s, "--sequential"]);
    assert!(out.status.success(), "hists failed: {}", stderr(&out));
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join("m_vis_baseline.json")).unwrap()).unwrap();
    assert_eq!(json["selection"], "baseline");
    assert_eq!(json["exp"].as_array().unwrap().len(), 2);

    let out = run(&["stack", "--config", &cfg_s, "--out", &out_s, "--threads", "2"]);
    assert!(out.status.success(), "stack failed: {}", stderr(&out));
    let art: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join("m_vis_baseline.json")).unwrap()).unwrap();
    assert_eq!(art["schema_version"], "taufw_stack_v1");
    // ZTT: 10 events x 100 pb x 1 fb^-1 x 1000 / 1000, TT: 10 x 50
    let total: f64 = art["total_y"].as_array().unwrap().iter().map(|v| v.as_f64().unwrap()).sum();
    assert!((total - 1500.0).abs() < 1e-6, "total = {total}");
    let svg = std::fs::read_to_string(out_dir.join("m_vis_baseline.svg")).unwrap();
    assert!(svg.starts_with("<svg"));
    assert!(svg.contains("Z -&gt; tau tau"));
}

#[test]
fn createinputs_then_plotinputs() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = fixture(dir.path(), "m_vis");
    let out_dir = dir.path().join("shapes");
    let (cfg_s, out_s) = (cfg.to_string_lossy().into_owned(), out_dir.to_string_lossy().into_owned());

    let out = run(&["createinputs", "-c", &cfg_s, "-o", &out_s, "--sequential"]);
    assert!(out.status.success(), "createinputs failed: {}", stderr(&out));
    let path = out_dir.join("m_vis_mutau-UL2018.shapes.json");
    assert!(String::from_utf8_lossy(&out.stdout).contains("m_vis_mutau-UL2018.shapes.json"));

    let file = ShapeFile::load(&path).unwrap();
    let d = file.directory("baseline").unwrap();
    let processes: Vec<&str> = d.histograms.iter().map(|e| e.process.as_str()).collect();
    assert_eq!(processes, ["data_obs", "ZTT", "TT", "ZTT_shape_tesUp", "ZTT_shape_tesDown"]);
    let nom = d.get("ZTT").unwrap().integral();
    assert!((d.get("ZTT_shape_tesUp").unwrap().integral() - 1.03 * nom).abs() < 1e-6);
    assert!((d.get("ZTT_shape_tesDown").unwrap().integral() - 0.97 * nom).abs() < 1e-6);
    assert!(d.get("TT_shape_tesUp").is_none());

    let out = run(&["plotinputs", "-c", &cfg_s, "-o", &out_s]);
    assert!(out.status.success(), "plotinputs failed: {}", stderr(&out));
    assert!(out_dir.join("m_vis_baseline.svg").exists());
    let cmp = std::fs::read_to_string(out_dir.join("m_vis_baseline_ZTT_shape_tes.svg")).unwrap();
    assert!(cmp.contains("#cc2222"));
}

#[test]
fn failing_systematic_leaves_no_shapes() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path(), "m_vis");
    let cfg = with_variable(dir.path(), "\"1.03\"", "\"tes_weight_up\"");
    let out_dir = dir.path().join("shapes");
    let out_s = out_dir.to_string_lossy().into_owned();

    let out = run(&["createinputs", "-c", &cfg.to_string_lossy(), "-o", &out_s, "--sequential"]);
    assert_eq!(out.status.code(), Some(3), "{}", stderr(&out));
    assert!(stderr(&out).contains("tes_weight_up"));
    assert!(!out_dir.join("m_vis_mutau-UL2018.shapes.json").exists());
}

#[test]
fn exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    let out_s = dir.path().join("out").to_string_lossy().into_owned();

    let missing = dir.path().join("nope.yml").to_string_lossy().into_owned();
    let out = run(&["hists", "--config", &missing, "--out", &out_s]);
    assert_eq!(out.status.code(), Some(2), "{}", stderr(&out));

    let bad = dir.path().join("bad.yml");
    std::fs::write(&bad, "era: UL1999\nchannel: mutau\nfiles: x.parquet\n").unwrap();
    let out = run(&["hists", "--config", &bad.to_string_lossy(), "--out", &out_s]);
    assert_eq!(out.status.code(), Some(1), "{}", stderr(&out));

    let cfg = fixture(dir.path(), "pt_9");
    let out = run(&["hists", "--config", &cfg.to_string_lossy(), "--out", &out_s, "--sequential"]);
    assert_eq!(out.status.code(), Some(3), "{}", stderr(&out));

    std::fs::remove_file(dir.path().join("TT.parquet")).unwrap();
    let cfg = with_variable(dir.path(), "pt_9", "m_vis");
    let out = run(&["hists", "--config", &cfg.to_string_lossy(), "--out", &out_s, "--sequential"]);
    assert_eq!(out.status.code(), Some(2), "{}", stderr(&out));
}

fn with_variable(dir: &Path, from: &str, to: &str) -> PathBuf {
    let cfg = dir.join("analysis.yml");
    let text = std::fs::read_to_string(&cfg).unwrap().replace(from, to);
    std::fs::write(&cfg, text).unwrap();
    cfg
}
