//! `tether.toml` discovery and option effects.

use std::fs;
use std::path::PathBuf;

use tether_borrowck::compiler::testing_helpers::*;
use tether_borrowck::{analyze_with, AnalysisOptions, ConfigError, LoopStrategy};

/// Fresh scratch directory under the system temp dir.
fn scratch(name: &str) -> PathBuf {
    tether_borrowck::logging::init_test();
    let dir = std::env::temp_dir().join(format!("tether-borrowck-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn discover_walks_up_to_the_nearest_file() {
    let root = scratch("discover");
    let nested = root.join("src").join("deep");
    fs::create_dir_all(&nested).unwrap();
    fs::write(
        root.join("tether.toml"),
        "[borrowck]\nloop_strategy = \"fixed-point\"\nmax_loop_passes = 3\n",
    )
    .unwrap();

    let opts = AnalysisOptions::discover(&nested).unwrap();
    assert_eq!(opts.loop_strategy, LoopStrategy::FixedPoint);
    assert_eq!(opts.loop_pass_limit(), 3);

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn file_without_borrowck_table_gives_defaults() {
    let root = scratch("no-table");
    fs::write(root.join("tether.toml"), "[package]\nname = \"demo\"\n").unwrap();
    let opts = AnalysisOptions::load_from(&root.join("tether.toml")).unwrap();
    assert_eq!(opts, AnalysisOptions::default());
    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn malformed_file_reports_parse_error() {
    let root = scratch("malformed");
    fs::write(root.join("tether.toml"), "[borrowck\nparallel = yes\n").unwrap();
    let err = AnalysisOptions::discover(&root).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)), "{}", err);
    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn dedup_option_changes_reporting() {
    let p = program(vec![main_fn(vec![
        bind("s", ty("String"), string("a", 1), 1),
        use_var("s", 2),
        use_var("s", 3),
        use_var("s", 4),
    ])]);
    let registry = sample_registry();
    let opts = AnalysisOptions::from_toml_str("[borrowck]\ndedup_diagnostics = false\n").unwrap();
    assert_eq!(analyze_with(&p, &registry, &opts).diagnostics.len(), 2);
    let opts = AnalysisOptions::from_toml_str("").unwrap();
    assert_eq!(analyze_with(&p, &registry, &opts).diagnostics.len(), 1);
}

#[test]
fn options_round_trip_through_toml() {
    let opts = AnalysisOptions {
        dedup_diagnostics: false,
        loop_strategy: LoopStrategy::FixedPoint,
        max_loop_passes: 5,
        parallel: true,
    };
    let text = format!("[borrowck]\n{}", toml::to_string(&opts).unwrap());
    assert_eq!(AnalysisOptions::from_toml_str(&text).unwrap(), opts);
}
