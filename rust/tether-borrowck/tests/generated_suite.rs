//! Properties over generated programs.
//!
//! Programs come from the deterministic `ProgramGen`; the same seed always
//! yields the same tree, so failures reproduce from the seed alone.

use tether_borrowck::compiler::testing_helpers::{sample_registry, GenConfig, ProgramGen};
use tether_borrowck::{analyze, analyze_with, AnalysisOptions, DiagnosticKind};

const SEEDS: [u64; 8] = [1, 7, 42, 1234, 9001, 31337, 0xDEAD_BEEF, 0x5EED];

#[test]
fn generator_is_deterministic() {
    for seed in SEEDS {
        let a = ProgramGen::new(seed, GenConfig::default()).generate();
        let b = ProgramGen::new(seed, GenConfig::default()).generate();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap(),
            "seed {}",
            seed
        );
    }
}

#[test]
fn analysis_is_deterministic() {
    let registry = sample_registry();
    for seed in SEEDS {
        let p = ProgramGen::new(seed, GenConfig::default()).generate();
        assert_eq!(
            analyze(&p, &registry).diagnostics,
            analyze(&p, &registry).diagnostics,
            "seed {}",
            seed
        );
    }
}

#[test]
fn copy_only_programs_are_clean() {
    let registry = sample_registry();
    let config = GenConfig {
        copy_only: true,
        ..GenConfig::default()
    };
    for seed in 0..64 {
        let p = ProgramGen::new(seed, config.clone()).generate();
        let result = analyze(&p, &registry);
        assert!(
            result.is_ok(),
            "seed {}: {}",
            seed,
            tether_borrowck::compiler::testing_helpers::render(&result.diagnostics)
        );
    }
}

#[test]
fn parallel_matches_sequential() {
    let registry = sample_registry();
    let parallel = AnalysisOptions {
        parallel: true,
        ..Default::default()
    };
    let config = GenConfig {
        functions: 16,
        ..GenConfig::default()
    };
    for seed in SEEDS {
        let p = ProgramGen::new(seed, config.clone()).generate();
        let seq = analyze(&p, &registry);
        let par = analyze_with(&p, &registry, &parallel);
        assert_eq!(seq.diagnostics, par.diagnostics, "seed {}", seed);
        assert_eq!(seq.functions, par.functions, "seed {}", seed);
    }
}

#[test]
fn two_location_kinds_always_carry_a_secondary() {
    let registry = sample_registry();
    for seed in 0..64 {
        let p = ProgramGen::new(seed, GenConfig::default()).generate();
        for d in analyze(&p, &registry).diagnostics {
            if matches!(
                d.kind,
                DiagnosticKind::UseAfterMove | DiagnosticKind::ConflictingBorrow
            ) {
                assert!(d.secondary.is_some(), "seed {}: {}", seed, d);
            }
        }
    }
}

#[test]
fn dedup_never_adds_diagnostics() {
    let registry = sample_registry();
    let raw = AnalysisOptions {
        dedup_diagnostics: false,
        ..Default::default()
    };
    for seed in SEEDS {
        let p = ProgramGen::new(seed, GenConfig::default()).generate();
        let deduped = analyze(&p, &registry).diagnostics;
        let all = analyze_with(&p, &registry, &raw).diagnostics;
        assert!(deduped.len() <= all.len(), "seed {}", seed);
        for d in &deduped {
            assert!(all.contains(d), "seed {}: {}", seed, d);
        }
    }
}
