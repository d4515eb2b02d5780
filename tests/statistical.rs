//! Empirical checks that banded MinHash follows its S-curve.

use std::sync::Arc;

use nearmatch::{
    InMemoryBackend, LshParams, MinHashConfig, MinHasher, SimilarityStore, StorageLevel,
    StoreConfig,
};

const TRIALS: usize = 300;
const TOLERANCE: f64 = 0.1;

fn token_sets(trial: usize, shared: usize, unique: usize) -> (Vec<String>, Vec<String>) {
    let base = format!("t{trial}-");
    let common = (0..shared).map(|i| format!("{base}s{i}"));
    let a = common
        .clone()
        .chain((0..unique).map(|i| format!("{base}a{i}")))
        .collect();
    let b = common
        .chain((0..unique).map(|i| format!("{base}b{i}")))
        .collect();
    (a, b)
}

fn shares_a_band(a: &[u32], b: &[u32], rows: usize) -> bool {
    a.chunks_exact(rows)
        .zip(b.chunks_exact(rows))
        .any(|(x, y)| x == y)
}

#[test]
fn candidate_rate_tracks_collision_probability() {
    let params = LshParams::new(22, 5);
    let hasher = MinHasher::new(MinHashConfig::new(params.num_hashes())).unwrap();

    for (shared, unique) in [(40, 20), (30, 30), (60, 10), (20, 40)] {
        let jaccard = shared as f64 / (shared + 2 * unique) as f64;
        let hits = (0..TRIALS)
            .filter(|&trial| {
                let (a, b) = token_sets(trial, shared, unique);
                shares_a_band(&hasher.signature(&a), &hasher.signature(&b), params.rows_per_band)
            })
            .count();

        let observed = hits as f64 / TRIALS as f64;
        let expected = params.collision_probability(jaccard);
        assert!(
            (observed - expected).abs() <= TOLERANCE,
            "jaccard={jaccard:.3} observed={observed:.3} expected={expected:.3}"
        );
    }
}

#[test]
fn slot_agreement_estimates_jaccard() {
    let hasher = MinHasher::new(MinHashConfig::new(1024)).unwrap();
    let (a, b) = token_sets(0, 50, 25);
    let estimate = nearmatch::estimate_similarity(&hasher.signature(&a), &hasher.signature(&b));
    assert!((estimate - 0.5).abs() < 0.08, "estimate={estimate}");
}

// Tokens in the union of each end-to-end pair; similarity steps by 1/UNION.
const UNION: usize = 60;
const REPEATS: usize = 20;
const MASS_TOLERANCE: f64 = 0.02;

fn pair_texts(pair: usize, shared: usize) -> (String, String) {
    let only = UNION - shared;
    let common = (0..shared).map(|i| format!("p{pair}-s{i}"));
    let a: Vec<String> = common
        .clone()
        .chain((0..only / 2).map(|i| format!("p{pair}-a{i}")))
        .collect();
    let b: Vec<String> = common
        .chain((0..only - only / 2).map(|i| format!("p{pair}-b{i}")))
        .collect();
    (a.join(" "), b.join(" "))
}

/// Pairs are spread evenly over `[0, t)` and `(t, 1]`, so the miss rate
/// above the threshold times `1 - t` estimates the false negative mass, and
/// the hit rate below it times `t` the false positive mass.
#[tokio::test]
async fn store_queries_stay_within_planned_error_bounds() {
    let threshold = 0.5;
    let (max_fn, max_fp) = (0.05, 0.05);
    let words = |text: &str| text.split_whitespace().map(str::to_string).collect::<Vec<_>>();
    let store = SimilarityStore::create(
        StoreConfig::new(threshold)
            .with_false_negative_proba(max_fn)
            .with_false_positive_proba(max_fp)
            .with_storage_level(StorageLevel::Minimal),
        Arc::new(words),
        Arc::new(InMemoryBackend::new()),
    )
    .await
    .unwrap();

    let mut pairs = Vec::new();
    for repeat in 0..REPEATS {
        for shared in 0..=UNION {
            if shared * 2 == UNION {
                continue;
            }
            let (indexed, query_text) = pair_texts(repeat * (UNION + 1) + shared, shared);
            let id = store.insert(&indexed, None, None, None).await.unwrap();
            pairs.push((id, query_text, shared * 2 > UNION));
        }
    }

    let (mut above, mut missed, mut below, mut hit) = (0usize, 0usize, 0usize, 0usize);
    for (id, text, is_above) in &pairs {
        let found = store.query(text).await.unwrap().contains(id);
        if *is_above {
            above += 1;
            missed += usize::from(!found);
        } else {
            below += 1;
            hit += usize::from(found);
        }
    }

    let fn_mass = (1.0 - threshold) * missed as f64 / above as f64;
    let fp_mass = threshold * hit as f64 / below as f64;
    assert!(
        fn_mass <= max_fn + MASS_TOLERANCE,
        "false negative mass {fn_mass:.4} ({missed}/{above} missed)"
    );
    assert!(
        fp_mass <= max_fp + MASS_TOLERANCE,
        "false positive mass {fp_mass:.4} ({hit}/{below} hit)"
    );
    // Pairs just below the threshold do collide, so the estimate is not vacuous.
    assert!(hit > 0);
}
