//! Property tests for vector index search ordering, determinism and persistence.

use proptest::prelude::*;
use quire_core::{IndexError, IndexLocation, Metric, Passage, VectorIndex};

const DIM: usize = 8;

fn arb_vector() -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, DIM)
}

fn arb_metric() -> impl Strategy<Value = Metric> {
    prop_oneof![Just(Metric::Cosine), Just(Metric::L2)]
}

fn passages(n: usize) -> Vec<Passage> {
    (0..n)
        .map(|i| Passage {
            content: format!("passage {i}"),
            sequence_index: i,
            source_id: Some("doc".to_string()),
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn results_are_ordered_and_bounded(
        vectors in proptest::collection::vec(arb_vector(), 1..30),
        query in arb_vector(),
        k in 0usize..40,
        metric in arb_metric(),
    ) {
        let n = vectors.len();
        let index = VectorIndex::build(passages(n), vectors, metric).unwrap();
        let hits = index.search(&query, k).unwrap();
        prop_assert_eq!(hits.len(), k.min(n));
        for pair in hits.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                prop_assert!(pair[0].passage.sequence_index < pair[1].passage.sequence_index);
            }
        }
    }

    #[test]
    fn repeated_searches_are_identical(
        vectors in proptest::collection::vec(arb_vector(), 1..20),
        query in arb_vector(),
    ) {
        let n = vectors.len();
        let index = VectorIndex::build(passages(n), vectors, Metric::Cosine).unwrap();
        let first = index.search(&query, 4).unwrap();
        for _ in 0..3 {
            prop_assert_eq!(&index.search(&query, 4).unwrap(), &first);
        }
    }

    #[test]
    fn mismatched_counts_never_truncate(n in 0usize..10, m in 0usize..10) {
        prop_assume!(n != m);
        let vectors = vec![vec![0.5f32; DIM]; m];
        let result = VectorIndex::build(passages(n), vectors, Metric::Cosine);
        let is_count_mismatch = matches!(result, Err(IndexError::CountMismatch { .. }));
        prop_assert!(is_count_mismatch);
    }

    #[test]
    fn saved_index_searches_the_same(
        vectors in proptest::collection::vec(arb_vector(), 1..15),
        probes in proptest::collection::vec(arb_vector(), 1..5),
        metric in arb_metric(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let location = IndexLocation::new(dir.path()).trusted();
        let n = vectors.len();
        let index = VectorIndex::build(passages(n), vectors, metric).unwrap();
        index.save(&location).unwrap();
        let loaded = VectorIndex::load(&location).unwrap();
        prop_assert_eq!(&loaded, &index);
        for probe in &probes {
            prop_assert_eq!(loaded.search(probe, n).unwrap(), index.search(probe, n).unwrap());
        }
    }
}
