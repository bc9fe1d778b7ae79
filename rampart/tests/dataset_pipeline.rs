//! Laws of the lazy dataset operators.

use proptest::prelude::*;
use rampart::data::{DataError, Dataset, SplitPoint, VecDataset};

fn numbers(values: Vec<i32>) -> VecDataset<i32> {
    VecDataset::new("numbers", values)
}

proptest! {
    #[test]
    fn map_applies_per_index(values in prop::collection::vec(-1000i32..1000, 0..64)) {
        let mapped = numbers(values.clone()).map(|x| x * 3 - 1);
        prop_assert_eq!(mapped.len(), values.len());
        for (i, v) in values.iter().enumerate() {
            prop_assert_eq!(mapped.get(i as isize).unwrap(), v * 3 - 1);
        }
    }

    #[test]
    fn batches_reconstruct_the_sequence(
        values in prop::collection::vec(any::<i32>(), 1..80),
        size in 1usize..12,
    ) {
        let batches = numbers(values.clone()).batch(size).unwrap();
        let n = batches.len();
        prop_assert_eq!(n, (values.len() + size - 1) / size);

        let all: Vec<Vec<i32>> = batches.iter().collect();
        for batch in &all[..n - 1] {
            prop_assert_eq!(batch.len(), size);
        }
        let last = values.len() % size;
        prop_assert_eq!(all[n - 1].len(), if last == 0 { size } else { last });
        prop_assert_eq!(all.concat(), values);
    }

    #[test]
    fn permute_is_a_reproducible_bijection(
        values in prop::collection::vec(any::<i32>(), 0..100),
        seed in any::<u64>(),
    ) {
        let a: Vec<i32> = numbers(values.clone()).permute(seed).iter().collect();
        let b: Vec<i32> = numbers(values.clone()).permute(seed).iter().collect();
        prop_assert_eq!(&a, &b);

        let mut sorted = a;
        sorted.sort_unstable();
        let mut expected = values;
        expected.sort_unstable();
        prop_assert_eq!(sorted, expected);
    }

    #[test]
    fn reads_are_deterministic(values in prop::collection::vec(any::<i32>(), 1..40), seed in any::<u64>()) {
        let ds = numbers(values).permute(seed).slice(1.., 2).unwrap().repeat(2);
        for i in 0..ds.len() as isize {
            prop_assert_eq!(ds.get(i).unwrap(), ds.get(i).unwrap());
        }
    }
}

#[test]
fn zip_length_mismatch_fails_at_construction() {
    let result = numbers(vec![1, 2, 3]).zip(numbers(vec![1, 2, 3, 4]));
    assert!(matches!(
        result,
        Err(DataError::LengthMismatch {
            expected: 3,
            found: 4
        })
    ));
}

#[test]
fn random_view_draws_from_the_source() {
    let source = vec![10, 20, 30, 40];
    let random = numbers(source.clone()).random(Some(50), 9);
    assert_eq!(random.len(), 50);
    for i in 0..50 {
        assert!(source.contains(&random.get(i).unwrap()));
    }
}

#[test]
fn random_view_redraws_on_every_access() {
    let random = numbers(vec![10, 20, 30, 40]).random(None, 5);
    let mut seen: Vec<i32> = (0..64).map(|_| random.get(0).unwrap()).collect();
    seen.sort_unstable();
    seen.dedup();
    assert!(seen.len() > 1, "index 0 always returned {:?}", seen);
}

#[test]
fn composed_identifier_and_split() {
    let ds = numbers((0..10).collect())
        .map_named("double", |x| x * 2)
        .slice(2..8, 1)
        .unwrap();
    assert_eq!(ds.identifier(), "numbers.map_double.[2..8]");
    assert_eq!(ds.get(-1).unwrap(), 14);
    assert!(matches!(ds.get(6), Err(DataError::IndexOutOfRange { index: 6, len: 6 })));

    let (head, tail) = ds.split(SplitPoint::Ratio(0.5)).unwrap();
    assert_eq!(head.iter().collect::<Vec<_>>(), vec![4, 6, 8]);
    assert_eq!(tail.iter().collect::<Vec<_>>(), vec![10, 12, 14]);
}

#[test]
fn zip_pairs_elements_by_index() {
    let ds = numbers(vec![1, 2, 3])
        .zip(numbers(vec![4, 5, 6]).map(|x| x as f32))
        .unwrap();
    assert_eq!(ds.identifier(), "zip[numbers,numbers.map]");
    assert_eq!(ds.get(1).unwrap(), (2, 5.0));
}
