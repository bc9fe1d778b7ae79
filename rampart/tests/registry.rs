//! Named sources, parted datasets and derived splits.

use rampart::data::{
    DataError, Dataset, DatasetFactory, DatasetSource, DynDataset, PartedDataset, Record,
    SplitTable, VecDataset,
};
use rampart_autograd::Tensor;
use serde_json::{json, Map, Value};

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn builtin_noise_is_reproducible() {
    let factory = DatasetFactory::with_builtin("/nonexistent");
    let a = factory
        .create("WhiteNoise", args(json!({"length": 10, "example_shape": [3], "seed": 4})))
        .unwrap();
    let b = factory
        .create("whitenoise", args(json!({"length": 10, "example_shape": [3], "seed": 4})))
        .unwrap();
    let x = |pds: &PartedDataset<Record<Tensor>>| pds.part("all").unwrap().get(7).unwrap();
    assert_eq!(x(&a), x(&b));
    assert_eq!(a.part("all").unwrap().identifier(), "whitenoise_3_10_4");

    let labels: Vec<f32> = a
        .part("all")
        .unwrap()
        .iter()
        .map(|r| r.get("y").map(|y| y.item()).unwrap_or(-1.0))
        .collect();
    assert!(labels.iter().all(|&y| (0.0..10.0).contains(&y)));
}

#[test]
fn unknown_dataset_lists_the_available_ones() {
    let factory = DatasetFactory::with_builtin("/data");
    match factory.create("mnist", Map::new()) {
        Err(DataError::UnknownDataset { name, available }) => {
            assert_eq!(name, "mnist");
            assert_eq!(available, vec!["rademachernoise", "whitenoise"]);
        }
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}

#[test]
fn custom_source_with_subsets_and_splits() {
    let mut factory: DatasetFactory<u32> = DatasetFactory::new("/data");
    let mut splits = SplitTable::new();
    splits.insert("train".into(), ("fit".into(), "holdout".into(), 0.5));
    factory.register(
        "Counting",
        DatasetSource::new(|a| {
            let offset: u32 = a.get_or("offset", 0)?;
            let subset = a.subset.clone().unwrap_or_default();
            let n = if subset == "train" { 10 } else { 4 };
            Ok(VecDataset::new(format!("counting-{}", subset), (offset..offset + n).collect())
                .boxed())
        })
        .subsets(&["train", "test"])
        .path("counting")
        .default_arg("offset", 100)
        .splits(splits),
    );

    let pds = factory.create("counting", args(json!({"offset": 7}))).unwrap();
    assert_eq!(pds.loaded_parts(), ["train".to_string(), "test".to_string()]);
    assert_eq!(pds.part("fit").unwrap().len(), 5);
    assert_eq!(pds.part("holdout").unwrap().get(0).unwrap(), 12);
    assert_eq!(pds.part("test").unwrap().get(0).unwrap(), 7);
    assert!(matches!(pds.part("val"), Err(DataError::UnknownPart { .. })));
}

#[test]
fn transforms_apply_once_per_part() {
    let all: DynDataset<i32> = VecDataset::new("n", (0..50).collect()).boxed();
    let pds = PartedDataset::new(vec![("all".into(), all)]);
    let doubled = pds.with_transform(|d| Ok(d.map_named("double", |x| x * 2).boxed()));

    let val = doubled.part("val").unwrap();
    assert_eq!(val.identifier(), "n.[0..40].[32..40].map_double");
    assert_eq!(val.get(0).unwrap(), 64);
    assert_eq!(pds.part("val").unwrap().get(0).unwrap(), 32);
    assert_eq!(doubled.part("val").unwrap().identifier(), val.identifier());
}
