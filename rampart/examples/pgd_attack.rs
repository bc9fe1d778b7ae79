//! Example: PGD Attack
//!
//! Trains a small classifier on two Gaussian blobs, then measures how much
//! of its accuracy survives an L-inf PGD attack loaded from JSON.
//!
//! Run with: cargo run --example pgd_attack

use std::rc::Rc;

use anyhow::Result;
use log::info;
use rampart::attack::Model;
use rampart::data::TensorDataset;
use rampart::prelude::*;
use rampart_autograd::{no_grad, Adam, Optimizer};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const FEATURES: usize = 4;

fn blobs(n: usize, seed: u64) -> Result<TensorDataset> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut inputs = Vec::with_capacity(n);
    let mut targets = Vec::with_capacity(n);
    for i in 0..n {
        let class = i % 2;
        let center = if class == 0 { 0.3 } else { 0.7 };
        let x: Vec<f32> = (0..FEATURES)
            .map(|_| (center + rng.gen_range(-0.15..0.15f32)).clamp(0.0, 1.0))
            .collect();
        inputs.push(x);
        targets.push(vec![class as f32]);
    }
    Ok(TensorDataset::new("blobs", inputs, targets, vec![FEATURES], vec![1])?)
}

fn accuracy(model: &dyn Module, x: &Tensor, y: &Tensor) -> f32 {
    let predicted = no_grad(|| model.forward(x).argmax_rows());
    let correct = predicted
        .iter()
        .zip(y.to_vec())
        .filter(|(&p, y)| p as f32 == *y)
        .count();
    correct as f32 / predicted.len() as f32
}

fn main() -> Result<()> {
    env_logger::init();

    println!("Rampart - PGD Attack Example");
    println!("============================\n");

    // 1. Data
    let train = blobs(512, 0)?;
    let test = blobs(128, 1)?;
    println!("Train: {} examples, test: {} examples\n", train.len(), test.len());

    // 2. Model
    let mut model = nn::mlp_classifier(FEATURES, &[16, 16], 2, 7);
    println!("Model parameters: {}\n", nn::parameter_count(&model).trainable);

    // 3. Training
    let mut optimizer = Adam::new(model.parameters(), 0.01);
    let loader = DataLoader::new(train, 32, true).seed(3);
    for epoch in 0..20 {
        let mut epoch_loss = 0.0;
        for (x, y) in loader.iter() {
            let y = y.reshape(&[y.batch_size()]);
            let loss = F::cross_entropy(&model.forward(&x), &y, F::Reduction::Mean);
            epoch_loss += loss.item();
            loss.backward();
            optimizer.step();
            optimizer.zero_grad();
        }
        if epoch % 5 == 0 {
            info!("epoch {}: loss {:.4}", epoch, epoch_loss / loader.num_batches() as f32);
        }
    }
    model.eval();

    // 4. Attack
    let config: AttackConfig = serde_json::from_str(
        r#"{ "kind": "pgd", "eps": 0.2, "step_count": 20, "step_size": 0.02,
             "seed": 5, "clip_bounds": [0.0, 1.0] }"#,
    )?;
    let model: Model = Rc::new(model);
    let attack = config.build(Rc::clone(&model))?;
    attack
        .perturb_completed()
        .subscribe(|p| info!("perturbed a batch of {}", p.x_adv.batch_size()));

    let (x, y) = DataLoader::new(test, 128, false)
        .iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty test set"))?;
    let y = y.reshape(&[y.batch_size()]);
    let x_adv = attack.perturb(&x, Some(&y))?;

    println!("Clean accuracy:       {:.1}%", 100.0 * accuracy(model.as_ref(), &x, &y));
    println!("Adversarial accuracy: {:.1}%", 100.0 * accuracy(model.as_ref(), &x_adv, &y));
    Ok(())
}
