use std::f64::consts::PI;
use std::sync::Arc;

use gpfit::fit::{fit_with_kernel, FitConfig};
use gpfit::process::gaussian::kernel::{RBFKernel, ScaleKernel};
use gpfit::{GpError, TrainingData};
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use rand_xoshiro::Xoshiro256Plus;

const NOISE_STD: f64 = 0.2;

fn main() -> Result<(), GpError> {
    env_logger::init();
    let mut rng = Xoshiro256Plus::seed_from_u64(1337);
    let noise = Normal::new(0.0, NOISE_STD).map_err(|e| {
        GpError::InvalidInput(e.to_string())
    })?;

    let x: Vec<f64> = (0..100).map(|i| i as f64 / 99.0).collect();
    let y: Vec<f64> = x
        .iter()
        .map(|x| (2.0 * PI * x).sin() + rng.sample(noise))
        .collect();
    let data = Arc::new(TrainingData::from_scalars(&x, &y)?);

    let kernel = ScaleKernel::new(RBFKernel::new(0.693)?, 1.0)?;
    let config = FitConfig::default().with_num_epochs(200).with_log_every(25);
    let model = fit_with_kernel(kernel, data, config)?;

    println!("fitted: {}", model.hyperparameters()?);
    println!(
        "noise variance {:.4} (true {:.4})",
        model.noise_variance(),
        NOISE_STD * NOISE_STD
    );

    let x_test = vec![vec![0.25], vec![0.5], vec![0.75]];
    let predictive = model.predictive(&x_test)?;
    let (lower, upper) = predictive.confidence_region(2.0);
    for (i, x) in x_test.iter().enumerate() {
        println!(
            "y({:.2}) in [{:.3}, {:.3}]",
            x[0], lower[i], upper[i]
        );
    }

    // a few functions from the posterior
    let posterior = model.posterior(&x_test)?;
    for draw in posterior.sample(3, &mut rng)? {
        println!("{:?}", draw.as_slice());
    }
    Ok(())
}
