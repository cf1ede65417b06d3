use std::f64::consts::PI;

use gpfit::{fit, FitConfig, GpError};

fn main() -> Result<(), GpError> {
    env_logger::init();

    let x_train: Vec<Vec<f64>> =
        (0..15).map(|i| vec![i as f64 / 14.0]).collect();
    let y_train: Vec<f64> =
        x_train.iter().map(|x| (2.0 * PI * x[0]).sin()).collect();

    let config = FitConfig::default()
        .with_lengthscale_init(0.693)
        .with_noise_init(2.0)
        .with_num_epochs(150)
        .with_log_every(10);

    let model = fit(&x_train, &y_train, config)?;
    println!(
        "loss: {:.4} -> {:.4}",
        model.initial_loss(),
        model.final_loss()
    );
    for record in model.progress() {
        println!(
            "{:>4} {:>10.4} {:?}",
            record.epoch, record.loss, record.hyperparameters
        );
    }

    let x_test: Vec<Vec<f64>> =
        (0..=10).map(|i| vec![i as f64 / 10.0]).collect();
    let posterior = model.posterior(&x_test)?;
    let (lower, upper) = posterior.confidence_region(2.0);

    println!("{:>6} {:>8} {:>8} {:>8}", "x", "lower", "mean", "upper");
    for (i, x) in x_test.iter().enumerate() {
        println!(
            "{:>6.2} {:>8.4} {:>8.4} {:>8.4}",
            x[0],
            lower[i],
            posterior.mean()[i],
            upper[i]
        );
    }
    Ok(())
}
