// demos/noise_addition.rs

use ndarray::{arr1, Array1};

use dp_mechanisms::mechanisms::{ExponentialMechanism, ExponentialMethod, LaplaceMechanism};
use dp_mechanisms::privacy_accounting::PrivacyAccountant;

fn main() {
    tracing_subscriber::fmt::init();

    let data = arr1(&[100.0, 85.0, 42.0]);
    let epsilon = 0.5;
    let sensitivity = 1.0;

    let mut accountant = PrivacyAccountant::new();

    let laplace = LaplaceMechanism::new(epsilon, sensitivity, 35).expect("valid parameters");
    let noisy = laplace
        .release_with(data.clone(), Some(&mut accountant))
        .expect("first release succeeds");
    println!("original:    {data}");
    println!("laplace out: {noisy}");

    let candidates: Array1<f64> = Array1::linspace(0.0, 120.0, 13);
    let tent = {
        let candidates = candidates.clone();
        move |dataset: &Array1<f64>| {
            let mean = dataset.mean().unwrap_or(0.0);
            candidates.mapv(|c| -(c - mean).abs())
        }
    };
    let exponential = ExponentialMechanism::new(
        epsilon,
        Box::new(tent),
        sensitivity,
        candidates,
        ExponentialMethod::GumbelTrick,
    )
    .expect("valid parameters");
    let selected = exponential
        .release_with(data, Some(&mut accountant))
        .expect("first release succeeds");

    println!("exponential selection: {selected}");
    let (total_epsilon, total_delta) = accountant.total();
    println!("cumulative epsilon: {total_epsilon}, delta: {total_delta}");
}
