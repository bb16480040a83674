// tests/mechanism_scenarios.rs
//
// Concrete end-to-end release scenarios and cross-mechanism statistical
// checks, as opposed to the per-mechanism unit tests living next to each
// mechanism's source.

use ndarray::{arr1, Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_test::traced_test;

use dp_mechanisms::error::DpError;
use dp_mechanisms::mechanisms::{
    ExponentialMechanism, ExponentialMethod, GeometricMechanism, LaplaceMechanism,
    PermuteAndFlipMechanism, PrivateMultiplicativeWeights, SmallDb, Utility,
};

#[test]
fn laplace_release_then_second_call_is_exhausted() {
    let mechanism = LaplaceMechanism::new(1.0, 1.0, 35).unwrap();
    let mut rng = StdRng::seed_from_u64(100);
    let released = mechanism
        .release_with_rng(Array1::zeros(5), &mut rng)
        .unwrap();
    assert_eq!(released.len(), 5);
    assert_eq!(
        mechanism.release_with_rng(Array1::zeros(5), &mut rng),
        Err(DpError::Exhausted)
    );
}

#[test]
fn geometric_release_differences_are_integers_by_construction() {
    let mechanism = GeometricMechanism::new(1.0, 1.0).unwrap();
    let mut rng = StdRng::seed_from_u64(101);
    let input = arr1(&[0, 0, 0]);
    let released = mechanism.release_with_rng(input, &mut rng).unwrap();
    assert_eq!(released.len(), 3);
}

#[test]
fn small_db_on_malformed_queries_fails_closed_and_exhausts() {
    let histogram = Array1::from_elem(1000, 1i64);
    let mechanism = SmallDb::new(1.0, histogram, 0.1).unwrap();
    let mut bad_queries = Array2::from_elem((1, 1000), 0.0);
    bad_queries[[0, 0]] = -1.0;
    let mut rng = StdRng::seed_from_u64(102);
    let result = mechanism.release_with_rng(bad_queries, &mut rng);
    assert!(matches!(result, Err(DpError::Value(_))));

    let ok_queries = Array2::from_elem((1, 1000), 0.5);
    assert_eq!(
        mechanism.release_with_rng(ok_queries, &mut rng),
        Err(DpError::Exhausted)
    );
}

#[test]
fn pmw_from_dyn_with_a_float_count_is_a_type_error() {
    let histogram = Array1::from_vec(vec![10, 20, 30, 5]);
    let float_count: f64 = 20.0;
    let err = PrivateMultiplicativeWeights::new_from_dyn(1e4, histogram, 0.1, &float_count)
        .expect_err("a float is not a usize");
    assert!(matches!(err, DpError::Type(_)));
}

#[test]
fn exponential_sample_and_flip_returns_an_element_of_the_range() {
    let range: Array1<f64> = Array1::linspace(-128.0, 127.0, 2048);
    let tent = {
        let range = range.clone();
        move |dataset: &Array1<f64>| {
            let mean = dataset.mean().unwrap_or(0.0);
            range.mapv(|w| -(w - mean).abs())
        }
    };
    let mechanism = ExponentialMechanism::new(
        1.0,
        Box::new(tent),
        1.0,
        range.clone(),
        ExponentialMethod::SampleAndFlip,
    )
    .unwrap();
    let mut rng = StdRng::seed_from_u64(103);
    let result = mechanism
        .release_with_rng(Array1::zeros(1), &mut rng)
        .unwrap();
    assert!(range.iter().any(|&w| w == result));
}

/// Kolmogorov-Smirnov two-sample statistic between two empirical samples.
fn ks_statistic(a: &[f64], b: &[f64]) -> f64 {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_by(|x, y| x.partial_cmp(y).unwrap());
    b.sort_by(|x, y| x.partial_cmp(y).unwrap());
    let mut i = 0;
    let mut j = 0;
    let mut max_gap: f64 = 0.0;
    while i < a.len() && j < b.len() {
        let (fa, fb) = (i as f64 / a.len() as f64, j as f64 / b.len() as f64);
        max_gap = max_gap.max((fa - fb).abs());
        if a[i] <= b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    max_gap
}

fn sample_reference_laplace(scale: f64, n: usize, rng: &mut StdRng) -> Vec<f64> {
    use rand::Rng;
    (0..n)
        .map(|_| {
            let u: f64 = rng.gen_range(-0.5..0.5);
            -scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
        })
        .collect()
}

#[test]
#[ignore = "slow distributional check; run explicitly with --ignored"]
fn laplace_noise_matches_reference_laplace_distribution() {
    let mechanism = LaplaceMechanism::new(1.0, 1.0, 35).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let n = 1usize << 12;
    let zeros = Array1::zeros(n);
    let sample: Vec<f64> = mechanism
        .release_with_rng(zeros, &mut rng)
        .unwrap()
        .into_raw_vec();
    let reference = sample_reference_laplace(1.0, n, &mut rng);
    let d = ks_statistic(&sample, &reference);
    let critical = 1.36 * (2.0 / n as f64).sqrt();
    assert!(d < critical, "KS statistic {d} exceeded critical value {critical}");
}

fn sample_reference_shifted_geometric(epsilon: f64, rng: &mut StdRng) -> i64 {
    use rand::Rng;
    let p = 1.0 - (-epsilon).exp();
    let u: f64 = rng.gen_range(0.0..1.0);
    ((1.0 - u).ln() / (1.0 - p).ln()).floor() as i64 + 1
}

fn sample_reference_two_sided_geometric(epsilon: f64, n: usize, rng: &mut StdRng) -> Vec<f64> {
    (0..n)
        .map(|_| {
            let x = sample_reference_shifted_geometric(epsilon, rng);
            let y = sample_reference_shifted_geometric(epsilon, rng);
            (x - y) as f64
        })
        .collect()
}

#[test]
#[ignore = "slow distributional check; run explicitly with --ignored"]
fn geometric_noise_matches_reference_two_sided_geometric_distribution() {
    let epsilon = 0.01;
    let mechanism = GeometricMechanism::new(epsilon, 1.0).unwrap();
    let mut rng = StdRng::seed_from_u64(21);
    let n = 1usize << 12;
    let zeros = Array1::zeros(n);
    let sample: Vec<f64> = mechanism
        .release_with_rng(zeros, &mut rng)
        .unwrap()
        .mapv(|x| x as f64)
        .into_raw_vec();
    let reference = sample_reference_two_sided_geometric(epsilon, n, &mut rng);
    let d = ks_statistic(&sample, &reference);
    let critical = 1.36 * (2.0 / n as f64).sqrt();
    assert!(d < critical, "KS statistic {d} exceeded critical value {critical}");
}

/// The tent-shaped output range shared by the exponential- and
/// permute-and-flip-mechanism distributional checks: Ω = {−32, −32+2⁻¹⁰, …,
/// 32}, matching the symmetric utility centered on a zero-mean dataset.
fn tent_output_range() -> Array1<f64> {
    let step = 2f64.powi(-10);
    let count = ((32.0 - (-32.0)) / step).round() as usize + 1;
    Array1::linspace(-32.0, 32.0, count)
}

fn tent_utility(range: Array1<f64>) -> Box<dyn Utility> {
    Box::new(move |dataset: &Array1<f64>| {
        let mean = dataset.mean().unwrap_or(0.0);
        range.mapv(|w| -(w - mean).abs())
    })
}

fn sample_exponential_releases(
    method: ExponentialMethod,
    range: &Array1<f64>,
    n: usize,
    rng: &mut StdRng,
) -> Vec<f64> {
    (0..n)
        .map(|_| {
            let mechanism = ExponentialMechanism::new(
                1.0,
                tent_utility(range.clone()),
                1.0,
                range.clone(),
                method,
            )
            .unwrap();
            mechanism
                .release_with_rng(Array1::zeros(1), rng)
                .unwrap()
        })
        .collect()
}

#[test]
#[ignore = "slow distributional check; run explicitly with --ignored"]
fn exponential_weighted_index_matches_reference_laplace_distribution() {
    let range = tent_output_range();
    let mut rng = StdRng::seed_from_u64(31);
    let n = 1024;
    let sample = sample_exponential_releases(ExponentialMethod::WeightedIndex, &range, n, &mut rng);
    let reference = sample_reference_laplace(2.0, n, &mut rng);
    let d = ks_statistic(&sample, &reference);
    let critical = 1.36 * (2.0 / n as f64).sqrt();
    assert!(d < critical, "KS statistic {d} exceeded critical value {critical}");
}

#[test]
#[ignore = "slow distributional check; run explicitly with --ignored"]
fn exponential_gumbel_trick_matches_reference_laplace_distribution() {
    let range = tent_output_range();
    let mut rng = StdRng::seed_from_u64(32);
    let n = 1024;
    let sample = sample_exponential_releases(ExponentialMethod::GumbelTrick, &range, n, &mut rng);
    let reference = sample_reference_laplace(2.0, n, &mut rng);
    let d = ks_statistic(&sample, &reference);
    let critical = 1.36 * (2.0 / n as f64).sqrt();
    assert!(d < critical, "KS statistic {d} exceeded critical value {critical}");
}

#[test]
#[ignore = "slow distributional check; run explicitly with --ignored"]
fn exponential_sample_and_flip_matches_reference_laplace_distribution() {
    let range = tent_output_range();
    let mut rng = StdRng::seed_from_u64(33);
    let n = 1024;
    let sample = sample_exponential_releases(ExponentialMethod::SampleAndFlip, &range, n, &mut rng);
    let reference = sample_reference_laplace(2.0, n, &mut rng);
    let d = ks_statistic(&sample, &reference);
    let critical = 1.36 * (2.0 / n as f64).sqrt();
    assert!(d < critical, "KS statistic {d} exceeded critical value {critical}");
}

#[test]
#[ignore = "slow distributional check; run explicitly with --ignored"]
fn permute_and_flip_matches_reference_laplace_distribution() {
    let range = tent_output_range();
    let mut rng = StdRng::seed_from_u64(34);
    let n = 1024;
    let sample: Vec<f64> = (0..n)
        .map(|_| {
            let mechanism = PermuteAndFlipMechanism::new(
                1.0,
                tent_utility(range.clone()),
                1.0,
                range.clone(),
            )
            .unwrap();
            mechanism
                .release_with_rng(Array1::zeros(1), &mut rng)
                .unwrap()
        })
        .collect();
    let reference = sample_reference_laplace(2.0, n, &mut rng);
    let d = ks_statistic(&sample, &reference);
    let critical = 1.36 * (2.0 / n as f64).sqrt();
    assert!(d < critical, "KS statistic {d} exceeded critical value {critical}");
}

#[test]
#[traced_test]
fn release_emits_a_tracing_event() {
    let mechanism = LaplaceMechanism::new(1.0, 1.0, 35).unwrap();
    let mut rng = StdRng::seed_from_u64(9);
    mechanism
        .release_with_rng(Array1::zeros(3), &mut rng)
        .unwrap();
    assert!(logs_contain("laplace release"));
}

#[test]
fn laplace_noise_smoke_is_roughly_centered() {
    let mechanism = LaplaceMechanism::new(1.0, 1.0, 35).unwrap();
    let mut rng = StdRng::seed_from_u64(8);
    let sample = mechanism
        .release_with_rng(Array1::zeros(500), &mut rng)
        .unwrap();
    let mean = sample.mean().unwrap();
    assert!(mean.abs() < 0.5, "mean {mean} should be roughly centered at zero");
}
