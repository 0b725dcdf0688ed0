use anyhow::{Context, Result};
use serde_json::{json, Value};

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

fn generate_trace(
    times: &[f64],
    peaks: &[(f64, f64, f64)],
    drift: (f64, f64),
    noise_level: f64,
    rng: &mut SimpleRng,
) -> Vec<f64> {
    times
        .iter()
        .map(|&t| {
            let signal: f64 = peaks
                .iter()
                .map(|&(mu, sigma, amp)| gaussian(t, mu, sigma, amp))
                .sum();
            signal + drift.0 + drift.1 * t + rng.gauss(0.0, noise_level)
        })
        .collect()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Writes `sample_data.json`: synthetic chromatograms with a drifting
/// baseline, a few Gaussian peaks and detector noise, in the records layout
/// the loader reads.
fn main() -> Result<()> {
    env_logger::init();
    let mut rng = SimpleRng::new(42);

    // Elution time in minutes: 8 → 20, 0.01 min per point
    let times: Vec<f64> = (0..1201).map(|i| 8.0 + i as f64 * 0.01).collect();

    // (retention time, sigma, height) per sample
    let samples: [(&str, Vec<(f64, f64, f64)>); 3] = [
        ("PS-narrow", vec![(13.2, 0.25, 1.0)]),
        ("PS-blend", vec![(12.1, 0.30, 0.7), (14.6, 0.35, 0.9)]),
        ("PMMA-broad", vec![(13.8, 0.60, 0.8), (17.9, 0.10, 0.3)]),
    ];
    let injections = [1, 2];

    let mut records: Vec<Value> = Vec::new();
    for (sample, peaks) in &samples {
        for &injection in &injections {
            let drift = (0.02 * injection as f64, -0.001);
            let y = generate_trace(&times, peaks, drift, 0.004, &mut rng);
            records.push(json!({
                "x": times,
                "y": y,
                "sample": sample,
                "injection": injection,
            }));
        }
    }

    let output_path = "sample_data.json";
    let file = std::fs::File::create(output_path)
        .with_context(|| format!("creating {output_path}"))?;
    serde_json::to_writer(std::io::BufWriter::new(file), &records)
        .context("writing sample records")?;

    println!(
        "Wrote {} traces ({} points each) to {output_path}",
        records.len(),
        times.len()
    );
    Ok(())
}
