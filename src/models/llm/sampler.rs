//! Seeded temperature / top-k / top-p sampling

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::GenerationConfig;
use crate::error::{Error, Result};

pub struct Sampler {
	temperature: f32,
	top_k: usize,
	top_p: f32,
	seed: u64,
	rng: StdRng,
}

impl Sampler {
	pub fn new(config: &GenerationConfig) -> Self {
		Self {
			temperature: config.temperature,
			top_k: config.top_k,
			top_p: config.top_p,
			seed: config.seed,
			rng: StdRng::seed_from_u64(config.seed),
		}
	}

	/// Rewind the random stream so the same prompt replays the same tokens.
	pub fn reset(&mut self) {
		self.rng = StdRng::seed_from_u64(self.seed);
	}

	pub fn sample(&mut self, logits: &[f32]) -> Result<u32> {
		if logits.is_empty() {
			return Err(Error::Generation("empty logits".to_string()));
		}
		if self.temperature <= 0.0 {
			return Ok(argmax(logits));
		}

		let mut candidates: Vec<(u32, f32)> = logits
			.iter()
			.enumerate()
			.filter(|(_, l)| l.is_finite())
			.map(|(i, &l)| (i as u32, l / self.temperature))
			.collect();
		if candidates.is_empty() {
			return Err(Error::Generation("all logits are non-finite".to_string()));
		}

		candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
		if self.top_k > 0 {
			candidates.truncate(self.top_k);
		}

		let max = candidates[0].1;
		let mut probs: Vec<f32> = candidates.iter().map(|(_, l)| (l - max).exp()).collect();
		let sum: f32 = probs.iter().sum();
		probs.iter_mut().for_each(|p| *p /= sum);

		if self.top_p > 0.0 && self.top_p < 1.0 {
			let mut cumulative = 0.0;
			let mut keep = probs.len();
			for (i, p) in probs.iter().enumerate() {
				cumulative += p;
				if cumulative >= self.top_p {
					keep = i + 1;
					break;
				}
			}
			probs.truncate(keep);
			let sum: f32 = probs.iter().sum();
			probs.iter_mut().for_each(|p| *p /= sum);
		}

		let mut draw: f32 = self.rng.random();
		for (i, p) in probs.iter().enumerate() {
			if draw < *p {
				return Ok(candidates[i].0);
			}
			draw -= p;
		}
		Ok(candidates[probs.len() - 1].0)
	}
}

/// Index of the largest logit; the first one wins ties.
fn argmax(logits: &[f32]) -> u32 {
	let mut best = 0;
	for (i, &l) in logits.iter().enumerate() {
		if l > logits[best] {
			best = i;
		}
	}
	best as u32
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config(temperature: f32, seed: u64) -> GenerationConfig {
		GenerationConfig { temperature, seed, ..GenerationConfig::default() }
	}

	#[test]
	fn zero_temperature_is_greedy() {
		let mut s = Sampler::new(&config(0.0, 1));
		assert_eq!(s.sample(&[0.1, 3.0, 3.0, -1.0]).unwrap(), 1);
	}

	#[test]
	fn same_seed_same_draws() {
		let logits: Vec<f32> = (0..50).map(|i| (i as f32 * 0.37).sin()).collect();
		let mut a = Sampler::new(&config(1.0, 7));
		let mut b = Sampler::new(&config(1.0, 7));
		let xs: Vec<u32> = (0..20).map(|_| a.sample(&logits).unwrap()).collect();
		let ys: Vec<u32> = (0..20).map(|_| b.sample(&logits).unwrap()).collect();
		assert_eq!(xs, ys);

		a.reset();
		let again: Vec<u32> = (0..20).map(|_| a.sample(&logits).unwrap()).collect();
		assert_eq!(xs, again);
	}

	#[test]
	fn top_k_one_is_greedy() {
		let mut s = Sampler::new(&GenerationConfig { temperature: 2.0, top_k: 1, ..GenerationConfig::default() });
		for _ in 0..10 {
			assert_eq!(s.sample(&[0.0, 0.5, 4.0, 1.0]).unwrap(), 2);
		}
	}

	#[test]
	fn empty_logits_fail() {
		let mut s = Sampler::new(&config(0.7, 1));
		assert!(s.sample(&[]).is_err());
	}
}
