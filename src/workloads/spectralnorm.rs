use crate::registry::ExecutionUnit;
use crate::utils::errors::WorkloadError;
use std::thread;

/// Spectral norm of the infinite matrix A, truncated to `n`×`n`, by power iteration.
#[derive(Default)]
pub struct SpectralNorm;

fn a(i: usize, j: usize) -> f64 {
    1.0 / (((i + j) * (i + j + 1) / 2 + i + 1) as f64)
}

fn mul_av_rows(v: &[f64], out: &mut [f64], first_row: usize, transpose: bool) {
    for (offset, slot) in out.iter_mut().enumerate() {
        let i = first_row + offset;
        *slot = v
            .iter()
            .enumerate()
            .map(|(j, &vj)| if transpose { a(j, i) } else { a(i, j) } * vj)
            .sum();
    }
}

fn mul_av(v: &[f64], out: &mut [f64], transpose: bool, workers: usize) {
    let rows_per_worker = out.len().div_ceil(workers.max(1)).max(1);
    thread::scope(|scope| {
        for (chunk_index, chunk) in out.chunks_mut(rows_per_worker).enumerate() {
            scope.spawn(move || mul_av_rows(v, chunk, chunk_index * rows_per_worker, transpose));
        }
    });
}

fn mul_atav(v: &[f64], out: &mut [f64], tmp: &mut [f64], workers: usize) {
    mul_av(v, tmp, false, workers);
    mul_av(tmp, out, true, workers);
}

pub fn spectral_norm(n: usize, workers: usize) -> f64 {
    let mut u = vec![1.0; n];
    let mut v = vec![0.0; n];
    let mut tmp = vec![0.0; n];
    for _ in 0..10 {
        mul_atav(&u, &mut v, &mut tmp, workers);
        mul_atav(&v, &mut u, &mut tmp, workers);
    }
    let vbv: f64 = u.iter().zip(&v).map(|(a, b)| a * b).sum();
    let vv: f64 = v.iter().map(|x| x * x).sum();
    (vbv / vv).sqrt()
}

impl ExecutionUnit for SpectralNorm {
    fn name(&self) -> &str {
        "spectralnorm"
    }

    fn description(&self) -> &str {
        "Spectral norm by power iteration (parallel rows)"
    }

    fn effective_size(&self, _requested: usize) -> usize {
        3000
    }

    fn execute(&mut self, n: usize) -> Result<u64, WorkloadError> {
        if n == 0 {
            return Err(WorkloadError::InvalidSize {
                size: n,
                reason: "matrix must not be empty".to_owned(),
            });
        }
        let workers = thread::available_parallelism().map(|w| w.get()).unwrap_or(1);
        Ok((spectral_norm(n, workers) * 1e9) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_value() {
        // 1.274219991 for n = 100
        assert!((spectral_norm(100, 3) - 1.274219991).abs() < 1e-9);
    }
}
