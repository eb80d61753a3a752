use crate::registry::ExecutionUnit;
use crate::utils::errors::WorkloadError;
use std::thread;

const ITERATIONS: u32 = 50;

/// Renders a Mandelbrot bitmap, rows split across worker threads.
#[derive(Default)]
pub struct Mandelbrot;

fn render_row(y: usize, size: usize, out: &mut [u8]) {
    let fac = 2.0 / size as f64;
    let ci = y as f64 * fac - 1.0;
    let mut bits = 0u8;
    for x in 0..size {
        let cr = x as f64 * fac - 1.5;
        let (mut zr, mut zi, mut zr2, mut zi2) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        let mut i = ITERATIONS;
        loop {
            zi = 2.0 * zr * zi + ci;
            zr = zr2 - zi2 + cr;
            zi2 = zi * zi;
            zr2 = zr * zr;
            i -= 1;
            if zi2 + zr2 > 4.0 || i == 0 {
                break;
            }
        }
        bits <<= 1;
        if zi2 + zr2 <= 4.0 {
            bits |= 1;
        }
        if x % 8 == 7 {
            out[x / 8] = bits;
            bits = 0;
        }
    }
    if size % 8 != 0 {
        out[size / 8] = bits << (8 - size % 8);
    }
}

/// Renders the `size`×`size` bitmap using `workers` threads.
pub fn render(size: usize, workers: usize) -> Vec<u8> {
    let row_bytes = size.div_ceil(8);
    let mut bitmap = vec![0u8; row_bytes * size];
    if size == 0 {
        return bitmap;
    }
    let rows_per_worker = size.div_ceil(workers.max(1));
    thread::scope(|scope| {
        for (chunk_index, chunk) in bitmap.chunks_mut(rows_per_worker * row_bytes).enumerate() {
            scope.spawn(move || {
                let first_row = chunk_index * rows_per_worker;
                for (offset, row) in chunk.chunks_mut(row_bytes).enumerate() {
                    render_row(first_row + offset, size, row);
                }
            });
        }
    });
    bitmap
}

impl ExecutionUnit for Mandelbrot {
    fn name(&self) -> &str {
        "mandelbrot"
    }

    fn description(&self) -> &str {
        "Mandelbrot set bitmap (parallel rows)"
    }

    fn effective_size(&self, _requested: usize) -> usize {
        1000
    }

    fn execute(&mut self, size: usize) -> Result<u64, WorkloadError> {
        let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let bitmap = render(size, workers);
        Ok(bitmap.iter().map(|&b| b.count_ones() as u64).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_matches_sequential() {
        assert_eq!(render(200, 1), render(200, 7));
    }

    #[test]
    fn test_reference_bitmap_size_8() {
        let bitmap = render(8, 1);
        assert_eq!(bitmap, vec![0x02, 0x00, 0x0f, 0x2f, 0xff, 0x2f, 0x0f, 0x00]);
        // rows 1..8 are symmetric around the real axis
        assert_eq!(bitmap[1..4], [bitmap[7], bitmap[6], bitmap[5]]);
    }
}
