use crate::registry::ExecutionUnit;
use crate::utils::errors::WorkloadError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SEED: u64 = 123;

/// Sorts a copy of a seeded random array with one of the classic algorithms.
pub struct SortBenchmark {
    name: &'static str,
    description: &'static str,
    algorithm: fn(&mut [i32]),
    data: Vec<i32>,
}

impl SortBenchmark {
    pub fn bubble() -> Self {
        Self::new("bubble_sort", "BubbleSort algorithm", bubble_sort)
    }

    pub fn merge() -> Self {
        Self::new("merge_sort", "MergeSort algorithm", merge_sort)
    }

    pub fn quick() -> Self {
        Self::new("quick_sort", "QuickSort algorithm", quick_sort)
    }

    fn new(name: &'static str, description: &'static str, algorithm: fn(&mut [i32])) -> Self {
        Self {
            name,
            description,
            algorithm,
            data: Vec::new(),
        }
    }
}

impl ExecutionUnit for SortBenchmark {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn setup(&mut self, size: usize) -> Result<(), WorkloadError> {
        let mut rng = StdRng::seed_from_u64(SEED);
        self.data = (0..size).map(|_| rng.r#gen()).collect();
        Ok(())
    }

    fn execute(&mut self, size: usize) -> Result<u64, WorkloadError> {
        if self.data.len() != size {
            return Err(WorkloadError::InvalidSize {
                size,
                reason: format!("setup prepared {} elements", self.data.len()),
            });
        }
        let mut copy = self.data.clone();
        (self.algorithm)(&mut copy);
        let checksum = copy
            .iter()
            .step_by((size / 16).max(1))
            .fold(0u64, |acc, &v| acc.wrapping_mul(31).wrapping_add(v as u32 as u64));
        Ok(checksum)
    }
}

pub fn bubble_sort(data: &mut [i32]) {
    let n = data.len();
    for i in 0..n {
        let mut swapped = false;
        for j in 0..n - 1 - i {
            if data[j] > data[j + 1] {
                data.swap(j, j + 1);
                swapped = true;
            }
        }
        if !swapped {
            break;
        }
    }
}

pub fn merge_sort(data: &mut [i32]) {
    let mut buffer = data.to_vec();
    merge_sort_into(data, &mut buffer);
}

fn merge_sort_into(data: &mut [i32], buffer: &mut [i32]) {
    let n = data.len();
    if n < 2 {
        return;
    }
    let mid = n / 2;
    merge_sort_into(&mut data[..mid], &mut buffer[..mid]);
    merge_sort_into(&mut data[mid..], &mut buffer[mid..]);

    let (mut i, mut j) = (0, mid);
    for slot in buffer.iter_mut().take(n) {
        if j >= n || (i < mid && data[i] <= data[j]) {
            *slot = data[i];
            i += 1;
        } else {
            *slot = data[j];
            j += 1;
        }
    }
    data.copy_from_slice(&buffer[..n]);
}

pub fn quick_sort(data: &mut [i32]) {
    if data.len() < 2 {
        return;
    }
    let pivot = partition(data);
    let (left, right) = data.split_at_mut(pivot);
    quick_sort(left);
    quick_sort(&mut right[1..]);
}

// Lomuto partition around the median of first, middle and last.
fn partition(data: &mut [i32]) -> usize {
    let last = data.len() - 1;
    let mid = last / 2;
    if data[mid] < data[0] {
        data.swap(mid, 0);
    }
    if data[last] < data[0] {
        data.swap(last, 0);
    }
    if data[mid] < data[last] {
        data.swap(mid, last);
    }
    let pivot = data[last];
    let mut store = 0;
    for i in 0..last {
        if data[i] < pivot {
            data.swap(i, store);
            store += 1;
        }
    }
    data.swap(store, last);
    store
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_sorts(algorithm: fn(&mut [i32])) {
        let mut rng = StdRng::seed_from_u64(5);
        for len in [0usize, 1, 2, 3, 17, 256, 1000] {
            let mut data: Vec<i32> = (0..len).map(|_| rng.gen_range(-50..50)).collect();
            let mut expected = data.clone();
            expected.sort();
            algorithm(&mut data);
            assert_eq!(data, expected, "len {len}");
        }
    }

    #[test]
    fn test_algorithms_sort() {
        assert_sorts(bubble_sort);
        assert_sorts(merge_sort);
        assert_sorts(quick_sort);
    }

    #[test]
    fn test_execute_requires_setup() {
        let mut unit = SortBenchmark::quick();
        assert!(unit.execute(10).is_err());
        unit.setup(10).unwrap();
        let a = unit.execute(10).unwrap();
        unit.setup(10).unwrap();
        assert_eq!(unit.execute(10).unwrap(), a);
    }
}
