use crate::registry::ExecutionUnit;
use crate::utils::errors::WorkloadError;
use crate::workloads::fasta;
use std::collections::HashMap;

const PATTERNS: [&str; 5] = ["GGT", "GGTA", "GGTATT", "GGTATTTTAATT", "GGTATTTTAATTTATAGT"];

/// K-mer counting with hash tables over the third section of a fasta sequence.
#[derive(Default)]
pub struct KNucleotide {
    sequence: Vec<u8>,
    prepared_for: usize,
}

fn count_kmers(sequence: &[u8], k: usize) -> HashMap<&[u8], u32> {
    let mut counts = HashMap::new();
    for window in sequence.windows(k) {
        *counts.entry(window).or_insert(0) += 1;
    }
    counts
}

/// Extracts the `>THREE` section as uppercase nucleotides.
pub fn three_section(fasta_output: &[u8]) -> Vec<u8> {
    let mut sequence = Vec::new();
    let mut in_three = false;
    for line in fasta_output.split(|&b| b == b'\n') {
        if line.starts_with(b">") {
            in_three = line.starts_with(b">THREE");
            continue;
        }
        if in_three {
            sequence.extend(line.iter().map(u8::to_ascii_uppercase));
        }
    }
    sequence
}

impl ExecutionUnit for KNucleotide {
    fn name(&self) -> &str {
        "knucleotide"
    }

    fn description(&self) -> &str {
        "DNA sequence analysis with hashtables"
    }

    fn effective_size(&self, _requested: usize) -> usize {
        250_000
    }

    fn setup(&mut self, size: usize) -> Result<(), WorkloadError> {
        if self.prepared_for != size || self.sequence.is_empty() {
            self.sequence = three_section(&fasta::generate(size));
            self.prepared_for = size;
        }
        Ok(())
    }

    fn execute(&mut self, size: usize) -> Result<u64, WorkloadError> {
        if self.prepared_for != size || self.sequence.is_empty() {
            return Err(WorkloadError::InvalidSize {
                size,
                reason: "setup has not prepared a sequence of this size".to_owned(),
            });
        }

        let mut checksum = 0u64;
        for k in 1..=2 {
            let counts = count_kmers(&self.sequence, k);
            checksum = checksum.wrapping_add(counts.len() as u64 * 1_000);
            checksum = checksum.wrapping_add(counts.values().map(|&c| c as u64).max().unwrap_or(0));
        }
        for pattern in PATTERNS {
            let counts = count_kmers(&self.sequence, pattern.len());
            let found = counts.get(pattern.as_bytes()).copied().unwrap_or(0);
            checksum = checksum.wrapping_mul(31).wrapping_add(found as u64);
        }
        Ok(checksum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_kmers() {
        let counts = count_kmers(b"GGTGGT", 3);
        assert_eq!(counts.get(&b"GGT"[..]), Some(&2));
        assert_eq!(counts.get(&b"GTG"[..]), Some(&1));
    }

    #[test]
    fn test_three_section_is_uppercase() {
        let seq = three_section(&fasta::generate(100));
        assert_eq!(seq.len(), 500);
        assert!(seq.iter().all(|b| b"ACGT".contains(b)));
    }

    #[test]
    fn test_execute_after_setup() {
        let mut unit = KNucleotide::default();
        assert!(unit.execute(1000).is_err());
        unit.setup(1000).unwrap();
        assert!(unit.execute(1000).is_ok());
    }
}
