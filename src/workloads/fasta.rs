use crate::registry::ExecutionUnit;
use crate::utils::errors::WorkloadError;

const LINE_LENGTH: usize = 60;
const IM: u32 = 139_968;
const IA: u32 = 3_877;
const IC: u32 = 29_573;

const ALU: &[u8] = b"GGCCGGGCGCGGTGGCTCACGCCTGTAATCCCAGCACTTTGG\
GAGGCCGAGGCGGGCGGATCACCTGAGGTCAGGAGTTCGAGA\
CCAGCCTGGCCAACATGGTGAAACCCCGTCTCTACTAAAAAT\
ACAAAAATTAGCCGGGCGTGGTGGCGCGCGCCTGTAATCCCA\
GCTACTCGGGAGGCTGAGGCAGGAGAATCGCTTGAACCCGGG\
AGGCGGAGGTTGCAGTGAGCCGAGATCGCGCCACTGCACTCC\
AGCCTGGGCGACAGAGCGAGACTCCGTCTCAAAAA";

const IUB: &[(u8, f64)] = &[
    (b'a', 0.27),
    (b'c', 0.12),
    (b'g', 0.12),
    (b't', 0.27),
    (b'B', 0.02),
    (b'D', 0.02),
    (b'H', 0.02),
    (b'K', 0.02),
    (b'M', 0.02),
    (b'N', 0.02),
    (b'R', 0.02),
    (b'S', 0.02),
    (b'V', 0.02),
    (b'W', 0.02),
    (b'Y', 0.02),
];

const HOMO_SAPIENS: &[(u8, f64)] = &[
    (b'a', 0.302_954_942_668_040_1),
    (b'c', 0.197_988_748_186_240_1),
    (b'g', 0.197_547_194_184_278_5),
    (b't', 0.301_509_114_961_441_3),
];

/// Linear congruential generator shared by every fasta section.
pub struct FastaRandom {
    last: u32,
}

impl FastaRandom {
    pub fn new() -> Self {
        Self { last: 42 }
    }

    fn next(&mut self) -> f64 {
        self.last = (self.last * IA + IC) % IM;
        self.last as f64 / IM as f64
    }
}

impl Default for FastaRandom {
    fn default() -> Self {
        Self::new()
    }
}

fn cumulative(table: &[(u8, f64)]) -> Vec<(u8, f64)> {
    let mut acc = 0.0;
    table
        .iter()
        .map(|&(c, p)| {
            acc += p;
            (c, acc)
        })
        .collect()
}

fn write_repeat(out: &mut Vec<u8>, header: &str, source: &[u8], n: usize) {
    out.extend_from_slice(header.as_bytes());
    let mut pos = 0;
    let mut remaining = n;
    while remaining > 0 {
        let line = remaining.min(LINE_LENGTH);
        for _ in 0..line {
            out.push(source[pos]);
            pos = (pos + 1) % source.len();
        }
        out.push(b'\n');
        remaining -= line;
    }
}

fn write_random(out: &mut Vec<u8>, header: &str, table: &[(u8, f64)], n: usize, rng: &mut FastaRandom) {
    out.extend_from_slice(header.as_bytes());
    let table = cumulative(table);
    let mut remaining = n;
    while remaining > 0 {
        let line = remaining.min(LINE_LENGTH);
        for _ in 0..line {
            let r = rng.next();
            let c = table
                .iter()
                .find(|&&(_, p)| r < p)
                .map(|&(c, _)| c)
                .unwrap_or(table[table.len() - 1].0);
            out.push(c);
        }
        out.push(b'\n');
        remaining -= line;
    }
}

/// Renders the three sections of the fasta output for `n` base pairs.
pub fn generate(n: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(n * 10 + n * 10 / LINE_LENGTH + 128);
    let mut rng = FastaRandom::new();
    write_repeat(&mut out, ">ONE Homo sapiens alu\n", ALU, n * 2);
    write_random(&mut out, ">TWO IUB ambiguity codes\n", IUB, n * 3, &mut rng);
    write_random(&mut out, ">THREE Homo sapiens frequency\n", HOMO_SAPIENS, n * 5, &mut rng);
    out
}

/// DNA sequence generation.
#[derive(Default)]
pub struct Fasta;

impl ExecutionUnit for Fasta {
    fn name(&self) -> &str {
        "fasta"
    }

    fn description(&self) -> &str {
        "DNA sequence generation"
    }

    fn effective_size(&self, _requested: usize) -> usize {
        2_500_000
    }

    fn execute(&mut self, size: usize) -> Result<u64, WorkloadError> {
        let out = generate(size);
        Ok(out
            .iter()
            .fold(out.len() as u64, |acc, &b| acc.wrapping_mul(131).wrapping_add(b as u64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_prefix() {
        let out = generate(10);
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(">ONE Homo sapiens alu"));
        assert_eq!(lines.next(), Some(&"GGCCGGGCGCGGTGGCTCACGCCTGTAATCCCAGCACTTTGG"[..20]));
        assert_eq!(lines.next(), Some(">TWO IUB ambiguity codes"));
        // first IUB line of the reference output for n = 10
        assert_eq!(lines.next(), Some(&"cttBtatcatatgctaKggNcataaaSatgtaaaDcDRtBggDtctttataattcBgtcg"[..30]));
    }

    #[test]
    fn test_line_lengths() {
        let out = generate(1000);
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().filter(|l| !l.starts_with('>')).all(|l| l.len() <= LINE_LENGTH));
    }
}
