//! Compiled-in catalog of workloads.
//!
//! Every unit is CPU-bound and self-contained. `mandelbrot` and `spectralnorm` fan out over
//! scoped threads inside `execute`, which the runner treats as opaque.

pub mod binarytrees;
pub mod fannkuch;
pub mod fasta;
pub mod knucleotide;
pub mod mandelbrot;
pub mod nbody;
pub mod sorting;
pub mod spectralnorm;

use crate::registry::BenchmarkRegistry;

pub use binarytrees::BinaryTrees;
pub use fannkuch::FannkuchRedux;
pub use fasta::Fasta;
pub use knucleotide::KNucleotide;
pub use mandelbrot::Mandelbrot;
pub use nbody::NBody;
pub use sorting::SortBenchmark;
pub use spectralnorm::SpectralNorm;

/// Registers the default catalog. Sorting units are available but disabled unless selected.
pub fn register_defaults(registry: &mut BenchmarkRegistry) {
    registry.register(Box::new(SortBenchmark::bubble()), false);
    registry.register(Box::new(SortBenchmark::merge()), false);
    registry.register(Box::new(SortBenchmark::quick()), false);

    registry.register(Box::new(BinaryTrees), true);
    registry.register(Box::new(FannkuchRedux), true);
    registry.register(Box::new(Fasta), true);
    registry.register(Box::new(KNucleotide::default()), true);
    registry.register(Box::new(Mandelbrot), true);
    registry.register(Box::new(NBody), true);
    registry.register(Box::new(SpectralNorm), true);
}

/// Builds a registry holding the default catalog.
pub fn default_registry() -> BenchmarkRegistry {
    let mut registry = BenchmarkRegistry::new();
    registry.initialize(register_defaults);
    registry
}
