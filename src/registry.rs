use crate::utils::errors::WorkloadError;
use itertools::Itertools;
use log::info;
use std::collections::{BTreeMap, BTreeSet};

/// A unit of work whose energy is measured.
///
/// `setup` runs before every invocation and is neither timed nor metered; `execute` is the
/// measured region. Implementations may fan out over several threads inside `execute`: the
/// runner still executes exactly one unit at a time.
pub trait ExecutionUnit: Send {
    /// Unique key in the registry.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        self.name()
    }

    /// Maps the size requested by the operator to the size this workload actually uses.
    fn effective_size(&self, requested: usize) -> usize {
        requested
    }

    fn setup(&mut self, _size: usize) -> Result<(), WorkloadError> {
        Ok(())
    }

    /// Runs the workload and returns a checksum of its result.
    fn execute(&mut self, size: usize) -> Result<u64, WorkloadError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkDescriptor {
    pub name: String,
    pub description: String,
    pub enabled_by_default: bool,
}

struct RegisteredUnit {
    unit: Box<dyn ExecutionUnit>,
    enabled_by_default: bool,
}

/// Catalog of execution units and the subset currently selected for a run.
#[derive(Default)]
pub struct BenchmarkRegistry {
    units: BTreeMap<String, RegisteredUnit>,
    selection: BTreeSet<String>,
    initialized: bool,
}

impl BenchmarkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `init` the first time only. Returns whether it ran.
    pub fn initialize(&mut self, init: impl FnOnce(&mut Self)) -> bool {
        if self.initialized {
            return false;
        }
        init(self);
        self.initialized = true;
        info!("Registered benchmarks: {}", self.names().iter().join(", "));
        info!("Enabled benchmarks: {}", self.selected().iter().join(", "));
        true
    }

    /// Adds `unit` under its name. A second registration of the same name replaces the first,
    /// including its default-enabled state.
    pub fn register(&mut self, unit: Box<dyn ExecutionUnit>, enabled_by_default: bool) {
        let name = unit.name().to_owned();
        if enabled_by_default {
            self.selection.insert(name.clone());
        } else {
            self.selection.remove(&name);
        }
        self.units.insert(name, RegisteredUnit {
            unit,
            enabled_by_default,
        });
    }

    /// Enables a registered name. Unknown names are ignored and `false` is returned.
    pub fn enable(&mut self, name: &str) -> bool {
        if self.units.contains_key(name) {
            self.selection.insert(name.to_owned());
            true
        } else {
            false
        }
    }

    pub fn disable(&mut self, name: &str) {
        self.selection.remove(name);
    }

    pub fn enable_all(&mut self) {
        self.selection = self.units.keys().cloned().collect();
    }

    pub fn disable_all(&mut self) {
        self.selection.clear();
    }

    /// Replaces the selection with every registered name starting with one of `prefixes`.
    pub fn enable_only<S: AsRef<str>>(&mut self, prefixes: &[S]) {
        self.selection = self
            .units
            .keys()
            .filter(|name| prefixes.iter().any(|p| name.starts_with(p.as_ref())))
            .cloned()
            .collect();
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.selection.contains(name)
    }

    /// Selected names in lexicographic order.
    pub fn selected(&self) -> Vec<String> {
        self.selection.iter().cloned().collect()
    }

    /// All registered names in lexicographic order.
    pub fn names(&self) -> Vec<String> {
        self.units.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn descriptor(&self, name: &str) -> Option<BenchmarkDescriptor> {
        self.units.get(name).map(|r| BenchmarkDescriptor {
            name: name.to_owned(),
            description: r.unit.description().to_owned(),
            enabled_by_default: r.enabled_by_default,
        })
    }

    pub fn unit_mut(&mut self, name: &str) -> Option<&mut (dyn ExecutionUnit + 'static)> {
        self.units.get_mut(name).map(|r| r.unit.as_mut())
    }
}

/// Splits a comma-separated list of names or prefixes. Blank items are dropped.
pub fn parse_filter(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Unit returning a fixed checksum, used across the crate's tests.
    pub struct FixedUnit {
        name: String,
        pub checksum: u64,
    }

    impl FixedUnit {
        pub fn boxed(name: &str, checksum: u64) -> Box<dyn ExecutionUnit> {
            Box::new(Self {
                name: name.to_owned(),
                checksum,
            })
        }
    }

    impl ExecutionUnit for FixedUnit {
        fn name(&self) -> &str {
            &self.name
        }

        fn execute(&mut self, _size: usize) -> Result<u64, WorkloadError> {
            Ok(self.checksum)
        }
    }

    fn registry_with(names: &[(&str, bool)]) -> BenchmarkRegistry {
        let mut registry = BenchmarkRegistry::new();
        for (i, (name, enabled)) in names.iter().enumerate() {
            registry.register(FixedUnit::boxed(name, i as u64), *enabled);
        }
        registry
    }

    #[test]
    fn test_enable_only_prefix() {
        let mut registry = registry_with(&[("nbody_v5", false), ("mandelbrot_v1", true), ("nbody_v1", false)]);
        registry.enable_only(&["nbody"]);
        assert_eq!(registry.selected(), vec!["nbody_v1".to_owned(), "nbody_v5".to_owned()]);
    }

    #[test]
    fn test_enable_only_exact_and_multiple_prefixes() {
        let mut registry = registry_with(&[("fasta", true), ("fasta_v2", true), ("quick_sort", false), ("merge_sort", false)]);
        registry.enable_only(&["fasta_v2", "quick"]);
        assert_eq!(registry.selected(), vec!["fasta_v2".to_owned(), "quick_sort".to_owned()]);
    }

    #[test]
    fn test_enable_only_no_match_is_empty() {
        let mut registry = registry_with(&[("fasta", true)]);
        registry.enable_only(&["zzz"]);
        assert!(registry.selected().is_empty());
    }

    #[test]
    fn test_selection_is_lexicographic_regardless_of_registration_order() {
        let registry = registry_with(&[("spectralnorm", true), ("binarytrees", true), ("mandelbrot", true)]);
        assert_eq!(
            registry.selected(),
            vec!["binarytrees".to_owned(), "mandelbrot".to_owned(), "spectralnorm".to_owned()]
        );
    }

    #[test]
    fn test_reregistration_overwrites_silently() {
        let mut registry = registry_with(&[("nbody", true)]);
        registry.register(FixedUnit::boxed("nbody", 99), false);
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_enabled("nbody"));
        assert_eq!(registry.unit_mut("nbody").unwrap().execute(1).unwrap(), 99);
        assert!(!registry.descriptor("nbody").unwrap().enabled_by_default);
    }

    #[test]
    fn test_enable_disable() {
        let mut registry = registry_with(&[("a", false), ("b", false)]);
        assert!(registry.enable("a"));
        assert!(!registry.enable("unknown"));
        assert_eq!(registry.selected(), vec!["a".to_owned()]);
        registry.enable_all();
        assert_eq!(registry.selected().len(), 2);
        registry.disable("a");
        assert_eq!(registry.selected(), vec!["b".to_owned()]);
        registry.disable_all();
        assert!(registry.selected().is_empty());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut registry = BenchmarkRegistry::new();
        let init = |r: &mut BenchmarkRegistry| {
            r.register(FixedUnit::boxed("a", 1), true);
            r.register(FixedUnit::boxed("b", 2), false);
        };
        assert!(registry.initialize(init));
        registry.enable_only(&["b"]);
        assert!(!registry.initialize(init));
        assert_eq!(registry.selected(), vec!["b".to_owned()]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(parse_filter(" nbody, fasta_v2 ,,"), vec!["nbody".to_owned(), "fasta_v2".to_owned()]);
        assert!(parse_filter("").is_empty());
    }
}
