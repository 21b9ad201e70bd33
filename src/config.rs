//! Implements the mutation session configuration builder.

use time::OffsetDateTime;

use crate::model::DataModel;

/// Maximum size of a serialized model, in bytes, used when none is configured.
pub const DEFAULT_MAX_OUTPUT_SIZE: u64 = 1024;

/// Structure that contains the different configuration options of a mutation session.
///
/// # Example
///
/// ```
/// use structmut::config::Config;
///
/// let config = Config::builder()
///     .seed(0xdeadbeef)              // The random generator is initialized with the seed
///                                    // 0xdeadbeef.
///     .max_output_size(Some(4096))   // Mutated models never exceed 4096 bytes.
///     .exclude(&["StringStatic"])    // Never instantiates `StringStatic`.
///     .build();
///
/// assert!(config.mutator_enabled("StringCaseLower"));
/// assert!(!config.mutator_enabled("StringStatic"));
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Seed used for random generation.
    pub(crate) seed: u64,
    /// Maximum size in bytes of a serialized model. Unbounded if set to `None`.
    pub(crate) max_output_size: Option<u64>,
    /// Only these mutators are instantiated, if set.
    pub(crate) include: Option<Vec<String>>,
    /// These mutators are never instantiated.
    pub(crate) exclude: Vec<String>,
    /// Logs a hexdump of every mutated model if set to `true`.
    pub(crate) trace_mutations: bool,
}

impl Config {
    /// Creates a new builder instance for the session's configuration.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn max_output_size(&self) -> Option<u64> {
        self.max_output_size
    }

    pub fn trace_mutations(&self) -> bool {
        self.trace_mutations
    }

    /// Returns `true` if the mutator named `name` passes the include and exclude filters.
    pub fn mutator_enabled(&self, name: &str) -> bool {
        let included = self
            .include
            .as_ref()
            .map(|i| i.iter().any(|n| n == name))
            .unwrap_or(true);
        included && !self.exclude.iter().any(|n| n == name)
    }

    /// Installs the session's output bound on a model.
    pub fn apply(&self, model: &mut DataModel) {
        model.set_max_output_size(self.max_output_size);
    }
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}

/// Configuration builder.
pub struct ConfigBuilder {
    /// The inner configuration object.
    config: Config,
}

impl ConfigBuilder {
    /// Creates a new configuration builder.
    fn new() -> Self {
        Self {
            config: Config {
                seed: (OffsetDateTime::now_utc().nanosecond() as u64) | 1,
                max_output_size: Some(DEFAULT_MAX_OUTPUT_SIZE),
                include: None,
                exclude: vec![],
                trace_mutations: false,
            },
        }
    }

    /// Returns the [`Config`] object built with the current [`ConfigBuilder`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Sets the seed used for random generation.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Sets the maximum size of a serialized model.
    pub fn max_output_size(mut self, max_output_size: Option<u64>) -> Self {
        self.config.max_output_size = max_output_size;
        self
    }

    /// Restricts the session to the mutators named in `names`.
    pub fn include(mut self, names: &[&str]) -> Self {
        self.config.include = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Excludes the mutators named in `names` from the session.
    pub fn exclude(mut self, names: &[&str]) -> Self {
        self.config
            .exclude
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Enables the hexdump logging of mutated models.
    pub fn trace_mutations(mut self, trace_mutations: bool) -> Self {
        self.config.trace_mutations = trace_mutations;
        self
    }
}

// -----------------------------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_filters() {
        let config = Config::builder()
            .include(&["A", "B"])
            .exclude(&["B"])
            .build();
        assert!(config.mutator_enabled("A"));
        assert!(!config.mutator_enabled("B"));
        assert!(!config.mutator_enabled("C"));
        assert!(Config::default().mutator_enabled("C"));
    }

    #[test]
    fn config_apply() {
        let mut dm = DataModel::new("Root");
        Config::default().apply(&mut dm);
        assert_eq!(dm.max_output_size(), Some(DEFAULT_MAX_OUTPUT_SIZE));
        Config::builder()
            .max_output_size(None)
            .build()
            .apply(&mut dm);
        assert_eq!(dm.max_output_size(), None);
        assert_ne!(Config::default().seed(), 0);
    }
}
