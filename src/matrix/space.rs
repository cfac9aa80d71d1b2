//! Cartesian enumeration of the configuration space

use super::{
    BakeDefinition, CacheSource, Configuration, ConfigurationFields, ContextLocation,
    FieldDomain, IgnoreVariant, Location, Multiplicity,
};
use serde::{Deserialize, Serialize};

/// Values each field may take during enumeration.
///
/// An empty list means "the full domain" so a partially filled override
/// table only narrows the fields it names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Domains {
    pub bake_definition: Vec<BakeDefinition>,
    pub bake_location: Vec<Location>,
    pub build_file_count: Vec<Multiplicity>,
    pub build_file_location: Vec<Location>,
    pub target_count: Vec<Multiplicity>,
    pub ignore_variant: Vec<IgnoreVariant>,
    pub context_location: Vec<ContextLocation>,
    pub cache_source: Vec<CacheSource>,
}

impl Domains {
    /// Overlay non-empty lists from `other` on top of `self`
    pub fn overridden_by(mut self, other: &Domains) -> Self {
        overlay(&mut self.bake_definition, &other.bake_definition);
        overlay(&mut self.bake_location, &other.bake_location);
        overlay(&mut self.build_file_count, &other.build_file_count);
        overlay(&mut self.build_file_location, &other.build_file_location);
        overlay(&mut self.target_count, &other.target_count);
        overlay(&mut self.ignore_variant, &other.ignore_variant);
        overlay(&mut self.context_location, &other.context_location);
        overlay(&mut self.cache_source, &other.cache_source);
        self
    }
}

fn overlay<T: Clone>(base: &mut Vec<T>, other: &[T]) {
    if !other.is_empty() {
        *base = other.to_vec();
    }
}

/// Requested values for a field, deduplicated, falling back to the full domain.
///
/// Order follows the field's declaration order, not the order given by the
/// caller, so run numbering is stable across equivalent overrides.
fn resolve<T: FieldDomain + PartialEq>(requested: &[T]) -> Vec<T> {
    if requested.is_empty() {
        return T::ALL.to_vec();
    }
    T::ALL
        .iter()
        .copied()
        .filter(|v| requested.contains(v))
        .collect()
}

/// Enumerate every valid configuration, in a fixed field order
pub fn enumerate(domains: &Domains) -> Vec<Configuration> {
    let bake_definitions = resolve(&domains.bake_definition);
    let bake_locations = resolve(&domains.bake_location);
    let build_file_counts = resolve(&domains.build_file_count);
    let build_file_locations = resolve(&domains.build_file_location);
    let target_counts = resolve(&domains.target_count);
    let ignore_variants = resolve(&domains.ignore_variant);
    let context_locations = resolve(&domains.context_location);
    let cache_sources = resolve(&domains.cache_source);

    let mut configurations = Vec::new();
    for &bake_definition in &bake_definitions {
        for &bake_location in &bake_locations {
            for &build_file_count in &build_file_counts {
                for &build_file_location in &build_file_locations {
                    for &target_count in &target_counts {
                        for &ignore_variant in &ignore_variants {
                            for &context_location in &context_locations {
                                for &cache_source in &cache_sources {
                                    let fields = ConfigurationFields {
                                        bake_definition,
                                        bake_location,
                                        build_file_count,
                                        build_file_location,
                                        target_count,
                                        ignore_variant,
                                        context_location,
                                        cache_source,
                                    };
                                    // Pruned tuples are simply skipped
                                    if let Ok(config) = Configuration::new(fields) {
                                        configurations.push(config);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    configurations
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn full_space_size() {
        // without bake: 2 bake locations * 2 build file locations
        //   * 2 ignore variants * 2 contexts * 2 cache sources = 32
        // with bake: 2 definitions * 2 * 2 * 2 * 2 * 3 * 1 * 2 = 192
        let all = enumerate(&Domains::default());
        assert_eq!(all.len(), 224);
    }

    #[test]
    fn no_duplicates() {
        let all = enumerate(&Domains::default());
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn no_pruned_tuple_survives() {
        for config in enumerate(&Domains::default()) {
            if config.bake_definition() == BakeDefinition::None {
                assert_eq!(config.build_file_count(), Multiplicity::Single);
                assert_eq!(config.target_count(), Multiplicity::Single);
                assert_ne!(config.ignore_variant(), IgnoreVariant::Multiple);
            } else {
                assert_eq!(config.context_location(), ContextLocation::Cwd);
            }
        }
    }

    #[test]
    fn every_valid_tuple_is_present() {
        let all: HashSet<_> = enumerate(&Domains::default()).into_iter().collect();
        let mut valid = 0;
        for &bake_definition in BakeDefinition::ALL {
            for &build_file_count in Multiplicity::ALL {
                for &target_count in Multiplicity::ALL {
                    for &ignore_variant in IgnoreVariant::ALL {
                        for &context_location in ContextLocation::ALL {
                            let fields = ConfigurationFields {
                                bake_definition,
                                bake_location: Location::Subdir,
                                build_file_count,
                                build_file_location: Location::Root,
                                target_count,
                                ignore_variant,
                                context_location,
                                cache_source: CacheSource::Memory,
                            };
                            if let Ok(config) = Configuration::new(fields) {
                                assert!(all.contains(&config), "missing {}", config);
                                valid += 1;
                            }
                        }
                    }
                }
            }
        }
        assert_eq!(valid, 4 + 2 * 2 * 2 * 3);
    }

    #[test]
    fn enumeration_is_deterministic() {
        assert_eq!(
            enumerate(&Domains::default()),
            enumerate(&Domains::default())
        );
    }

    #[test]
    fn overrides_narrow_the_space() {
        let domains = Domains {
            bake_definition: vec![BakeDefinition::None],
            bake_location: vec![Location::Root],
            build_file_location: vec![Location::Root],
            ignore_variant: vec![IgnoreVariant::Single],
            context_location: vec![ContextLocation::Cwd],
            cache_source: vec![CacheSource::Disk],
            ..Domains::default()
        };
        let all = enumerate(&domains);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].build_file_count(), Multiplicity::Single);
    }

    #[test]
    fn override_order_does_not_change_numbering() {
        let forward = Domains {
            cache_source: vec![CacheSource::Disk, CacheSource::Memory],
            ..Domains::default()
        };
        let backward = Domains {
            cache_source: vec![CacheSource::Memory, CacheSource::Disk, CacheSource::Memory],
            ..Domains::default()
        };
        assert_eq!(enumerate(&forward), enumerate(&backward));
    }

    #[test]
    fn overlay_keeps_unnamed_fields() {
        let base = Domains {
            cache_source: vec![CacheSource::Memory],
            target_count: vec![Multiplicity::Single],
            ..Domains::default()
        };
        let cli = Domains {
            cache_source: vec![CacheSource::Disk],
            ..Domains::default()
        };
        let merged = base.overridden_by(&cli);
        assert_eq!(merged.cache_source, vec![CacheSource::Disk]);
        assert_eq!(merged.target_count, vec![Multiplicity::Single]);
    }
}
