//! Processor models: which language features, limits and builtin modules
//! a robot's program gets.

use serde::{Deserialize, Serialize};

use crate::lang::feature::{Feature, FeatureSet};
use crate::runtime::builtins::{Module, Registry};
use crate::runtime::stdlib;
use crate::runtime::vm::VmConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureTier {
    Bigton1000,
    Bigton2000,
    Bigton3000,
}

impl FeatureTier {
    pub fn features(self) -> FeatureSet {
        match self {
            FeatureTier::Bigton1000 => FeatureSet::empty(),
            FeatureTier::Bigton2000 => FeatureSet::empty()
                .with(Feature::DynamicMemory)
                .with(Feature::CustomFunctions),
            FeatureTier::Bigton3000 => FeatureSet::all(),
        }
    }

    /// Standard modules, in registration order.
    pub fn modules<C: 'static>(self) -> Vec<Module<C>> {
        match self {
            FeatureTier::Bigton1000 => vec![stdlib::standard()],
            FeatureTier::Bigton2000 => vec![stdlib::standard(), stdlib::memory()],
            FeatureTier::Bigton3000 => vec![
                stdlib::standard(),
                stdlib::memory(),
                stdlib::floating_point(),
            ],
        }
    }

    /// Whether memory extension attachments work with this tier.
    pub fn supports_memory_extensions(self) -> bool {
        self != FeatureTier::Bigton1000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStats {
    pub base_memory: usize,
    pub instruction_limit: u64,
    pub max_call_depth: usize,
    pub max_tuple_size: usize,
}

pub const STATS: [ProcessorStats; 5] = [
    ProcessorStats {
        base_memory: 1024,
        instruction_limit: 1000,
        max_call_depth: 32,
        max_tuple_size: 4,
    },
    ProcessorStats {
        base_memory: 1536,
        instruction_limit: 2000,
        max_call_depth: 64,
        max_tuple_size: 6,
    },
    ProcessorStats {
        base_memory: 2048,
        instruction_limit: 3000,
        max_call_depth: 128,
        max_tuple_size: 8,
    },
    ProcessorStats {
        base_memory: 2560,
        instruction_limit: 4000,
        max_call_depth: 256,
        max_tuple_size: 12,
    },
    ProcessorStats {
        base_memory: 3072,
        instruction_limit: 5000,
        max_call_depth: 512,
        max_tuple_size: 16,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessorModel {
    Bigton1030,
    Bigton1050,
    Bigton1070,
    Bigton2030,
    Bigton2050,
    Bigton2070,
    Bigton3030,
    Bigton3050,
    Bigton3070,
}

impl ProcessorModel {
    pub const ALL: [ProcessorModel; 9] = [
        ProcessorModel::Bigton1030,
        ProcessorModel::Bigton1050,
        ProcessorModel::Bigton1070,
        ProcessorModel::Bigton2030,
        ProcessorModel::Bigton2050,
        ProcessorModel::Bigton2070,
        ProcessorModel::Bigton3030,
        ProcessorModel::Bigton3050,
        ProcessorModel::Bigton3070,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProcessorModel::Bigton1030 => "bigton-1030",
            ProcessorModel::Bigton1050 => "bigton-1050",
            ProcessorModel::Bigton1070 => "bigton-1070",
            ProcessorModel::Bigton2030 => "bigton-2030",
            ProcessorModel::Bigton2050 => "bigton-2050",
            ProcessorModel::Bigton2070 => "bigton-2070",
            ProcessorModel::Bigton3030 => "bigton-3030",
            ProcessorModel::Bigton3050 => "bigton-3050",
            ProcessorModel::Bigton3070 => "bigton-3070",
        }
    }

    pub fn from_name(name: &str) -> Option<ProcessorModel> {
        ProcessorModel::ALL.into_iter().find(|m| m.name() == name)
    }

    pub fn tier(self) -> FeatureTier {
        match self {
            ProcessorModel::Bigton1030 | ProcessorModel::Bigton1050 | ProcessorModel::Bigton1070 => {
                FeatureTier::Bigton1000
            }
            ProcessorModel::Bigton2030 | ProcessorModel::Bigton2050 | ProcessorModel::Bigton2070 => {
                FeatureTier::Bigton2000
            }
            ProcessorModel::Bigton3030 | ProcessorModel::Bigton3050 | ProcessorModel::Bigton3070 => {
                FeatureTier::Bigton3000
            }
        }
    }

    pub fn stats(self) -> ProcessorStats {
        let level = match self {
            ProcessorModel::Bigton1030 => 0,
            ProcessorModel::Bigton1050 | ProcessorModel::Bigton2030 => 1,
            ProcessorModel::Bigton1070 | ProcessorModel::Bigton2050 | ProcessorModel::Bigton3030 => 2,
            ProcessorModel::Bigton2070 | ProcessorModel::Bigton3050 => 3,
            ProcessorModel::Bigton3070 => 4,
        };
        STATS[level]
    }
}

/// A processor plus the extra memory granted by attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorProfile {
    pub model: ProcessorModel,
    pub extra_memory: usize,
}

impl ProcessorProfile {
    pub fn new(model: ProcessorModel) -> Self {
        ProcessorProfile {
            model,
            extra_memory: 0,
        }
    }

    /// Adds attachment memory. Ignored by tiers without extension support.
    pub fn with_extra_memory(mut self, bytes: usize) -> Self {
        if self.model.tier().supports_memory_extensions() {
            self.extra_memory += bytes;
        }
        self
    }

    pub fn features(&self) -> FeatureSet {
        self.model.tier().features()
    }

    pub fn vm_config(&self) -> VmConfig {
        let stats = self.model.stats();
        VmConfig {
            instruction_limit: stats.instruction_limit,
            memory_limit: stats.base_memory + self.extra_memory,
            max_call_depth: stats.max_call_depth,
            max_tuple_size: stats.max_tuple_size,
        }
    }

    /// The tier's standard modules followed by `extensions`, which may
    /// replace standard builtins of the same name.
    pub fn registry<C: 'static>(&self, extensions: Vec<Module<C>>) -> Registry<C> {
        self.model
            .tier()
            .modules()
            .into_iter()
            .chain(extensions)
            .fold(Registry::new(), Registry::with_module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::value::Value;

    #[test]
    fn test_models() {
        assert_eq!(ProcessorModel::Bigton1030.stats(), STATS[0]);
        assert_eq!(ProcessorModel::Bigton2070.stats().instruction_limit, 4000);
        assert_eq!(ProcessorModel::Bigton3070.stats().max_tuple_size, 16);
        assert_eq!(ProcessorModel::Bigton2050.tier(), FeatureTier::Bigton2000);
        for model in ProcessorModel::ALL {
            assert_eq!(ProcessorModel::from_name(model.name()), Some(model));
        }
    }

    #[test]
    fn test_default_config_is_lowest_model() {
        assert_eq!(
            ProcessorProfile::new(ProcessorModel::Bigton1030).vm_config(),
            VmConfig::default()
        );
    }

    #[test]
    fn test_features() {
        let low = ProcessorProfile::new(ProcessorModel::Bigton1050).features();
        assert_eq!(low, FeatureSet::empty());
        let mid = ProcessorProfile::new(ProcessorModel::Bigton2030).features();
        assert!(mid.contains(Feature::CustomFunctions));
        assert!(!mid.contains(Feature::Fpu));
        assert_eq!(ProcessorProfile::new(ProcessorModel::Bigton3030).features(), FeatureSet::all());
    }

    #[test]
    fn test_extra_memory() {
        let low = ProcessorProfile::new(ProcessorModel::Bigton1030).with_extra_memory(2048);
        assert_eq!(low.vm_config().memory_limit, 1024);
        let high = ProcessorProfile::new(ProcessorModel::Bigton3050)
            .with_extra_memory(2048)
            .with_extra_memory(512);
        assert_eq!(high.vm_config().memory_limit, 2560 + 2560);
    }

    #[test]
    fn test_registry() {
        let profile = ProcessorProfile::new(ProcessorModel::Bigton2050);
        let registry: Registry<()> = profile.registry(vec![
            Module::new("override").with_function("print", 1, 99, |_, _, _| Ok(Value::Null)),
        ]);
        let table = registry.signatures();
        assert!(table.find("push").is_some());
        assert!(table.find("sqrt").is_none());
        let (id, print) = table.find("print").expect("print");
        assert_eq!((id, print.cost), (0, 99));
    }
}
