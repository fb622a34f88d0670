use serde::{Deserialize, Serialize};

/// Optional language capabilities. A processor tier enables a subset of
/// these and the emitter rejects any construct that needs a missing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    /// Float literals.
    Fpu,
    /// Object literals and member access.
    Objects,
    /// Arrays: literals, indexing and indexed assignment.
    DynamicMemory,
    /// User-declared functions.
    CustomFunctions,
}

impl Feature {
    pub const ALL: [Feature; 4] = [
        Feature::Fpu,
        Feature::Objects,
        Feature::DynamicMemory,
        Feature::CustomFunctions,
    ];

    fn bit(self) -> u8 {
        match self {
            Feature::Fpu => 1 << 0,
            Feature::Objects => 1 << 1,
            Feature::DynamicMemory => 1 << 2,
            Feature::CustomFunctions => 1 << 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Feature::Fpu => "fpu",
            Feature::Objects => "objects",
            Feature::DynamicMemory => "memory",
            Feature::CustomFunctions => "functions",
        }
    }

    pub fn from_name(name: &str) -> Option<Feature> {
        Feature::ALL.into_iter().find(|f| f.name() == name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureSet(u8);

impl FeatureSet {
    pub fn empty() -> Self {
        FeatureSet(0)
    }

    pub fn all() -> Self {
        Feature::ALL.into_iter().collect()
    }

    pub fn with(mut self, feature: Feature) -> Self {
        self.0 |= feature.bit();
        self
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.0 & feature.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        Feature::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        iter.into_iter().fold(FeatureSet::empty(), FeatureSet::with)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_set() {
        let set = FeatureSet::empty().with(Feature::Fpu).with(Feature::Objects);
        assert!(set.contains(Feature::Fpu));
        assert!(set.contains(Feature::Objects));
        assert!(!set.contains(Feature::DynamicMemory));
        assert_eq!(set.iter().count(), 2);
        assert_eq!(FeatureSet::all().iter().count(), 4);
    }

    #[test]
    fn test_feature_names() {
        for f in Feature::ALL {
            assert_eq!(Feature::from_name(f.name()), Some(f));
        }
        assert_eq!(Feature::from_name("gpu"), None);
    }
}
