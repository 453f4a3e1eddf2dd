// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::BTreeMap;

use crate::contract::StepContract;
use crate::errors::StepContractViolation;

/// Known step contracts keyed by name, with a reverse index from document type
/// to the contracts producing it.
///
/// Both maps are ordered so that resolution is deterministic.
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    contracts: BTreeMap<String, StepContract>,
    producers: BTreeMap<String, Vec<String>>,
    origins: BTreeMap<String, String>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a contract; `origin` names where it came from for error messages.
    pub fn register(
        &mut self,
        contract: StepContract,
        origin: impl Into<String>,
    ) -> Result<(), StepContractViolation> {
        let origin = origin.into();
        if let Some(first) = self.origins.get(&contract.name) {
            return Err(StepContractViolation::DuplicateName {
                name: contract.name.clone(),
                first: first.clone(),
                second: origin,
            });
        }

        for doc_type in &contract.produced_types {
            self.producers
                .entry(doc_type.clone())
                .or_default()
                .push(contract.name.clone());
        }
        self.origins.insert(contract.name.clone(), origin);
        self.contracts.insert(contract.name.clone(), contract);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&StepContract> {
        self.contracts.get(name)
    }

    /// Names of the contracts producing `doc_type`, sorted.
    pub fn producers_of(&self, doc_type: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .producers
            .get(doc_type)
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    pub fn origin_of(&self, name: &str) -> Option<&str> {
        self.origins.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepContract> {
        self.contracts.values()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

/// Test shorthand; a duplicate name is a bug in the test itself.
#[cfg(test)]
impl FromIterator<StepContract> for ContractRegistry {
    fn from_iter<T: IntoIterator<Item = StepContract>>(iter: T) -> Self {
        let mut registry = ContractRegistry::new();
        for contract in iter {
            let origin = format!("builtin:{}", contract.name);
            registry.register(contract, origin).unwrap();
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_index_lists_all_producers() {
        let registry: ContractRegistry = vec![
            StepContract::new("pbs_activities", 10).produces(["activities.json"]),
            StepContract::new("sge_activities", 10).produces(["activities.json"]),
            StepContract::new("compute", 10).produces(["compute.json"]),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            registry.producers_of("activities.json"),
            vec!["pbs_activities", "sge_activities"]
        );
        assert_eq!(registry.producers_of("compute.json"), vec!["compute"]);
        assert!(registry.producers_of("nothing").is_empty());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ContractRegistry::new();
        registry
            .register(StepContract::new("a", 1), "/opt/a")
            .unwrap();
        let err = registry
            .register(StepContract::new("a", 1), "/opt/other_a")
            .unwrap_err();
        assert!(matches!(err, StepContractViolation::DuplicateName { .. }));
        assert_eq!(registry.origin_of("a"), Some("/opt/a"));
    }
}
