// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

/// Errors raised while loading configuration or resolving a workflow.
///
/// Every variant is fatal and is produced before any step process is spawned.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A workflow node references a step name that no contract declares
    UnknownStep {
        /// The node's explicit id, or its position when no id was given
        node: String,
        /// The step name that could not be found
        step: String,
    },
    /// A required document type has no producing contract at all
    UnsatisfiableType {
        /// The document type nobody produces
        doc_type: String,
    },
    /// More than one contract could produce a type that must be inferred
    AmbiguousProducer {
        /// The document type with several candidate producers
        doc_type: String,
        /// Names of the candidate contracts
        candidates: Vec<String>,
    },
    /// Two nodes of the resolved workflow produce the same type
    DuplicateProducer {
        /// The document type produced twice
        doc_type: String,
        /// Ids of the conflicting nodes
        nodes: Vec<String>,
    },
    /// Two nodes share the same id
    DuplicateNodeId {
        /// The duplicated id
        node_id: String,
    },
    /// The produces/requires relation between nodes contains a cycle
    CyclicWorkflow {
        /// Node ids along the cycle, first id repeated at the end
        cycle: Vec<String>,
    },
    /// A publish entry is missing information or is self-contradictory
    InvalidPublish {
        /// Name of the publish entry
        name: String,
        /// What is wrong with it
        reason: String,
    },
    /// The configuration file could not be read or decoded
    Load {
        /// Path of the configuration file
        path: String,
        /// Underlying I/O or parse error text
        reason: String,
    },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::UnknownStep { node, step } => {
                write!(f, "Node '{}' references unknown step '{}'", node, step)
            }
            ConfigurationError::UnsatisfiableType { doc_type } => {
                write!(f, "UnsatisfiableType(\"{}\"): no known step produces it", doc_type)
            }
            ConfigurationError::AmbiguousProducer {
                doc_type,
                candidates,
            } => {
                write!(
                    f,
                    "AmbiguousProducer(\"{}\"): candidates [{}]; configure one of them explicitly",
                    doc_type,
                    candidates.join(", ")
                )
            }
            ConfigurationError::DuplicateProducer { doc_type, nodes } => {
                write!(
                    f,
                    "DuplicateProducer(\"{}\"): produced by nodes [{}]",
                    doc_type,
                    nodes.join(", ")
                )
            }
            ConfigurationError::DuplicateNodeId { node_id } => {
                write!(f, "DuplicateNodeId(\"{}\")", node_id)
            }
            ConfigurationError::CyclicWorkflow { cycle } => {
                write!(f, "Cyclic workflow detected: {}", cycle.join(" -> "))
            }
            ConfigurationError::InvalidPublish { name, reason } => {
                write!(f, "Invalid publish entry '{}': {}", name, reason)
            }
            ConfigurationError::Load { path, reason } => {
                write!(f, "Failed to load configuration '{}': {}", path, reason)
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}
