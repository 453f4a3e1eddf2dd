// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::document::Document;
use crate::engine::queue::{NodeEvent, NodeSender, ENGINE_INPUT};
use crate::observability::messages::engine::{DocumentRouted, DocumentUnrouted};
use crate::observability::messages::StructuredLog;
use crate::workflow::Workflow;

/// Fans documents out to consumer queues according to each node's outputs table.
///
/// Cheap to clone; every runner's drainer holds one.
#[derive(Clone)]
pub struct Router {
    queues: Arc<HashMap<String, NodeSender>>,
    outputs: Arc<HashMap<String, BTreeMap<String, Vec<String>>>>,
    roots: Arc<Vec<String>>,
}

impl Router {
    pub fn new(workflow: &Workflow, queues: HashMap<String, NodeSender>) -> Self {
        let outputs = workflow
            .nodes()
            .iter()
            .map(|n| (n.id.clone(), n.outputs.clone()))
            .collect();
        let roots = workflow.roots().map(|n| n.id.clone()).collect();
        Self {
            queues: Arc::new(queues),
            outputs: Arc::new(outputs),
            roots: Arc::new(roots),
        }
    }

    /// Deliver `document` from node `from` to every consumer of its type.
    ///
    /// Returns the number of queues it reached. A consumer that already
    /// finished simply no longer receives.
    pub fn route(&self, from: &str, document: Document) -> usize {
        let consumers = self
            .outputs
            .get(from)
            .and_then(|table| table.get(&document.doc_type))
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        if consumers.is_empty() {
            DocumentUnrouted {
                document_id: &document.id,
                doc_type: &document.doc_type,
                from,
            }
            .log();
            return 0;
        }

        let mut delivered = 0;
        for to in consumers {
            DocumentRouted {
                document_id: &document.id,
                doc_type: &document.doc_type,
                from,
                to,
            }
            .log();
            if self.send(to, NodeEvent::Document(document.clone())) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Tell every consumer of `from` that it will send nothing more.
    pub fn node_done(&self, from: &str) {
        let Some(table) = self.outputs.get(from) else {
            return;
        };
        let mut consumers: Vec<&String> = table.values().flatten().collect();
        consumers.sort();
        consumers.dedup();
        for to in consumers {
            self.send(
                to,
                NodeEvent::UpstreamDone {
                    from: from.to_string(),
                },
            );
        }
    }

    /// Hand an operator-supplied document to every root node.
    pub fn inject(&self, document: Document) {
        for root in self.roots.iter() {
            self.send(root, NodeEvent::Document(document.clone()));
        }
    }

    /// The engine input closed: roots get "no more inputs".
    pub fn input_closed(&self) {
        for root in self.roots.iter() {
            self.send(
                root,
                NodeEvent::UpstreamDone {
                    from: ENGINE_INPUT.to_string(),
                },
            );
        }
    }

    fn send(&self, to: &str, event: NodeEvent) -> bool {
        self.queues
            .get(to)
            .map_or(false, |queue| queue.send(event).is_ok())
    }
}
