// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Per-node input queues.
//!
//! Every node owns one unbounded MPSC queue. Any number of upstream runners
//! (and the engine input pump) enqueue into it; only the node's own feeder
//! dequeues.

use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc;

use crate::document::Document;
use crate::workflow::Workflow;

/// Upstream name used for documents injected through the engine input.
pub const ENGINE_INPUT: &str = "<input>";

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Document(Document),
    /// The named upstream reached a terminal state and will send nothing more.
    UpstreamDone { from: String },
}

pub type NodeSender = mpsc::UnboundedSender<NodeEvent>;

/// Receiving end of a node queue, tracking which upstreams are still live.
pub struct NodeInbox {
    receiver: mpsc::UnboundedReceiver<NodeEvent>,
    pending_upstreams: BTreeSet<String>,
}

impl NodeInbox {
    pub fn new<I, S>(upstreams: I) -> (NodeSender, Self)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let inbox = Self {
            receiver,
            pending_upstreams: upstreams.into_iter().map(Into::into).collect(),
        };
        (sender, inbox)
    }

    /// Next input document, or `None` once every upstream is done.
    pub async fn next_document(&mut self) -> Option<Document> {
        while !self.pending_upstreams.is_empty() {
            match self.receiver.recv().await? {
                NodeEvent::Document(document) => return Some(document),
                NodeEvent::UpstreamDone { from } => {
                    self.pending_upstreams.remove(&from);
                }
            }
        }
        None
    }

    pub fn pending_upstreams(&self) -> impl Iterator<Item = &str> {
        self.pending_upstreams.iter().map(String::as_str)
    }
}

/// One queue per node. Roots wait on the engine input; every other node
/// waits on the distinct producers feeding it.
pub fn node_queues(workflow: &Workflow) -> (HashMap<String, NodeSender>, HashMap<String, NodeInbox>) {
    let mut senders = HashMap::new();
    let mut inboxes = HashMap::new();
    for node in workflow.nodes() {
        let upstreams: Vec<String> = if node.contract.is_root() {
            vec![ENGINE_INPUT.to_string()]
        } else {
            workflow
                .upstream_of(&node.id)
                .into_iter()
                .map(str::to_string)
                .collect()
        };
        let (sender, inbox) = NodeInbox::new(upstreams);
        senders.insert(node.id.clone(), sender);
        inboxes.insert(node.id.clone(), inbox);
    }
    (senders, inboxes)
}
