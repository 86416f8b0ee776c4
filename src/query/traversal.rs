//! Bounded breadth-first neighborhood traversal
//!
//! Walks relations outward from a center entity level by level. All
//! relation fetches of one level run concurrently and complete before the
//! next frontier is computed. Within a level, nodes are processed in
//! discovery order and each node's relations in id order, so the same
//! graph always yields the same subgraph.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;

use crate::config::TraversalConfig;
use crate::deadline::with_deadline;
use crate::entity::Entity;
use crate::relation::Relation;
use crate::storage::HybridStore;
use crate::Result;

/// A traversal request
#[derive(Debug, Clone)]
pub struct NeighborQuery {
    pub center_id: String,
    pub max_depth: usize,
    /// Only follow relations with this predicate
    pub relation_type: Option<String>,
    /// Cap on returned nodes, center included
    pub max_entities: usize,
    pub deadline: Option<Instant>,
}

impl NeighborQuery {
    pub fn new(center_id: impl Into<String>, defaults: &TraversalConfig) -> Self {
        Self {
            center_id: center_id.into(),
            max_depth: defaults.max_depth,
            relation_type: None,
            max_entities: defaults.max_entities,
            deadline: None,
        }
    }

    pub fn depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_entities(mut self, max_entities: usize) -> Self {
        self.max_entities = max_entities;
        self
    }

    pub fn relation_type(mut self, predicate: impl Into<String>) -> Self {
        self.relation_type = Some(predicate.into());
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A node of the returned subgraph
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub entity: Entity,
    /// BFS level; 0 for the center
    pub level: usize,
    pub is_center: bool,
}

/// An edge of the returned subgraph
#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub relation: Relation,
    /// Level of the node whose expansion produced this edge
    pub source_level: usize,
}

/// Nodes and edges around a center entity
#[derive(Debug, Clone, Serialize)]
pub struct Subgraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Set when the entity cap left reachable nodes out
    pub truncated: bool,
}

impl Subgraph {
    pub fn center(&self) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.is_center)
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.nodes.iter().any(|n| n.entity.id == entity_id)
    }

    /// Nodes at one BFS level
    pub fn level(&self, level: usize) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(move |n| n.level == level)
    }
}

/// Neighborhood queries over a hybrid store
pub struct NeighborEngine {
    store: Arc<HybridStore>,
    defaults: TraversalConfig,
}

impl NeighborEngine {
    pub fn new(store: Arc<HybridStore>, defaults: TraversalConfig) -> Self {
        Self { store, defaults }
    }

    /// Start a query with the configured depth and cap
    pub fn query(&self, center_id: impl Into<String>) -> NeighborQuery {
        NeighborQuery::new(center_id, &self.defaults)
    }

    /// Subgraph around `query.center_id`; `NotFound` if the center is missing
    pub async fn neighbors(&self, query: &NeighborQuery) -> Result<Subgraph> {
        with_deadline(query.deadline, "neighbors", self.traverse(query)).await
    }

    async fn traverse(&self, query: &NeighborQuery) -> Result<Subgraph> {
        let center = self.store.get_entity(&query.center_id).await?;

        if query.max_depth == 0 || query.max_entities < 1 {
            return Ok(Subgraph {
                nodes: vec![GraphNode {
                    entity: center,
                    level: 0,
                    is_center: true,
                }],
                edges: Vec::new(),
                truncated: false,
            });
        }

        let cap = query.max_entities;
        let mut levels: HashMap<String, usize> = HashMap::new();
        let mut order: Vec<String> = vec![center.id.clone()];
        levels.insert(center.id.clone(), 0);

        let mut edges: Vec<GraphEdge> = Vec::new();
        let mut seen_edges: HashSet<String> = HashSet::new();
        let mut truncated = false;
        let mut frontier = vec![center.id.clone()];

        for level in 1..=query.max_depth {
            if frontier.is_empty() {
                break;
            }

            // Level barrier: every fetch of this level completes first
            let fetches = frontier
                .iter()
                .map(|id| self.store.get_entity_relations(id, query.relation_type.as_deref()));
            let fetched = join_all(fetches).await;

            let mut next = Vec::new();
            for (node_id, relations) in frontier.iter().zip(fetched) {
                for relation in relations? {
                    let Some(other) = relation.other_end(node_id).map(str::to_string) else {
                        continue;
                    };

                    if !levels.contains_key(&other) {
                        if order.len() >= cap {
                            truncated = true;
                            continue;
                        }
                        levels.insert(other.clone(), level);
                        order.push(other.clone());
                        next.push(other);
                    }

                    if seen_edges.insert(relation.id.clone()) {
                        edges.push(GraphEdge {
                            relation,
                            source_level: level - 1,
                        });
                    }
                }
            }

            if order.len() >= cap {
                if truncated {
                    tracing::debug!(
                        "neighbor traversal from {} hit the cap of {} entities at level {}",
                        query.center_id,
                        cap,
                        level
                    );
                }
                break;
            }
            frontier = next;
        }

        // Attributes for every kept node; records deleted meanwhile drop out
        let entities = self.store.get_entities(&order).await?;
        let nodes: Vec<GraphNode> = entities
            .into_iter()
            .filter_map(|entity| {
                let level = *levels.get(&entity.id)?;
                Some(GraphNode {
                    is_center: level == 0,
                    level,
                    entity,
                })
            })
            .collect();

        let present: HashSet<&str> = nodes.iter().map(|n| n.entity.id.as_str()).collect();
        edges.retain(|e| {
            present.contains(e.relation.subject_id.as_str()) && present.contains(e.relation.object_id.as_str())
        });

        Ok(Subgraph {
            nodes,
            edges,
            truncated,
        })
    }
}
