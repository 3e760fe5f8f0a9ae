//! Cross-file linking: turns per-file facts into graph entities and relations.
//!
//! Builders run per file (or per route) and return a [`Contribution`]; the
//! assembler merges contributions sequentially once each parallel phase ends.

pub mod assembler;
pub mod data_access;
pub mod handlers;
pub mod routes;
pub mod security;
pub mod stats;
pub mod traces;
pub mod views;

use crate::models::graph::{Entity, Relation};
use crate::linker::stats::Gaps;

/// Entities, relations and gap tallies produced by one unit of work.
#[derive(Debug, Default)]
pub struct Contribution {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub gaps: Gaps,
}

impl Contribution {
    pub fn extend(&mut self, other: Contribution) {
        self.entities.extend(other.entities);
        self.relations.extend(other.relations);
        self.gaps.add(&other.gaps);
    }

    pub fn merge_all(parts: impl IntoIterator<Item = Contribution>) -> Contribution {
        let mut merged = Contribution::default();
        for part in parts {
            merged.extend(part);
        }
        merged
    }
}
