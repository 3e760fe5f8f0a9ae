//! Gap counters and graph-wide coverage statistics.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::config::QualityGates;
use crate::models::graph::{Entity, EntityType, Relation, RelationType, Trace};

/// Tallies of references that could not be linked, and of input that was
/// skipped. Filled in by the per-file builders and summed at merge time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Gaps {
    pub skipped_files: usize,
    pub skipped_mappings: usize,
    pub unresolved_handlers: usize,
    pub unresolved_views: usize,
    pub unresolved_links: usize,
    pub unresolved_action_calls: usize,
    pub unresolved_procedures: usize,
    pub dropped_relations: usize,
    /// Every reference resolution attempted, resolved or not.
    pub references_attempted: usize,
}

impl Gaps {
    pub fn add(&mut self, other: &Gaps) {
        self.skipped_files += other.skipped_files;
        self.skipped_mappings += other.skipped_mappings;
        self.unresolved_handlers += other.unresolved_handlers;
        self.unresolved_views += other.unresolved_views;
        self.unresolved_links += other.unresolved_links;
        self.unresolved_action_calls += other.unresolved_action_calls;
        self.unresolved_procedures += other.unresolved_procedures;
        self.dropped_relations += other.dropped_relations;
        self.references_attempted += other.references_attempted;
    }

    pub fn unresolved_total(&self) -> usize {
        self.unresolved_handlers
            + self.unresolved_views
            + self.unresolved_links
            + self.unresolved_action_calls
            + self.unresolved_procedures
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub total_files: usize,
    pub parsed_files: usize,
    pub parse_success_rate: f64,
    pub total_routes: usize,
    pub routes_with_handler: usize,
    pub routes_with_view: usize,
    pub route_resolution_rate: f64,
    pub view_coverage_rate: f64,
    pub crud_coverage_rate: f64,
    pub security_direct: usize,
    pub security_propagated: usize,
    pub total_entities: usize,
    pub total_relations: usize,
    pub total_traces: usize,
    pub unresolved_reference_rate: f64,
    pub relation_counts: BTreeMap<RelationType, usize>,
    pub gaps: Gaps,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl GraphStats {
    /// Derive every figure from the final collections plus the gap tallies.
    pub fn derive(
        entities: &[Entity],
        relations: &[Relation],
        traces: &[Trace],
        gaps: &Gaps,
        total_files: usize,
        parsed_files: usize,
    ) -> GraphStats {
        let mut relation_counts: BTreeMap<RelationType, usize> = BTreeMap::new();
        let mut handled: HashSet<&str> = HashSet::new();
        let mut viewed: HashSet<&str> = HashSet::new();
        let mut with_crud: HashSet<&str> = HashSet::new();
        let mut security_direct = 0;
        let mut security_propagated = 0;

        for relation in relations {
            *relation_counts.entry(relation.relation_type).or_default() += 1;
            match relation.relation_type {
                RelationType::HandlesRoute => {
                    handled.insert(relation.to.as_str());
                }
                RelationType::Renders => {
                    viewed.insert(relation.from.as_str());
                }
                RelationType::SecuredBy => {
                    if relation.is_propagated() {
                        security_propagated += 1;
                    } else {
                        security_direct += 1;
                    }
                }
                t if t.is_crud() => {
                    with_crud.insert(relation.from.as_str());
                }
                _ => {}
            }
        }

        let routes: Vec<&Entity> = entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Route)
            .collect();
        // Streaming and forward-less endpoints count as handled when the
        // mapping declares a class, method or result.
        let routes_with_handler = routes
            .iter()
            .filter(|route| {
                handled.contains(route.id.as_str())
                    || route.route_attrs().is_some_and(|attrs| {
                        attrs.action_class.is_some()
                            || attrs.method.is_some()
                            || attrs.result_view.is_some()
                    })
            })
            .count();
        let routes_with_view = routes
            .iter()
            .filter(|route| viewed.contains(route.id.as_str()))
            .count();

        let code_units: Vec<&Entity> = entities
            .iter()
            .filter(|e| matches!(e.entity_type, EntityType::JavaMethod | EntityType::Jsp))
            .collect();
        let covered = code_units
            .iter()
            .filter(|e| with_crud.contains(e.id.as_str()))
            .count();

        let unresolved = gaps.unresolved_total();

        GraphStats {
            total_files,
            parsed_files,
            parse_success_rate: if total_files == 0 {
                1.0
            } else {
                ratio(parsed_files, total_files)
            },
            total_routes: routes.len(),
            routes_with_handler,
            routes_with_view,
            route_resolution_rate: ratio(routes_with_handler, routes.len()),
            view_coverage_rate: ratio(routes_with_view, routes.len()),
            crud_coverage_rate: ratio(covered, code_units.len()),
            security_direct,
            security_propagated,
            total_entities: entities.len(),
            total_relations: relations.len(),
            total_traces: traces.len(),
            unresolved_reference_rate: ratio(unresolved, gaps.references_attempted.max(unresolved)),
            relation_counts,
            gaps: gaps.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Quality gates
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GateViolation {
    pub gate: &'static str,
    pub threshold_pct: f64,
    pub actual_pct: f64,
}

/// Compare stats against the configured gates. The linker only reports;
/// failing the run is left to the caller.
pub fn evaluate_gates(stats: &GraphStats, gates: &QualityGates) -> Vec<GateViolation> {
    let mut violations = Vec::new();
    let parse_pct = stats.parse_success_rate * 100.0;
    if parse_pct < gates.min_parse_success_pct {
        violations.push(GateViolation {
            gate: "min_parse_success_pct",
            threshold_pct: gates.min_parse_success_pct,
            actual_pct: parse_pct,
        });
    }
    let route_pct = stats.route_resolution_rate * 100.0;
    if stats.total_routes > 0 && route_pct < gates.min_route_resolution_pct {
        violations.push(GateViolation {
            gate: "min_route_resolution_pct",
            threshold_pct: gates.min_route_resolution_pct,
            actual_pct: route_pct,
        });
    }
    let unresolved_pct = stats.unresolved_reference_rate * 100.0;
    if unresolved_pct > gates.max_unresolved_pct {
        violations.push(GateViolation {
            gate: "max_unresolved_pct",
            threshold_pct: gates.max_unresolved_pct,
            actual_pct: unresolved_pct,
        });
    }
    violations
}
