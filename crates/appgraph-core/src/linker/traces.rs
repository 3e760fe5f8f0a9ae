//! End-to-end traces: route → handler → screen → reachable pages, with the
//! data those nodes touch.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::AssemblerConfig;
use crate::evidence::dedup_evidence;
use crate::linker::views::ViewGraph;
use crate::models::graph::{trace_id, CrudOp, Relation, RelationType, Trace};

pub fn build_traces(relations: &[Relation], config: &AssemblerConfig) -> Vec<Trace> {
    let graph = ViewGraph::from_relations(relations);

    let mut handlers: HashMap<&str, &Relation> = HashMap::new();
    let mut renders: BTreeMap<&str, Vec<&Relation>> = BTreeMap::new();
    let mut crud_by_source: HashMap<&str, Vec<&Relation>> = HashMap::new();
    for relation in relations {
        match relation.relation_type {
            RelationType::HandlesRoute => {
                handlers.entry(relation.to.as_str()).or_insert(relation);
            }
            RelationType::Renders => renders.entry(relation.from.as_str()).or_default().push(relation),
            t if t.is_crud() => crud_by_source
                .entry(relation.from.as_str())
                .or_default()
                .push(relation),
            _ => {}
        }
    }

    let mut traces = Vec::new();
    for (route, mut screens) in renders {
        screens.sort_by(|a, b| a.to.cmp(&b.to));
        screens.dedup_by(|later, earlier| later.to == earlier.to);
        let handler = handlers.get(route).copied();

        for render in screens {
            let screen = render.to.as_str();
            let mut path: Vec<String> = vec![route.to_string()];
            if let Some(h) = handler {
                path.push(h.from.clone());
            }
            path.extend(graph.reachable(&[screen]).into_iter().map(str::to_string));

            let mut evidence = render.evidence.clone();
            let mut confidence = render.confidence;
            if let Some(h) = handler {
                evidence.extend(h.evidence.iter().cloned());
                confidence = confidence.min(h.confidence);
            }

            let mut crud_summary: BTreeMap<CrudOp, BTreeSet<String>> = BTreeMap::new();
            let mut tables: BTreeSet<String> = BTreeSet::new();
            for node in &path {
                for crud in crud_by_source.get(node.as_str()).into_iter().flatten() {
                    let Some(op) = CrudOp::from_relation(crud.relation_type) else {
                        continue;
                    };
                    crud_summary.entry(op).or_default().insert(crud.to.clone());
                    tables.insert(crud.to.clone());
                    if config.enable_trace_evidence {
                        evidence.extend(crud.evidence.iter().cloned());
                    }
                }
            }

            traces.push(Trace {
                id: trace_id(route, screen),
                route: route.to_string(),
                screen: screen.to_string(),
                path,
                crud_summary: crud_summary
                    .into_iter()
                    .map(|(op, set)| (op, set.into_iter().collect()))
                    .collect(),
                tables: tables.into_iter().collect(),
                evidence: dedup_evidence(evidence, None),
                confidence,
            });
        }
    }
    traces.sort_by(|a, b| a.id.cmp(&b.id));
    traces
}
