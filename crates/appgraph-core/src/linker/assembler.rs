//! Assembly pipeline: runs every builder over a source inventory and merges
//! the results into one graph document.
//!
//! Per-file phases run on a rayon pool and return local contributions; all
//! merging happens sequentially afterwards. The procedure map (phase A of data
//! access) is finished before any phase-B expansion starts.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use rayon::prelude::*;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::AssemblerConfig;
use crate::errors::{LinkerError, LinkerResult};
use crate::evidence::finalize_evidence;
use crate::linker::data_access::{expand_file, ProcedureMap};
use crate::linker::handlers::{resolve_route_handler, ClassIndex};
use crate::linker::routes::build_routes_for_file;
use crate::linker::security::{java_security, jsp_security, propagate_route_security};
use crate::linker::stats::{evaluate_gates, Gaps, GraphStats};
use crate::linker::traces::build_traces;
use crate::linker::views::{link_page, link_route_view, JspIndex, RouteMatcher, WildcardResolution};
use crate::linker::Contribution;
use crate::models::graph::{
    Entity, EntityType, Graph, Relation, GRAPH_SCHEMA_VERSION, WILDCARD_METHODS_KEY,
};
use crate::models::inventory::{FileDetail, SourceFile, SourceInventory};

/// Reject a file whose detail cannot be linked at all.
fn check_file(file: &SourceFile) -> LinkerResult<()> {
    if file.path.trim().is_empty() {
        return Err(LinkerError::malformed("<unnamed>", "file without a path"));
    }
    if let Some(reason) = &file.parse_error {
        return Err(LinkerError::malformed(&file.path, reason.clone()));
    }
    match &file.detail {
        None => Err(LinkerError::malformed(&file.path, "no extracted detail")),
        Some(FileDetail::Java(detail)) if detail.classes.iter().any(|c| c.name.trim().is_empty()) => {
            Err(LinkerError::malformed(&file.path, "java class without a name"))
        }
        Some(_) => Ok(()),
    }
}

/// First copy of each entity wins; source refs of later copies are unioned in.
fn merge_entities(entities: impl IntoIterator<Item = Entity>) -> IndexMap<String, Entity> {
    let mut merged: IndexMap<String, Entity> = IndexMap::new();
    for entity in entities {
        match merged.get_mut(&entity.id) {
            Some(existing) => {
                for source in entity.source_refs {
                    if !existing.source_refs.contains(&source) {
                        existing.source_refs.push(source);
                    }
                }
            }
            None => {
                merged.insert(entity.id.clone(), entity);
            }
        }
    }
    for entity in merged.values_mut() {
        entity.source_refs.sort();
    }
    merged
}

/// Relations keyed by id: first occurrence wins, evidence of later duplicates
/// is unioned into it.
fn merge_relations(relations: impl IntoIterator<Item = Relation>) -> IndexMap<String, Relation> {
    let mut merged: IndexMap<String, Relation> = IndexMap::new();
    for relation in relations {
        match merged.get_mut(&relation.id) {
            Some(existing) => existing.evidence.extend(relation.evidence),
            None => {
                merged.insert(relation.id.clone(), relation);
            }
        }
    }
    merged
}

fn apply_wildcard_methods(routes: &mut [Entity], resolutions: Vec<WildcardResolution>) {
    let mut by_route: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for resolution in resolutions {
        by_route.entry(resolution.route_id).or_default().insert(resolution.method);
    }
    for route in routes.iter_mut() {
        if let Some(methods) = by_route.remove(&route.id) {
            route.attributes.extra.insert(
                WILDCARD_METHODS_KEY.to_string(),
                Value::Array(methods.into_iter().map(Value::String).collect()),
            );
        }
    }
}

pub struct Assembler {
    config: AssemblerConfig,
    extra_patterns: Vec<Regex>,
}

impl Assembler {
    /// Invalid configured security patterns are logged and skipped.
    pub fn new(config: AssemblerConfig) -> Self {
        let config = config.validated();
        let (extra_patterns, errors) = config.compile_extra_patterns();
        for error in errors {
            warn!("Ignoring security pattern: {error}");
        }
        Self {
            config,
            extra_patterns,
        }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Build the graph, on a dedicated pool when one can be created.
    pub fn assemble(&self, inventory: &SourceInventory) -> Graph {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build();
        match pool {
            Ok(pool) => pool.install(|| self.link(inventory)),
            Err(e) => {
                warn!("Falling back to the global thread pool: {e}");
                self.link(inventory)
            }
        }
    }

    fn link(&self, raw_inventory: &SourceInventory) -> Graph {
        let started = Instant::now();
        let config = &self.config;
        let inventory = raw_inventory.normalized();
        let mut gaps = Gaps::default();

        let mut usable: Vec<&SourceFile> = Vec::with_capacity(inventory.files.len());
        for file in &inventory.files {
            match check_file(file) {
                Ok(()) => usable.push(file),
                Err(e) => {
                    warn!("Skipping file: {e}");
                    gaps.skipped_files += 1;
                }
            }
        }
        let parsed_files = usable.len();
        let jsp_pages: Vec<(&str, &crate::models::inventory::JspDetail)> = usable
            .iter()
            .filter_map(|f| match &f.detail {
                Some(FileDetail::Jsp(detail)) => Some((f.path.as_str(), detail)),
                _ => None,
            })
            .collect();

        // Routes
        let routes_out = Contribution::merge_all(
            usable
                .par_iter()
                .map(|f| build_routes_for_file(f, config))
                .collect::<Vec<_>>(),
        );
        gaps.add(&routes_out.gaps);
        let mut routes: Vec<Entity> = merge_entities(routes_out.entities).into_values().collect();
        routes.sort_by(|a, b| a.id.cmp(&b.id));
        info!(routes = routes.len(), "Routes built");

        // Views
        let jsp_index = JspIndex::from_files(&usable);
        let mut contributions: Vec<Contribution> = routes
            .par_iter()
            .map(|route| link_route_view(route, &jsp_index))
            .collect();
        let mut wildcard: Vec<WildcardResolution> = Vec::new();
        {
            let matcher = RouteMatcher::new(&routes);
            let pages: Vec<_> = jsp_pages
                .par_iter()
                .map(|(path, detail)| link_page(path, detail, &jsp_index, &matcher, config.enable_jsp_links))
                .collect();
            for page in pages {
                contributions.push(page.contribution);
                wildcard.extend(page.wildcard);
            }
        }
        info!(pages = jsp_index.paths().len(), wildcard = wildcard.len(), "Views linked");
        apply_wildcard_methods(&mut routes, wildcard);

        // Handlers
        let class_index = ClassIndex::from_files(&usable);
        contributions.extend(
            routes
                .par_iter_mut()
                .map(|route| resolve_route_handler(route, &class_index))
                .collect::<Vec<_>>(),
        );
        info!(classes = class_index.len(), "Handlers resolved");

        // Data access: phase A completes before phase B reads the map.
        let procedures = ProcedureMap::from_files(&usable);
        contributions.extend(
            usable
                .par_iter()
                .map(|f| expand_file(f, &procedures, config))
                .collect::<Vec<_>>(),
        );

        // Security
        contributions.extend(
            usable
                .par_iter()
                .map(|f| match &f.detail {
                    Some(FileDetail::Java(detail)) if config.enable_security_roles => {
                        java_security(&f.path, detail)
                    }
                    Some(FileDetail::Jsp(detail)) if config.enable_jsp_security => {
                        jsp_security(&f.path, detail, &self.extra_patterns)
                    }
                    _ => Contribution::default(),
                })
                .collect::<Vec<_>>(),
        );

        // Merge
        let linked = Contribution::merge_all(contributions);
        gaps.add(&linked.gaps);
        let mut entities = merge_entities(
            routes
                .into_iter()
                .chain(jsp_index.entities())
                .chain(procedures.entities().iter().cloned())
                .chain(linked.entities),
        );
        let mut relations = merge_relations(linked.relations);

        let direct: Vec<Relation> = relations.values().cloned().collect();
        for relation in propagate_route_security(&direct) {
            relations.entry(relation.id.clone()).or_insert(relation);
        }

        // Referential integrity
        let mut kept: Vec<Relation> = Vec::with_capacity(relations.len());
        for (_, relation) in relations {
            let mut resolvable = true;
            for endpoint in [&relation.from, &relation.to] {
                if entities.contains_key(endpoint.as_str()) {
                    continue;
                }
                match Entity::stub(endpoint) {
                    Some(stub) => {
                        debug!(id = %stub.id, "Synthesised stub entity");
                        entities.insert(stub.id.clone(), stub);
                    }
                    None => {
                        resolvable = false;
                        break;
                    }
                }
            }
            if resolvable {
                kept.push(relation);
            } else {
                warn!(relation = %relation.id, "Dropping relation with an unresolvable endpoint");
                gaps.dropped_relations += 1;
            }
        }

        let root = inventory.project_root.as_deref();
        for relation in &mut kept {
            let evidence = std::mem::take(&mut relation.evidence);
            relation.evidence = finalize_evidence(
                &relation.id,
                evidence,
                root,
                config.evidence_sample_rate,
                config.max_evidence_per_relation,
            );
        }
        kept.sort_by(|a, b| a.id.cmp(&b.id));

        let traces = build_traces(&kept, config);

        let mut entities: Vec<Entity> = entities.into_values().collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));

        let stats = GraphStats::derive(
            &entities,
            &kept,
            &traces,
            &gaps,
            inventory.files.len(),
            parsed_files,
        );
        for violation in evaluate_gates(&stats, &config.quality_gates) {
            warn!(
                gate = violation.gate,
                threshold = violation.threshold_pct,
                actual = violation.actual_pct,
                "Quality gate not met"
            );
        }
        info!(
            entities = stats.total_entities,
            relations = stats.total_relations,
            traces = stats.total_traces,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Graph assembled"
        );

        Graph {
            version: GRAPH_SCHEMA_VERSION.to_string(),
            project_name: inventory.project_name.clone(),
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            config: config.clone(),
            entities,
            relations: kept,
            traces,
            stats,
        }
    }
}

/// JSON in, JSON out. `config_json` of `None` uses defaults; environment
/// overrides apply either way.
pub fn assemble_json(inventory_json: &str, config_json: Option<&str>) -> LinkerResult<String> {
    if inventory_json.trim().is_empty() {
        return Err(LinkerError::MissingInventory);
    }
    let inventory = SourceInventory::from_json(inventory_json)?;
    let config = match config_json.filter(|c| !c.trim().is_empty()) {
        Some(raw) => AssemblerConfig::from_json(raw)?,
        None => AssemblerConfig::default(),
    }
    .with_env_overrides();
    let graph = Assembler::new(config).assemble(&inventory);
    Ok(graph.to_json()?)
}

/// Entity ids referenced by relations but absent from the entity list.
pub fn dangling_endpoints(graph: &Graph) -> Vec<String> {
    let ids: HashSet<&str> = graph.entities.iter().map(|e| e.id.as_str()).collect();
    let mut missing: BTreeSet<String> = BTreeSet::new();
    for relation in &graph.relations {
        for endpoint in [&relation.from, &relation.to] {
            if !ids.contains(endpoint.as_str()) {
                missing.insert(endpoint.clone());
            }
        }
    }
    missing.into_iter().collect()
}

/// Count of entities of one type.
pub fn count_entities(graph: &Graph, entity_type: EntityType) -> usize {
    graph
        .entities
        .iter()
        .filter(|e| e.entity_type == entity_type)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::graph::RelationType;
    use crate::models::inventory::{
        ActionMapping, Annotation, AnnotationValue, CodeMapping, ConfigDetail, Forward, JavaClass,
        JavaDetail, JavaMethod, JspDetail, JspTag, MappingKind, ProcedureCall, ServletMapping,
        SqlDetail, SqlStatement,
    };

    fn file(path: &str, detail: FileDetail) -> SourceFile {
        SourceFile {
            path: path.into(),
            language: None,
            detail: Some(detail),
            parse_error: None,
        }
    }

    fn inventory(files: Vec<SourceFile>) -> SourceInventory {
        SourceInventory {
            project_name: "shop".into(),
            project_root: Some("/home/dev/shop".into()),
            files,
        }
    }

    fn java(path: &str, package: &str, classes: Vec<JavaClass>) -> SourceFile {
        file(
            path,
            FileDetail::Java(JavaDetail {
                package: Some(package.into()),
                classes,
            }),
        )
    }

    fn class(name: &str, methods: Vec<JavaMethod>) -> JavaClass {
        JavaClass {
            name: name.into(),
            methods,
            line: Some(1),
            ..JavaClass::default()
        }
    }

    fn method(name: &str, line: u32) -> JavaMethod {
        JavaMethod {
            name: name.into(),
            line: Some(line),
            ..JavaMethod::default()
        }
    }

    fn jsp(path: &str, detail: JspDetail) -> SourceFile {
        file(path, FileDetail::Jsp(detail))
    }

    fn scenario_a() -> SourceInventory {
        inventory(vec![
            file(
                "/home/dev/shop/WEB-INF/struts.xml",
                FileDetail::Config(ConfigDetail {
                    action_mappings: vec![ActionMapping {
                        path: Some("/user/*".into()),
                        action_class: Some("com.shop.UserAction".into()),
                        method: Some("{1}".into()),
                        forwards: vec![Forward {
                            name: Some("success".into()),
                            path: "/WEB-INF/jsp/user/view.jsp".into(),
                            line: Some(9),
                        }],
                        line: Some(8),
                        ..ActionMapping::default()
                    }],
                    ..ConfigDetail::default()
                }),
            ),
            java(
                "src/com/shop/UserAction.java",
                "com.shop",
                vec![class("UserAction", vec![method("edit", 10), method("list", 20), method("getId", 30)])],
            ),
            jsp(
                "web/WEB-INF/jsp/user/view.jsp",
                JspDetail {
                    code_mappings: vec![CodeMapping {
                        kind: MappingKind::ActionCall,
                        from_reference: None,
                        to_reference: Some("/user/edit".into()),
                        line: Some(14),
                    }],
                    ..JspDetail::default()
                },
            ),
        ])
    }

    fn assemble(inv: &SourceInventory) -> Graph {
        Assembler::new(AssemblerConfig::default()).assemble(inv)
    }

    #[test]
    fn test_scenario_a_wildcard_route_resolution() {
        let graph = assemble(&scenario_a());
        assert_eq!(count_entities(&graph, EntityType::Route), 1);
        let route = graph.entity("route_user/*").unwrap();
        let attrs = route.route_attrs().unwrap();
        assert_eq!(attrs.action, "user/*");
        assert_eq!(attrs.method.as_deref(), Some("edit"));
        assert_eq!(route.wildcard_methods(), vec!["edit"]);
        assert_eq!(route.source_refs[0].file, "WEB-INF/struts.xml");

        assert_eq!(graph.relations_of(RelationType::Renders).count(), 1);
        assert!(graph
            .relation("route_user/*", RelationType::Renders, "jsp_web/WEB-INF/jsp/user/view")
            .is_some());
        let handlers: Vec<&Relation> = graph.relations_of(RelationType::HandlesRoute).collect();
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].from, "method_com.shop.UserAction#edit");
        assert!(graph
            .relation("jsp_web/WEB-INF/jsp/user/view", RelationType::InvokesRoute, "route_user/*")
            .is_some());
        assert_eq!(graph.traces.len(), 1);
        assert_eq!(
            graph.traces[0].path,
            vec!["route_user/*", "method_com.shop.UserAction#edit", "jsp_web/WEB-INF/jsp/user/view"]
        );
    }

    #[test]
    fn test_scenario_b_servlet_entry_point() {
        let inv = inventory(vec![
            file(
                "WEB-INF/web.xml",
                FileDetail::Config(ConfigDetail {
                    servlet_mappings: vec![ServletMapping {
                        servlet_name: Some("orders".into()),
                        url_pattern: Some("/api/orders".into()),
                        servlet_class: Some("com.shop.OrderServlet".into()),
                        line: Some(3),
                    }],
                    ..ConfigDetail::default()
                }),
            ),
            java(
                "src/com/shop/OrderServlet.java",
                "com.shop",
                vec![class("OrderServlet", vec![method("doPost", 12)])],
            ),
        ]);
        let graph = assemble(&inv);
        let handlers: Vec<&Relation> = graph.relations_of(RelationType::HandlesRoute).collect();
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].from, "method_com.shop.OrderServlet#doPost");
        assert_eq!(handlers[0].to, "route_api/orders");
        assert!(graph.entity("method_com.shop.OrderServlet#doGet").is_none());
    }

    fn scenario_c() -> SourceInventory {
        inventory(vec![
            java(
                "src/com/shop/OrderDao.java",
                "com.shop",
                vec![class(
                    "OrderDao",
                    vec![JavaMethod {
                        name: "load".into(),
                        procedure_calls: vec![ProcedureCall {
                            name: "dbo.GetOrders".into(),
                            line: Some(22),
                        }],
                        line: Some(20),
                        ..JavaMethod::default()
                    }],
                )],
            ),
            file(
                "db/procs/GetOrders.sql",
                FileDetail::Sql(SqlDetail {
                    statements: vec![
                        SqlStatement {
                            statement_type: "CREATE".into(),
                            text: Some("CREATE PROCEDURE dbo.GetOrders AS BEGIN".into()),
                            line: Some(1),
                            ..SqlStatement::default()
                        },
                        SqlStatement {
                            statement_type: "SELECT".into(),
                            tables: vec!["Orders".into()],
                            text: Some("SELECT * FROM Orders".into()),
                            line: Some(2),
                            ..SqlStatement::default()
                        },
                    ],
                    ..SqlDetail::default()
                }),
            ),
        ])
    }

    #[test]
    fn test_scenario_c_procedure_expansion() {
        let graph = assemble(&scenario_c());
        let from = "method_com.shop.OrderDao#load";
        assert!(graph
            .relation(from, RelationType::InvokesProcedure, "proc_dbo.GetOrders")
            .is_some());
        assert!(graph.relation(from, RelationType::ReadsFrom, "table_Orders").is_some());
        assert!(graph
            .relation("proc_dbo.GetOrders", RelationType::ReadsFrom, "table_Orders")
            .is_some());
        let table = graph.entity("table_Orders").unwrap();
        assert!(table.is_stub());
        let proc_entity = graph.entity("proc_dbo.GetOrders").unwrap();
        assert!(!proc_entity.is_stub());
        assert_eq!(graph.stats.gaps.unresolved_procedures, 0);
    }

    fn scenario_d() -> SourceInventory {
        inventory(vec![
            file(
                "WEB-INF/struts-config.xml",
                FileDetail::Config(ConfigDetail {
                    action_mappings: vec![ActionMapping {
                        path: Some("/r".into()),
                        forwards: vec![Forward {
                            name: Some("success".into()),
                            path: "/A.jsp".into(),
                            line: None,
                        }],
                        ..ActionMapping::default()
                    }],
                    ..ConfigDetail::default()
                }),
            ),
            jsp(
                "web/A.jsp",
                JspDetail {
                    includes: vec!["B.jsp".into()],
                    ..JspDetail::default()
                },
            ),
            jsp(
                "web/B.jsp",
                JspDetail {
                    tags: vec![JspTag {
                        prefix: Some("sec".into()),
                        name: "authorize".into(),
                        attributes: [("access".to_string(), "hasRole('Admin')".to_string())]
                            .into_iter()
                            .collect(),
                        text: None,
                        line: Some(3),
                        end_line: Some(5),
                    }],
                    ..JspDetail::default()
                },
            ),
        ])
    }

    #[test]
    fn test_scenario_d_security_propagation() {
        let graph = assemble(&scenario_d());
        assert!(graph
            .relation("jsp_web/A", RelationType::IncludesView, "jsp_web/B")
            .is_some());
        assert!(graph.relation("jsp_web/B", RelationType::SecuredBy, "role_Admin").is_some());
        let propagated = graph
            .relation("route_r", RelationType::SecuredBy, "role_Admin")
            .unwrap();
        assert!(propagated.rationale.contains("propagated"));
        assert!(propagated.confidence < 0.85);
        assert_eq!(graph.stats.security_direct, 1);
        assert_eq!(graph.stats.security_propagated, 1);
    }

    #[test]
    fn test_scenario_e_unresolvable_view() {
        let inv = inventory(vec![
            file(
                "WEB-INF/struts.xml",
                FileDetail::Config(ConfigDetail {
                    action_mappings: vec![ActionMapping {
                        path: Some("/report".into()),
                        action_class: Some("ReportAction".into()),
                        forwards: vec![Forward {
                            name: Some("success".into()),
                            path: "/missing/qqq.jsp".into(),
                            line: None,
                        }],
                        ..ActionMapping::default()
                    }],
                    ..ConfigDetail::default()
                }),
            ),
            jsp("web/index.jsp", JspDetail::default()),
        ]);
        let graph = assemble(&inv);
        assert_eq!(graph.relations_of(RelationType::Renders).count(), 0);
        assert_eq!(graph.stats.routes_with_view, 0);
        assert_eq!(graph.stats.gaps.unresolved_views, 1);
        assert!(graph.traces.is_empty());
    }

    fn combined() -> SourceInventory {
        let mut files = scenario_a().files;
        files.extend(scenario_c().files);
        files.extend(scenario_d().files);
        inventory(files)
    }

    fn without_timestamp(json: &str) -> Value {
        let mut value: Value = serde_json::from_str(json).unwrap();
        value["generated_at"] = Value::Null;
        value
    }

    #[test]
    fn test_assembly_is_idempotent() {
        let inv = combined();
        let first = assemble(&inv).to_json().unwrap();
        let second = assemble(&inv).to_json().unwrap();
        assert_eq!(without_timestamp(&first), without_timestamp(&second));
    }

    #[test]
    fn test_relations_unique_and_referentially_intact() {
        let graph = assemble(&combined());
        let mut ids: Vec<&str> = graph.relations.iter().map(|r| r.id.as_str()).collect();
        let total = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert!(dangling_endpoints(&graph).is_empty());
        assert!(graph
            .relations
            .iter()
            .all(|r| (0.0..=1.0).contains(&r.confidence)));
    }

    #[test]
    fn test_at_most_one_handler_per_route() {
        let graph = assemble(&combined());
        let mut seen: HashSet<&str> = HashSet::new();
        for relation in graph.relations_of(RelationType::HandlesRoute) {
            assert!(seen.insert(relation.to.as_str()));
        }
    }

    #[test]
    fn test_duplicate_relations_merge_evidence() {
        let mut inv = scenario_c();
        let mut dao = inv.files[0].clone();
        dao.path = "src/com/shop/copy/OrderDao.java".into();
        inv.files.push(dao);
        let graph = assemble(&inv);
        let rel = graph
            .relation("method_com.shop.OrderDao#load", RelationType::InvokesProcedure, "proc_dbo.GetOrders")
            .unwrap();
        assert_eq!(rel.evidence.len(), 2);
        let method = graph.entity("method_com.shop.OrderDao#load").unwrap();
        assert_eq!(method.source_refs.len(), 2);
    }

    #[test]
    fn test_security_additivity() {
        let mut inv = scenario_d();
        inv.files.push(java(
            "src/com/shop/AdminAction.java",
            "com.shop",
            vec![JavaClass {
                annotations: vec![Annotation {
                    name: "RolesAllowed".into(),
                    attributes: [("value".to_string(), AnnotationValue::Scalar("Auditor".into()))]
                        .into_iter()
                        .collect(),
                    line: Some(2),
                }],
                ..class("AdminAction", vec![method("execute", 5)])
            }],
        ));
        let with_direct = assemble(&inv);
        assert!(with_direct
            .relation("method_com.shop.AdminAction#execute", RelationType::SecuredBy, "role_Auditor")
            .is_some());
        inv.files.pop();
        let without_direct = assemble(&inv);
        assert!(without_direct
            .relation("route_r", RelationType::SecuredBy, "role_Admin")
            .is_some());
    }

    #[test]
    fn test_malformed_files_are_skipped() {
        let mut inv = scenario_c();
        inv.files.push(SourceFile {
            path: "src/Broken.java".into(),
            language: Some("java".into()),
            detail: None,
            parse_error: Some("unexpected token".into()),
        });
        inv.files.push(java("src/Anon.java", "x", vec![class("  ", vec![])]));
        let graph = assemble(&inv);
        assert_eq!(graph.stats.gaps.skipped_files, 2);
        assert_eq!(graph.stats.total_files, 4);
        assert_eq!(graph.stats.parsed_files, 2);
        assert!(graph.relation("method_com.shop.OrderDao#load", RelationType::ReadsFrom, "table_Orders").is_some());
    }

    #[test]
    fn test_rejected_files_contribute_nothing() {
        let mut purge = file(
            "db/purge.sql",
            FileDetail::Sql(SqlDetail {
                statements: vec![
                    SqlStatement {
                        statement_type: "CREATE".into(),
                        text: Some("CREATE PROCEDURE dbo.P AS".into()),
                        line: Some(1),
                        ..SqlStatement::default()
                    },
                    SqlStatement {
                        statement_type: "DELETE".into(),
                        tables: vec!["Secret".into()],
                        line: Some(2),
                        ..SqlStatement::default()
                    },
                ],
                ..SqlDetail::default()
            }),
        );
        purge.parse_error = Some("truncated batch".into());
        let mut ghost = jsp("web/ghost.jsp", JspDetail::default());
        ghost.parse_error = Some("unclosed tag".into());
        let caller = JavaMethod {
            procedure_calls: vec![ProcedureCall {
                name: "dbo.P".into(),
                line: Some(6),
            }],
            ..method("m", 5)
        };
        let inv = inventory(vec![
            purge,
            ghost,
            java("src/com/x/D.java", "com.x", vec![class("D", vec![caller])]),
            file(
                "WEB-INF/struts-config.xml",
                FileDetail::Config(ConfigDetail {
                    action_mappings: vec![ActionMapping {
                        path: Some("/ghost".into()),
                        action_class: Some("com.x.D".into()),
                        forwards: vec![Forward {
                            name: Some("success".into()),
                            path: "/ghost.jsp".into(),
                            line: Some(3),
                        }],
                        line: Some(2),
                        ..ActionMapping::default()
                    }],
                    ..ConfigDetail::default()
                }),
            ),
        ]);
        let graph = assemble(&inv);
        assert_eq!(graph.stats.gaps.skipped_files, 2);
        assert!(graph
            .relation("method_com.x.D#m", RelationType::InvokesProcedure, "proc_dbo.P")
            .is_some());
        assert!(graph.relations.iter().all(|r| r.to != "table_Secret"));
        assert_eq!(graph.stats.gaps.unresolved_procedures, 1);
        assert!(graph.entity("jsp_web/ghost").is_none());
        assert_eq!(graph.relations_of(RelationType::Renders).count(), 0);
    }

    #[test]
    fn test_jaxrs_verbs_each_get_a_handler() {
        let annotation = |name: &str, value: Option<&str>| Annotation {
            name: name.into(),
            attributes: value
                .map(|v| ("value".to_string(), AnnotationValue::Scalar(v.into())))
                .into_iter()
                .collect(),
            line: None,
        };
        let resource = JavaClass {
            annotations: vec![annotation("Path", Some("/orders"))],
            ..class(
                "R",
                vec![
                    JavaMethod {
                        annotations: vec![annotation("GET", None)],
                        ..method("list", 10)
                    },
                    JavaMethod {
                        annotations: vec![annotation("POST", None)],
                        ..method("create", 20)
                    },
                ],
            )
        };
        let graph = assemble(&inventory(vec![java("src/com/x/R.java", "com.x", vec![resource])]));
        assert_eq!(count_entities(&graph, EntityType::Route), 2);
        let handlers: Vec<(&str, &str)> = graph
            .relations_of(RelationType::HandlesRoute)
            .map(|r| (r.from.as_str(), r.to.as_str()))
            .collect();
        assert_eq!(
            handlers,
            vec![
                ("method_com.x.R#create", "route_orders#POST"),
                ("method_com.x.R#list", "route_orders#GET"),
            ]
        );
    }

    #[test]
    fn test_evidence_sampling_caps_relations() {
        let config = AssemblerConfig {
            max_evidence_per_relation: 1,
            ..AssemblerConfig::default()
        };
        let mut inv = scenario_c();
        let mut dao = inv.files[0].clone();
        dao.path = "src/other/OrderDao.java".into();
        inv.files.push(dao);
        let graph = Assembler::new(config).assemble(&inv);
        assert!(graph.relations.iter().all(|r| r.evidence.len() <= 1));
    }

    #[test]
    fn test_assemble_json_round_trip_and_missing_inventory() {
        let raw = serde_json::to_string(&scenario_c()).unwrap();
        let out = assemble_json(&raw, Some(r#"{"enable_sql_from_java": false}"#)).unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["version"], GRAPH_SCHEMA_VERSION);
        assert_eq!(value["project_name"], "shop");
        assert_eq!(value["config"]["enable_sql_from_java"], false);
        let types: Vec<&str> = value["relations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["readsFrom"]);

        assert!(matches!(assemble_json("null", None), Err(LinkerError::MissingInventory)));
        assert!(matches!(assemble_json("  ", None), Err(LinkerError::MissingInventory)));
        assert!(matches!(assemble_json("{", None), Err(LinkerError::Json(_))));
        assert!(matches!(assemble_json("[1, 2]", None), Err(LinkerError::InvalidInput(_))));
        assert!(matches!(assemble_json(&raw, Some("[]")), Err(LinkerError::InvalidInput(_))));
    }

    #[test]
    fn test_empty_inventory() {
        let graph = assemble(&inventory(vec![]));
        assert!(graph.entities.is_empty());
        assert!(graph.relations.is_empty());
        assert_eq!(graph.stats.parse_success_rate, 1.0);
    }

    #[test]
    fn test_invalid_security_pattern_is_ignored() {
        let config = AssemblerConfig {
            extra_security_patterns: vec!["(unclosed".into(), r"role:(\w+)".into()],
            ..AssemblerConfig::default()
        };
        let assembler = Assembler::new(config);
        assert_eq!(assembler.extra_patterns.len(), 1);
    }
}
