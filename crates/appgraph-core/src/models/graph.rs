//! Output graph model: entities, relations, evidence and traces.
//!
//! Entity and relation ids are pure functions of their content so repeated
//! assembly over the same inventory produces identical ids.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AssemblerConfig;
use crate::linker::stats::GraphStats;
use crate::normalize::{canonical_object_name, jsp_stem};

/// Schema version of the serialized graph document.
pub const GRAPH_SCHEMA_VERSION: &str = "1.0";

/// Route `extra` key listing methods substituted into a `{N}` placeholder by
/// in-page action calls.
pub const WILDCARD_METHODS_KEY: &str = "wildcard_methods";

// ---------------------------------------------------------------------------
// Entity kinds and ids
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Route,
    #[serde(rename = "JSP")]
    Jsp,
    JavaMethod,
    Table,
    StoredProcedure,
    Role,
}

impl EntityType {
    pub fn id_prefix(self) -> &'static str {
        match self {
            EntityType::Route => "route_",
            EntityType::Jsp => "jsp_",
            EntityType::JavaMethod => "method_",
            EntityType::Table => "table_",
            EntityType::StoredProcedure => "proc_",
            EntityType::Role => "role_",
        }
    }

    /// Entity type implied by an id prefix.
    pub fn from_id(id: &str) -> Option<EntityType> {
        [
            EntityType::Route,
            EntityType::Jsp,
            EntityType::JavaMethod,
            EntityType::Table,
            EntityType::StoredProcedure,
            EntityType::Role,
        ]
        .into_iter()
        .find(|t| id.starts_with(t.id_prefix()))
    }

    /// Types the assembler may synthesise as stubs when first seen as a
    /// relation target.
    pub fn is_stubbable(self) -> bool {
        matches!(
            self,
            EntityType::Table | EntityType::StoredProcedure | EntityType::Role
        )
    }
}

pub fn route_id(namespace: &str, action: &str) -> String {
    if namespace.is_empty() {
        format!("route_{action}")
    } else {
        format!("route_{namespace}_{action}")
    }
}

pub fn jsp_id(path: &str) -> String {
    format!("jsp_{}", jsp_stem(path))
}

pub fn method_id(fqcn: &str, method: &str) -> String {
    format!("method_{fqcn}#{method}")
}

pub fn table_id(name: &str) -> String {
    format!("table_{}", canonical_object_name(name).rsplit('.').next().unwrap_or(""))
}

pub fn proc_id(name: &str) -> String {
    format!("proc_{}", canonical_object_name(name))
}

pub fn role_id(name: &str) -> String {
    format!("role_{}", name.trim())
}

// ---------------------------------------------------------------------------
// Entity attributes
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    Struts,
    Servlet,
    JaxRs,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RouteAttrs {
    pub framework: Option<Framework>,
    pub namespace: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_raw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_view: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
}

impl RouteAttrs {
    /// Route id. JAX-RS routes are also keyed by HTTP verb.
    pub fn key_id(&self) -> String {
        let id = route_id(&self.namespace, &self.action);
        match (self.framework, self.http_method.as_deref()) {
            (Some(Framework::JaxRs), Some(verb)) => format!("{id}#{verb}"),
            _ => id,
        }
    }

    /// The declared method is a `{N}` placeholder not yet substituted.
    pub fn has_unresolved_method(&self) -> bool {
        self.method.is_none()
            && self
                .method_raw
                .as_deref()
                .is_some_and(crate::normalize::is_placeholder)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct JspAttrs {
    pub path: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MethodAttrs {
    pub class_name: String,
    pub method_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TableAttrs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_kind: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProcedureAttrs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedAttrs {
    Route(RouteAttrs),
    Jsp(JspAttrs),
    Method(MethodAttrs),
    Table(TableAttrs),
    Procedure(ProcedureAttrs),
    Role {},
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Attributes {
    #[serde(flatten)]
    pub typed: TypedAttrs,
    /// Rare or optional fields (`stub`, `wildcard_methods`, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Attributes {
    pub fn new(typed: TypedAttrs) -> Self {
        Self {
            typed,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl SourceRef {
    pub fn new(file: &str, line: Option<u32>) -> Self {
        Self {
            file: file.to_string(),
            line,
        }
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub name: String,
    pub attributes: Attributes,
    pub source_refs: Vec<SourceRef>,
}

impl Entity {
    pub fn route(attrs: RouteAttrs, source: SourceRef) -> Self {
        let id = attrs.key_id();
        let name = crate::normalize::route_path(&attrs.namespace, &attrs.action);
        Self {
            id,
            entity_type: EntityType::Route,
            name,
            attributes: Attributes::new(TypedAttrs::Route(attrs)),
            source_refs: vec![source],
        }
    }

    pub fn jsp(path: &str) -> Self {
        Self {
            id: jsp_id(path),
            entity_type: EntityType::Jsp,
            name: crate::normalize::basename(path).to_string(),
            attributes: Attributes::new(TypedAttrs::Jsp(JspAttrs {
                path: path.to_string(),
            })),
            source_refs: vec![SourceRef::new(path, None)],
        }
    }

    pub fn method(fqcn: &str, name: &str, file: &str, line: Option<u32>, end_line: Option<u32>) -> Self {
        Self {
            id: method_id(fqcn, name),
            entity_type: EntityType::JavaMethod,
            name: format!("{fqcn}#{name}"),
            attributes: Attributes::new(TypedAttrs::Method(MethodAttrs {
                class_name: fqcn.to_string(),
                method_name: name.to_string(),
                line,
                end_line,
            })),
            source_refs: vec![SourceRef::new(file, line)],
        }
    }

    pub fn table(name: &str, object_kind: Option<&str>, source: Option<SourceRef>) -> Self {
        let id = table_id(name);
        let display = id.trim_start_matches("table_").to_string();
        Self {
            id,
            entity_type: EntityType::Table,
            name: display,
            attributes: Attributes::new(TypedAttrs::Table(TableAttrs {
                object_kind: object_kind.map(str::to_string),
            })),
            source_refs: source.into_iter().collect(),
        }
    }

    pub fn procedure(name: &str, source: Option<SourceRef>) -> Self {
        let canonical = canonical_object_name(name);
        let (schema, short) = crate::normalize::split_qualified(&canonical);
        Self {
            id: proc_id(&canonical),
            entity_type: EntityType::StoredProcedure,
            name: canonical,
            attributes: Attributes::new(TypedAttrs::Procedure(ProcedureAttrs {
                schema,
                name: short,
            })),
            source_refs: source.into_iter().collect(),
        }
    }

    pub fn role(name: &str) -> Self {
        Self {
            id: role_id(name),
            entity_type: EntityType::Role,
            name: name.trim().to_string(),
            attributes: Attributes::new(TypedAttrs::Role {}),
            source_refs: Vec::new(),
        }
    }

    /// Minimal placeholder for a relation target discovered before its
    /// canonical source. `None` for types that cannot be synthesised.
    pub fn stub(id: &str) -> Option<Self> {
        let entity_type = EntityType::from_id(id)?;
        if !entity_type.is_stubbable() {
            return None;
        }
        let name = &id[entity_type.id_prefix().len()..];
        if name.trim().is_empty() {
            return None;
        }
        let typed = match entity_type {
            EntityType::Table => TypedAttrs::Table(TableAttrs::default()),
            EntityType::StoredProcedure => {
                let (schema, short) = crate::normalize::split_qualified(name);
                TypedAttrs::Procedure(ProcedureAttrs {
                    schema,
                    name: short,
                })
            }
            _ => TypedAttrs::Role {},
        };
        let mut attributes = Attributes::new(typed);
        attributes.extra.insert("stub".to_string(), Value::Bool(true));
        Some(Self {
            id: id.to_string(),
            entity_type,
            name: name.to_string(),
            attributes,
            source_refs: Vec::new(),
        })
    }

    pub fn route_attrs(&self) -> Option<&RouteAttrs> {
        match &self.attributes.typed {
            TypedAttrs::Route(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn route_attrs_mut(&mut self) -> Option<&mut RouteAttrs> {
        match &mut self.attributes.typed {
            TypedAttrs::Route(attrs) => Some(attrs),
            _ => None,
        }
    }

    /// Sorted, unique methods recorded under [`WILDCARD_METHODS_KEY`].
    pub fn wildcard_methods(&self) -> Vec<String> {
        match self.attributes.extra.get(WILDCARD_METHODS_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn method_attrs(&self) -> Option<&MethodAttrs> {
        match &self.attributes.typed {
            TypedAttrs::Method(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn jsp_path(&self) -> Option<&str> {
        match &self.attributes.typed {
            TypedAttrs::Jsp(attrs) => Some(attrs.path.as_str()),
            _ => None,
        }
    }

    pub fn is_stub(&self) -> bool {
        self.attributes.extra.get("stub") == Some(&Value::Bool(true))
    }
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationType {
    HandlesRoute,
    Renders,
    IncludesView,
    EmbedsView,
    RedirectsTo,
    InvokesRoute,
    ReadsFrom,
    WritesTo,
    DeletesFrom,
    InvokesProcedure,
    SecuredBy,
}

impl RelationType {
    pub fn as_str(self) -> &'static str {
        match self {
            RelationType::HandlesRoute => "handlesRoute",
            RelationType::Renders => "renders",
            RelationType::IncludesView => "includesView",
            RelationType::EmbedsView => "embedsView",
            RelationType::RedirectsTo => "redirectsTo",
            RelationType::InvokesRoute => "invokesRoute",
            RelationType::ReadsFrom => "readsFrom",
            RelationType::WritesTo => "writesTo",
            RelationType::DeletesFrom => "deletesFrom",
            RelationType::InvokesProcedure => "invokesProcedure",
            RelationType::SecuredBy => "securedBy",
        }
    }

    pub fn is_crud(self) -> bool {
        matches!(
            self,
            RelationType::ReadsFrom | RelationType::WritesTo | RelationType::DeletesFrom
        )
    }

    /// JSP→JSP navigation edges.
    pub fn is_view_link(self) -> bool {
        matches!(
            self,
            RelationType::IncludesView | RelationType::EmbedsView | RelationType::RedirectsTo
        )
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrudOp {
    Read,
    Write,
    Delete,
}

impl CrudOp {
    /// Map a SQL statement type or operation label to its CRUD class.
    pub fn from_statement(statement_type: &str) -> CrudOp {
        match statement_type.trim().to_uppercase().as_str() {
            "SELECT" | "READ" => CrudOp::Read,
            "DELETE" => CrudOp::Delete,
            _ => CrudOp::Write,
        }
    }

    pub fn relation_type(self) -> RelationType {
        match self {
            CrudOp::Read => RelationType::ReadsFrom,
            CrudOp::Write => RelationType::WritesTo,
            CrudOp::Delete => RelationType::DeletesFrom,
        }
    }

    pub fn from_relation(relation_type: RelationType) -> Option<CrudOp> {
        match relation_type {
            RelationType::ReadsFrom => Some(CrudOp::Read),
            RelationType::WritesTo => Some(CrudOp::Write),
            RelationType::DeletesFrom => Some(CrudOp::Delete),
            _ => None,
        }
    }
}

pub fn relation_id(from: &str, relation_type: RelationType, to: &str) -> String {
    format!("{from}|{relation_type}|{to}")
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Relation {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    pub confidence: f64,
    pub evidence: Vec<Evidence>,
    pub rationale: String,
}

impl Relation {
    pub fn new(
        from: &str,
        relation_type: RelationType,
        to: &str,
        confidence: f64,
        evidence: Vec<Evidence>,
        rationale: impl Into<String>,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            id: relation_id(from, relation_type, to),
            from: from.to_string(),
            to: to.to_string(),
            relation_type,
            confidence,
            evidence,
            rationale: rationale.into(),
        }
    }

    pub fn is_propagated(&self) -> bool {
        self.rationale.contains("propagated")
    }
}

// ---------------------------------------------------------------------------
// Traces and the graph document
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Trace {
    pub id: String,
    pub route: String,
    pub screen: String,
    pub path: Vec<String>,
    pub crud_summary: BTreeMap<CrudOp, Vec<String>>,
    pub tables: Vec<String>,
    pub evidence: Vec<Evidence>,
    pub confidence: f64,
}

pub fn trace_id(route: &str, screen: &str) -> String {
    format!("trace_{:08x}", crc32fast::hash(format!("{route}|{screen}").as_bytes()))
}

#[derive(Clone, Debug, Serialize)]
pub struct Graph {
    pub version: String,
    pub project_name: String,
    pub generated_at: String,
    pub config: AssemblerConfig,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub traces: Vec<Trace>,
    pub stats: GraphStats,
}

impl Graph {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn relations_of(&self, relation_type: RelationType) -> impl Iterator<Item = &Relation> {
        self.relations
            .iter()
            .filter(move |r| r.relation_type == relation_type)
    }

    pub fn relation(&self, from: &str, relation_type: RelationType, to: &str) -> Option<&Relation> {
        let id = relation_id(from, relation_type, to);
        self.relations.iter().find(|r| r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_pure_functions_of_keys() {
        assert_eq!(route_id("", "user/*"), "route_user/*");
        assert_eq!(route_id("admin", "list"), "route_admin_list");
        let attrs = RouteAttrs {
            framework: Some(Framework::JaxRs),
            action: "orders".into(),
            http_method: Some("POST".into()),
            ..RouteAttrs::default()
        };
        assert_eq!(attrs.key_id(), "route_orders#POST");
        assert_eq!(jsp_id("web/WEB-INF/jsp/user/view.jsp"), "jsp_web/WEB-INF/jsp/user/view");
        assert_eq!(method_id("com.shop.UserAction", "edit"), "method_com.shop.UserAction#edit");
        assert_eq!(table_id("[dbo].[Orders]"), "table_Orders");
        assert_eq!(proc_id("[dbo].[GetOrders]"), "proc_dbo.GetOrders");
        assert_eq!(role_id(" Admin "), "role_Admin");
    }

    #[test]
    fn test_entity_type_from_id() {
        assert_eq!(EntityType::from_id("table_Orders"), Some(EntityType::Table));
        assert_eq!(EntityType::from_id("proc_dbo.X"), Some(EntityType::StoredProcedure));
        assert_eq!(EntityType::from_id("widget_1"), None);
    }

    #[test]
    fn test_stub_only_for_stubbable_types() {
        let stub = Entity::stub("proc_dbo.GetOrders").unwrap();
        assert_eq!(stub.entity_type, EntityType::StoredProcedure);
        assert_eq!(stub.name, "dbo.GetOrders");
        assert!(stub.is_stub());
        assert!(Entity::stub("route_login").is_none());
        assert!(Entity::stub("table_").is_none());
        assert!(Entity::stub("unknown").is_none());
    }

    #[test]
    fn test_relation_confidence_is_clamped() {
        let r = Relation::new("a", RelationType::Renders, "b", 1.7, vec![], "x");
        assert_eq!(r.confidence, 1.0);
        let r = Relation::new("a", RelationType::Renders, "b", f64::NAN, vec![], "x");
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.id, relation_id("a", RelationType::Renders, "b"));
    }

    #[test]
    fn test_crud_from_statement() {
        assert_eq!(CrudOp::from_statement("select"), CrudOp::Read);
        assert_eq!(CrudOp::from_statement("DELETE"), CrudOp::Delete);
        assert_eq!(CrudOp::from_statement("MERGE"), CrudOp::Write);
        assert_eq!(CrudOp::Write.relation_type(), RelationType::WritesTo);
    }

    #[test]
    fn test_entity_serializes_flat_attributes() {
        let mut entity = Entity::jsp("web/a.jsp");
        entity
            .attributes
            .extra
            .insert("note".to_string(), Value::String("x".into()));
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["type"], "JSP");
        assert_eq!(json["attributes"]["path"], "web/a.jsp");
        assert_eq!(json["attributes"]["note"], "x");
    }

    #[test]
    fn test_relation_type_serializes_camel_case() {
        let json = serde_json::to_value(RelationType::HandlesRoute).unwrap();
        assert_eq!(json, "handlesRoute");
        assert_eq!(RelationType::SecuredBy.to_string(), "securedBy");
    }

    #[test]
    fn test_trace_id_is_stable() {
        assert_eq!(trace_id("route_a", "jsp_b"), trace_id("route_a", "jsp_b"));
        assert_ne!(trace_id("route_a", "jsp_b"), trace_id("route_a", "jsp_c"));
    }
}
