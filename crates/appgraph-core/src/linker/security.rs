//! Role extraction (`securedBy`) from Java annotations and JSP security
//! markup, plus propagation from rendered pages onto routes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::evidence::{file_evidence, line_evidence};
use crate::linker::views::ViewGraph;
use crate::linker::Contribution;
use crate::models::graph::{jsp_id, method_id, role_id, Entity, Evidence, Relation, RelationType};
use crate::models::inventory::{Annotation, JavaDetail, JspDetail, MappingKind};

pub const PROPAGATED_RATIONALE: &str = "propagated from rendered JSP security";

const METHOD_CONFIDENCE: f64 = 0.95;
const CLASS_CONFIDENCE: f64 = 0.85;
const TAG_CONFIDENCE: f64 = 0.85;
const EXPRESSION_CONFIDENCE: f64 = 0.75;
const HELPER_CALL_CONFIDENCE: f64 = 0.65;
const THRESHOLD_CONFIDENCE: f64 = 0.6;
const EXTRA_PATTERN_CONFIDENCE: f64 = 0.6;
const PROPAGATED_CONFIDENCE: f64 = 0.55;

const ROLE_ANNOTATIONS: &[&str] = &["RolesAllowed", "Secured", "PreAuthorize", "PostAuthorize"];

const SECURITY_TAG_PREFIXES: &[&str] = &["sec", "security", "authz", "shiro"];

const ROLE_ATTRIBUTES: &[&str] = &["role", "roles", "ifAllGranted", "ifAnyGranted"];

static SINGLE_ROLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:hasRole|isUserInRole|hasAuthority)\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap()
});

static ANY_ROLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:hasAnyRole|hasAnyAuthority)\s*\(([^)]*)\)").unwrap());

static QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"['"]([^'"]+)['"]"#).unwrap());

/// `SecurityUtil.hasRole(user, "X")`, `checkRole("X")`, `userHasAccess(u, 'X')`.
static HELPER_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b((?:check|require|verify|assert|has|is|user)(?:User)?(?:Is|Has|In)?(?:Any)?(?:Role|Access|Permission|Authority)s?)\s*\(([^()]*)\)",
    )
    .unwrap()
});

/// `user.getLevel() >= 3`, `securityLevel > 2`.
static THRESHOLD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\w*(?i:level|rank|tier|clearance))\s*(?:\(\s*\))?\s*(>=|<=|==|>|<)\s*(\d+)\b").unwrap()
});

fn clean_role(raw: &str) -> Option<String> {
    let role = raw.trim().trim_matches(|c| c == '\'' || c == '"').trim();
    if role.is_empty() || role.contains(|c: char| c.is_whitespace() || "(){}$<>=".contains(c)) {
        None
    } else {
        Some(role.to_string())
    }
}

/// Roles named by `hasRole('X')`, `hasAnyRole('A','B')`, `isUserInRole("X")`
/// and the authority variants, in order of appearance.
pub fn roles_from_expression(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for caps in SINGLE_ROLE_RE.captures_iter(text) {
        if let (Some(whole), Some(role)) = (caps.get(0), caps.get(1).and_then(|m| clean_role(m.as_str()))) {
            found.push((whole.start(), role));
        }
    }
    for caps in ANY_ROLE_RE.captures_iter(text) {
        let (Some(whole), Some(args)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        for (i, quoted) in QUOTED_RE.captures_iter(args.as_str()).enumerate() {
            if let Some(role) = clean_role(&quoted[1]) {
                found.push((whole.start() + i, role));
            }
        }
    }
    found.sort_by_key(|(pos, _)| *pos);
    let mut roles: Vec<String> = Vec::new();
    for (_, role) in found {
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
    roles
}

/// Roles passed as string literals to role-checking helper methods. The
/// last literal is the role unless the helper takes several (`...Any...`).
pub fn roles_from_helper_calls(text: &str) -> Vec<String> {
    let mut roles: Vec<String> = Vec::new();
    for caps in HELPER_CALL_RE.captures_iter(text) {
        let literals: Vec<&str> = QUOTED_RE
            .captures_iter(&caps[2])
            .filter_map(|q| q.get(1).map(|m| m.as_str()))
            .collect();
        let picked: &[&str] = if caps[1].contains("Any") {
            &literals
        } else {
            literals.last().map(std::slice::from_ref).unwrap_or(&[])
        };
        for role in picked.iter().filter_map(|raw| clean_role(raw)) {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
    }
    roles
}

/// Numeric access checks as pseudo-roles, e.g. `user.getLevel() >= 3`
/// becomes `level>=3`.
pub fn roles_from_thresholds(text: &str) -> Vec<String> {
    let mut roles: Vec<String> = Vec::new();
    for caps in THRESHOLD_RE.captures_iter(text) {
        let name = &caps[1];
        let name = match name.strip_prefix("get") {
            Some(rest) if rest.starts_with(|c: char| c.is_ascii_uppercase()) => rest,
            _ => name,
        };
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            continue;
        };
        let role = format!("{}{}{}{}", first.to_ascii_lowercase(), chars.as_str(), &caps[2], &caps[3]);
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
    roles
}

/// A comma list of plain role names, or role expressions when the value
/// contains a call.
fn roles_from_value(value: &str) -> Vec<String> {
    if value.contains('(') {
        return roles_from_expression(value);
    }
    value.split(',').filter_map(clean_role).collect()
}

// ---------------------------------------------------------------------------
// Java
// ---------------------------------------------------------------------------

/// Roles declared by one annotation, or nothing for non-role annotations.
pub fn annotation_roles(annotation: &Annotation) -> Vec<String> {
    let name = annotation.simple_name();
    if !ROLE_ANNOTATIONS.contains(&name) {
        return Vec::new();
    }
    let mut values = annotation.values("value");
    if values.is_empty() {
        values = annotation.values("roles");
    }
    let expression_only = matches!(name, "PreAuthorize" | "PostAuthorize");
    let mut roles: Vec<String> = Vec::new();
    for value in values {
        let extracted = if expression_only {
            roles_from_expression(value)
        } else {
            roles_from_value(value)
        };
        for role in extracted {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
    }
    roles
}

fn roles_of(annotations: &[Annotation]) -> Vec<(String, Option<u32>)> {
    let mut out: Vec<(String, Option<u32>)> = Vec::new();
    for annotation in annotations {
        for role in annotation_roles(annotation) {
            if !out.iter().any(|(r, _)| *r == role) {
                out.push((role, annotation.line));
            }
        }
    }
    out
}

/// Method-level and class-level `securedBy` edges. Class roles are emitted
/// from every method of the class.
pub fn java_security(path: &str, detail: &JavaDetail) -> Contribution {
    let mut out = Contribution::default();
    let mut roles_seen: BTreeSet<String> = BTreeSet::new();
    for class in &detail.classes {
        if class.name.trim().is_empty() {
            continue;
        }
        let fqcn = class.qualified_name(detail.package.as_deref());
        let class_roles = roles_of(&class.annotations);
        for method in &class.methods {
            let method_roles = roles_of(&method.annotations);
            if method_roles.is_empty() && class_roles.is_empty() {
                continue;
            }
            let from = method_id(&fqcn, &method.name);
            for (role, line) in &method_roles {
                out.relations.push(Relation::new(
                    &from,
                    RelationType::SecuredBy,
                    &role_id(role),
                    METHOD_CONFIDENCE,
                    vec![line_evidence(path, line.or(method.line), None)],
                    "method role annotation",
                ));
                roles_seen.insert(role.clone());
            }
            for (role, line) in &class_roles {
                if method_roles.iter().any(|(r, _)| r == role) {
                    continue;
                }
                out.relations.push(Relation::new(
                    &from,
                    RelationType::SecuredBy,
                    &role_id(role),
                    CLASS_CONFIDENCE,
                    vec![line_evidence(path, line.or(class.line), None)],
                    "class role annotation",
                ));
                roles_seen.insert(role.clone());
            }
            out.entities
                .push(Entity::method(&fqcn, &method.name, path, method.line, method.end_line));
        }
    }
    out.entities.extend(roles_seen.iter().map(|r| Entity::role(r)));
    out
}

// ---------------------------------------------------------------------------
// JSP
// ---------------------------------------------------------------------------

struct PageRoles {
    found: IndexMap<String, (f64, Evidence, &'static str)>,
}

impl PageRoles {
    fn add(&mut self, roles: Vec<String>, confidence: f64, evidence: &Evidence, source: &'static str) {
        for role in roles {
            self.found
                .entry(role)
                .or_insert_with(|| (confidence, evidence.clone(), source));
        }
    }
}

fn tag_roles(prefix: &str, name: &str, attributes: &BTreeMap<String, String>) -> Vec<String> {
    let mut roles = Vec::new();
    for (key, value) in attributes {
        let key = key.as_str();
        if key == "access" {
            roles.extend(roles_from_expression(value));
        } else if ROLE_ATTRIBUTES.iter().any(|a| a.eq_ignore_ascii_case(key)) {
            roles.extend(roles_from_value(value));
        } else if prefix == "shiro" && key == "name" && matches!(name, "hasRole" | "hasAnyRoles") {
            roles.extend(roles_from_value(value));
        }
    }
    roles
}

fn extra_pattern_roles(patterns: &[Regex], text: &str) -> Vec<String> {
    let mut roles = Vec::new();
    for pattern in patterns {
        for caps in pattern.captures_iter(text) {
            let Some(m) = caps.get(1).or_else(|| caps.get(0)) else {
                continue;
            };
            if let Some(role) = clean_role(m.as_str()) {
                roles.push(role);
            }
        }
    }
    roles
}

/// `securedBy` edges from one page. Each role keeps the evidence of the
/// first span it was found in.
pub fn jsp_security(page: &str, detail: &JspDetail, extra_patterns: &[Regex]) -> Contribution {
    let mut roles = PageRoles {
        found: IndexMap::new(),
    };

    for tag in &detail.tags {
        let (prefix, name) = tag.prefix_and_name();
        let Some(prefix) = prefix.filter(|p| SECURITY_TAG_PREFIXES.contains(p)) else {
            continue;
        };
        let evidence = line_evidence(page, tag.line, tag.end_line);
        roles.add(tag_roles(prefix, name, &tag.attributes), TAG_CONFIDENCE, &evidence, "security tag");
    }
    for mapping in detail
        .code_mappings
        .iter()
        .filter(|m| m.kind == MappingKind::JspSecurity)
    {
        if let Some(target) = mapping.to_reference.as_deref() {
            let evidence = line_evidence(page, mapping.line, None);
            roles.add(roles_from_value(target), TAG_CONFIDENCE, &evidence, "security mapping");
        }
    }
    for el in &detail.el_expressions {
        let evidence = line_evidence(page, el.line, None);
        roles.add(roles_from_expression(&el.expression), EXPRESSION_CONFIDENCE, &evidence, "EL role check");
    }
    for scriptlet in &detail.scriptlets {
        let evidence = line_evidence(page, scriptlet.line, scriptlet.end_line);
        roles.add(
            roles_from_expression(&scriptlet.code),
            EXPRESSION_CONFIDENCE,
            &evidence,
            "scriptlet role check",
        );
    }
    for el in &detail.el_expressions {
        let evidence = line_evidence(page, el.line, None);
        roles.add(roles_from_helper_calls(&el.expression), HELPER_CALL_CONFIDENCE, &evidence, "helper role check");
        roles.add(roles_from_thresholds(&el.expression), THRESHOLD_CONFIDENCE, &evidence, "numeric access check");
    }
    for scriptlet in &detail.scriptlets {
        let evidence = line_evidence(page, scriptlet.line, scriptlet.end_line);
        roles.add(roles_from_helper_calls(&scriptlet.code), HELPER_CALL_CONFIDENCE, &evidence, "helper role check");
        roles.add(roles_from_thresholds(&scriptlet.code), THRESHOLD_CONFIDENCE, &evidence, "numeric access check");
    }

    if !extra_patterns.is_empty() {
        for tag in &detail.tags {
            let evidence = line_evidence(page, tag.line, tag.end_line);
            roles.add(extra_pattern_roles(extra_patterns, &tag.full_text()), EXTRA_PATTERN_CONFIDENCE, &evidence, "configured pattern");
        }
        for el in &detail.el_expressions {
            let evidence = line_evidence(page, el.line, None);
            roles.add(extra_pattern_roles(extra_patterns, &el.expression), EXTRA_PATTERN_CONFIDENCE, &evidence, "configured pattern");
        }
        for scriptlet in &detail.scriptlets {
            let evidence = line_evidence(page, scriptlet.line, scriptlet.end_line);
            roles.add(extra_pattern_roles(extra_patterns, &scriptlet.code), EXTRA_PATTERN_CONFIDENCE, &evidence, "configured pattern");
        }
    }

    let from = jsp_id(page);
    let mut out = Contribution::default();
    for (role, (confidence, mut evidence, source)) in roles.found {
        if evidence.line.is_none() {
            evidence = file_evidence(page);
        }
        out.relations.push(Relation::new(
            &from,
            RelationType::SecuredBy,
            &role_id(&role),
            confidence,
            vec![evidence],
            source,
        ));
        out.entities.push(Entity::role(&role));
    }
    out
}

// ---------------------------------------------------------------------------
// Propagation
// ---------------------------------------------------------------------------

/// For every route that renders at least one page, one propagated
/// `securedBy` per role held directly by any page reachable from its views.
pub fn propagate_route_security(relations: &[Relation]) -> Vec<Relation> {
    let graph = ViewGraph::from_relations(relations);

    let mut page_roles: BTreeMap<&str, Vec<&Relation>> = BTreeMap::new();
    let mut rendered: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for relation in relations {
        match relation.relation_type {
            RelationType::SecuredBy if relation.from.starts_with("jsp_") && !relation.is_propagated() => {
                page_roles.entry(relation.from.as_str()).or_default().push(relation);
            }
            RelationType::Renders => {
                rendered
                    .entry(relation.from.as_str())
                    .or_default()
                    .push(relation.to.as_str());
            }
            _ => {}
        }
    }
    if page_roles.is_empty() {
        return Vec::new();
    }

    let mut propagated = Vec::new();
    for (route, mut views) in rendered {
        views.sort_unstable();
        views.dedup();
        let mut roles: IndexMap<&str, Vec<Evidence>> = IndexMap::new();
        for page in graph.reachable(&views) {
            for direct in page_roles.get(page).into_iter().flatten() {
                roles
                    .entry(direct.to.as_str())
                    .or_insert_with(|| direct.evidence.clone());
            }
        }
        for (role, evidence) in roles {
            propagated.push(Relation::new(
                route,
                RelationType::SecuredBy,
                role,
                PROPAGATED_CONFIDENCE,
                evidence,
                PROPAGATED_RATIONALE,
            ));
        }
    }
    propagated
}
