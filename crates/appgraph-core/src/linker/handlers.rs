//! Route handler resolution: maps each route's declared class and method onto
//! a concrete Java method.
//!
//! Resolution cascades from the declared name through framework defaults to a
//! conservative heuristic. When the heuristic still sees several candidates
//! the route is left unresolved rather than guessed.

use std::collections::HashMap;

use tracing::debug;

use crate::evidence::line_evidence;
use crate::linker::Contribution;
use crate::models::graph::{Entity, Framework, Relation, RelationType, RouteAttrs};
use crate::models::inventory::{FileDetail, JavaClass, SourceFile, SourceInventory};
use crate::normalize::{basename, is_placeholder};

const SERVLET_ENTRY_POINTS: &[&str] = &["service", "doGet", "doPost"];

const DEFAULT_ACTION_METHOD: &str = "execute";

const ACTION_VERBS: &[&str] = &[
    "display", "read", "list", "show", "index", "add", "update", "delete", "excel", "search",
    "process", "run", "view", "export", "print", "report", "download",
];

// ---------------------------------------------------------------------------
// Class index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ClassEntry<'a> {
    pub class: &'a JavaClass,
    pub file: &'a str,
}

/// Java classes indexed by simple and fully-qualified name. Later classes
/// overwrite earlier ones on a name collision.
#[derive(Debug, Default)]
pub struct ClassIndex<'a> {
    by_simple: HashMap<String, (ClassEntry<'a>, String)>,
    by_fqcn: HashMap<String, (ClassEntry<'a>, String)>,
}

impl<'a> ClassIndex<'a> {
    pub fn build(inventory: &'a SourceInventory) -> Self {
        Self::from_files(&inventory.files.iter().collect::<Vec<_>>())
    }

    pub fn from_files(files: &[&'a SourceFile]) -> Self {
        let mut index = ClassIndex::default();
        for &file in files {
            let Some(FileDetail::Java(detail)) = &file.detail else {
                continue;
            };
            for class in &detail.classes {
                if class.name.trim().is_empty() {
                    continue;
                }
                let fqcn = class.qualified_name(detail.package.as_deref());
                let entry = ClassEntry {
                    class,
                    file: file.path.as_str(),
                };
                index
                    .by_simple
                    .insert(class.name.trim().to_string(), (entry, fqcn.clone()));
                index.by_fqcn.insert(fqcn.clone(), (entry, fqcn));
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.by_fqcn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fqcn.is_empty()
    }

    /// Look a name up by FQCN first, then by its simple name. Returns the
    /// entry and its FQCN.
    pub fn lookup(&self, name: &str) -> Option<(ClassEntry<'a>, &str)> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let simple = name.rsplit('.').next().unwrap_or(name);
        self.by_fqcn
            .get(name)
            .or_else(|| self.by_simple.get(simple))
            .map(|(entry, fqcn)| (*entry, fqcn.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Method selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStep {
    Exact,
    ServletEntry,
    DefaultExecute,
    VerbHeuristic,
    SingleMethod,
    Wildcard,
    WildcardTieBreak,
}

impl ResolutionStep {
    pub fn confidence(self) -> f64 {
        match self {
            ResolutionStep::Exact => 0.95,
            ResolutionStep::ServletEntry => 0.9,
            ResolutionStep::DefaultExecute => 0.85,
            ResolutionStep::VerbHeuristic => 0.7,
            ResolutionStep::SingleMethod => 0.6,
            ResolutionStep::Wildcard => 0.9,
            ResolutionStep::WildcardTieBreak => 0.65,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResolutionStep::Exact => "declared method",
            ResolutionStep::ServletEntry => "servlet entry point",
            ResolutionStep::DefaultExecute => "default execute method",
            ResolutionStep::VerbHeuristic => "common action verb",
            ResolutionStep::SingleMethod => "single non-trivial method",
            ResolutionStep::Wildcard => "wildcard substitution from action call",
            ResolutionStep::WildcardTieBreak => "first of several wildcard substitutions",
        }
    }
}

fn starts_with_word(name: &str, prefix: &str) -> bool {
    match name.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.chars().next().is_some_and(|c| c.is_uppercase() || c == '_'),
        None => false,
    }
}

/// Accessors, object plumbing and entry points that never handle a request.
pub fn is_trivial_method(name: &str, class_name: &str) -> bool {
    if name == class_name {
        return true;
    }
    ["get", "set", "is", "to"]
        .iter()
        .any(|p| starts_with_word(name, p))
        || name.starts_with("hash")
        || name.starts_with("compare")
        || matches!(name, "equals" | "clone" | "main" | "saveCriteria" | "finalize")
}

/// `execute`, then the first common action verb, then the sole non-trivial
/// method. `None` when the class offers several equally plausible methods.
fn heuristic_method(class: &JavaClass) -> Option<(String, ResolutionStep)> {
    if class.has_method(DEFAULT_ACTION_METHOD) {
        return Some((DEFAULT_ACTION_METHOD.to_string(), ResolutionStep::DefaultExecute));
    }
    for verb in ACTION_VERBS {
        if class.has_method(verb) {
            return Some((verb.to_string(), ResolutionStep::VerbHeuristic));
        }
    }
    let mut candidates: Vec<&str> = class
        .methods
        .iter()
        .map(|m| m.name.as_str())
        .filter(|n| !is_trivial_method(n, class.name.trim()))
        .collect();
    candidates.sort_unstable();
    candidates.dedup();
    match candidates.as_slice() {
        [only] => Some((only.to_string(), ResolutionStep::SingleMethod)),
        _ => None,
    }
}

/// Substituted `{N}` methods the class actually declares. Several candidates
/// fall back to the first in name order.
fn wildcard_method(class: &JavaClass, wildcard_methods: &[String]) -> Option<(String, ResolutionStep)> {
    let mut present: Vec<&String> = wildcard_methods.iter().filter(|m| class.has_method(m)).collect();
    present.sort();
    present.dedup();
    match present.as_slice() {
        [] => None,
        [only] => Some((only.to_string(), ResolutionStep::Wildcard)),
        [first, ..] => Some((first.to_string(), ResolutionStep::WildcardTieBreak)),
    }
}

/// Pick the handler method of `class` for a route. `wildcard_methods` are
/// placeholder substitutions found by in-page action calls.
pub fn resolve_method_name(
    class: &JavaClass,
    attrs: &RouteAttrs,
    wildcard_methods: &[String],
) -> Option<(String, ResolutionStep)> {
    let declared = attrs
        .method
        .as_deref()
        .or(attrs.method_raw.as_deref())
        .map(str::trim)
        .filter(|m| !m.is_empty());

    if attrs.framework == Some(Framework::Servlet) || declared.is_none() {
        for entry in SERVLET_ENTRY_POINTS {
            if class.has_method(entry) {
                return Some((entry.to_string(), ResolutionStep::ServletEntry));
            }
        }
        return match declared {
            Some(m) if !is_placeholder(m) && class.has_method(m) => {
                Some((m.to_string(), ResolutionStep::Exact))
            }
            _ => None,
        };
    }

    let declared = declared?;
    if !is_placeholder(declared) {
        if class.has_method(declared) {
            return Some((declared.to_string(), ResolutionStep::Exact));
        }
        if class.has_method(DEFAULT_ACTION_METHOD) {
            return Some((DEFAULT_ACTION_METHOD.to_string(), ResolutionStep::DefaultExecute));
        }
    } else if let Some(found) = wildcard_method(class, wildcard_methods) {
        return Some(found);
    }
    heuristic_method(class)
}

fn capitalize(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Resolve the handler of one route, emitting the method entity and the
/// `handlesRoute` relation when found. A placeholder method filled in by
/// wildcard substitution is written back onto the route.
pub fn resolve_route_handler(route: &mut Entity, index: &ClassIndex<'_>) -> Contribution {
    let mut out = Contribution::default();
    let wildcard_methods = route.wildcard_methods();
    let Some(attrs) = route.route_attrs() else {
        return out;
    };
    out.gaps.references_attempted += 1;

    let found = match attrs.action_class.as_deref() {
        Some(class_name) => index.lookup(class_name),
        None => {
            let token = basename(&attrs.action).trim_matches('*');
            index
                .lookup(token)
                .or_else(|| index.lookup(&capitalize(token)))
        }
    };
    let Some((entry, fqcn)) = found else {
        debug!(route = %route.id, class = ?attrs.action_class, "Handler class not found");
        out.gaps.unresolved_handlers += 1;
        return out;
    };

    let Some((method_name, step)) = resolve_method_name(entry.class, attrs, &wildcard_methods) else {
        debug!(route = %route.id, class = fqcn, "No handler method resolved");
        out.gaps.unresolved_handlers += 1;
        return out;
    };

    let method = entry.class.method(&method_name);
    let line = method.and_then(|m| m.line).or(entry.class.line);
    let end_line = method.and_then(|m| m.end_line);
    let method_entity = Entity::method(fqcn, &method_name, entry.file, line, end_line);

    let evidence = if entry.file.is_empty() {
        route
            .source_refs
            .iter()
            .map(|r| line_evidence(&r.file, r.line, None))
            .collect()
    } else {
        vec![line_evidence(entry.file, line, end_line)]
    };

    out.relations.push(Relation::new(
        &method_entity.id,
        RelationType::HandlesRoute,
        &route.id,
        step.confidence(),
        evidence,
        format!("resolved via {}", step.label()),
    ));
    out.entities.push(method_entity);

    if matches!(step, ResolutionStep::Wildcard | ResolutionStep::WildcardTieBreak) {
        if let Some(attrs) = route.route_attrs_mut() {
            attrs.method = Some(method_name);
        }
    }
    out
}
