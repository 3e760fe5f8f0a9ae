//! View linking: route result views, JSP to JSP navigation, and in-page
//! action calls back onto routes.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use tracing::debug;

use crate::evidence::line_evidence;
use crate::linker::Contribution;
use crate::models::graph::{jsp_id, Entity, Relation, RelationType, RouteAttrs};
use crate::models::inventory::{JspDetail, MappingKind, SourceFile};
use crate::normalize::{
    basename, ensure_jsp_extension, has_jsp_extension, has_wildcard, jsp_stem, normalize_action,
    normalize_action_target, normalize_path, resolve_relative, route_path, substitute_placeholders,
    wildcard_regex,
};

const VIEW_PREFIXES: &[&str] = &["jsp/", "web/", "WEB-INF/jsp/"];

// ---------------------------------------------------------------------------
// JSP path matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Suffix,
    PrefixVariant,
    Substring,
    Heuristic,
}

impl MatchStrategy {
    pub fn confidence(self) -> f64 {
        match self {
            MatchStrategy::Suffix => 0.9,
            MatchStrategy::PrefixVariant => 0.85,
            MatchStrategy::Substring => 0.7,
            MatchStrategy::Heuristic => 0.6,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MatchStrategy::Suffix => "path suffix",
            MatchStrategy::PrefixVariant => "prefixed path variant",
            MatchStrategy::Substring => "case-insensitive substring",
            MatchStrategy::Heuristic => "name heuristic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewMatch<'a> {
    pub path: &'a str,
    pub strategy: MatchStrategy,
}

fn is_path_suffix(path: &str, candidate: &str) -> bool {
    path == candidate
        || (path.len() > candidate.len()
            && path.ends_with(candidate)
            && path.as_bytes()[path.len() - candidate.len() - 1] == b'/')
}

/// Lowercased file stem with `-` and `_` removed.
fn loose_stem(path: &str) -> String {
    jsp_stem(basename(path))
        .chars()
        .filter(|c| !matches!(c, '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Every JSP page in the inventory, in inventory order.
#[derive(Debug, Default)]
pub struct JspIndex {
    paths: Vec<String>,
    lowered: Vec<String>,
}

impl JspIndex {
    /// Index the JSP pages among `files`.
    pub fn from_files(files: &[&SourceFile]) -> Self {
        Self::from_paths(files.iter().filter(|f| f.is_jsp()).map(|f| f.path.clone()))
    }

    pub fn from_paths(paths: impl IntoIterator<Item = String>) -> Self {
        let mut index = JspIndex::default();
        for path in paths {
            if path.is_empty() || index.paths.contains(&path) {
                continue;
            }
            index.lowered.push(path.to_lowercase());
            index.paths.push(path);
        }
        index
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// One `JSP` entity per indexed page.
    pub fn entities(&self) -> Vec<Entity> {
        self.paths.iter().map(|p| Entity::jsp(p)).collect()
    }

    /// Ordered, de-duplicated lookup candidates for a view reference. A
    /// relative reference made from `from_page` is tried against that page's
    /// directory first.
    fn candidates(raw: &str, from_page: Option<&str>) -> Vec<String> {
        let raw = raw.trim();
        if raw.is_empty() || raw.contains("://") || raw.contains("${") || raw.contains("<%") {
            return Vec::new();
        }
        let with_ext = ensure_jsp_extension(raw);
        let mut out: Vec<String> = Vec::new();
        let mut push = |c: String| {
            if !c.is_empty() && !out.contains(&c) {
                out.push(c);
            }
        };
        if let Some(page) = from_page.filter(|_| !with_ext.starts_with('/')) {
            push(resolve_relative(page, &with_ext));
        }
        let normalized = normalize_path(&with_ext, None);
        push(normalized.clone());
        push(basename(&normalized).to_string());
        out
    }

    /// Resolve a view reference to an indexed JSP. Strategies run in order and
    /// the first that matches anything wins.
    pub fn resolve(&self, raw: &str, from_page: Option<&str>) -> Option<ViewMatch<'_>> {
        let candidates = Self::candidates(raw, from_page);
        if candidates.is_empty() || self.paths.is_empty() {
            return None;
        }
        let hit = |i: usize, strategy| {
            Some(ViewMatch {
                path: self.paths[i].as_str(),
                strategy,
            })
        };

        for candidate in &candidates {
            if let Some(i) = self.paths.iter().position(|p| is_path_suffix(p, candidate)) {
                return hit(i, MatchStrategy::Suffix);
            }
        }

        for candidate in &candidates {
            for prefix in VIEW_PREFIXES {
                let variant = format!("{prefix}{candidate}").to_lowercase();
                if let Some(i) = self.lowered.iter().position(|p| is_path_suffix(p, &variant)) {
                    return hit(i, MatchStrategy::PrefixVariant);
                }
            }
        }

        for candidate in &candidates {
            let needle = candidate.to_lowercase();
            if let Some(i) = self.lowered.iter().position(|p| p.contains(&needle)) {
                return hit(i, MatchStrategy::Substring);
            }
        }

        for candidate in &candidates {
            let wanted = loose_stem(candidate);
            if wanted.is_empty() {
                continue;
            }
            let trimmed = wanted.strip_suffix("page").filter(|s| !s.is_empty());
            let found = self.paths.iter().position(|p| {
                let stem = loose_stem(p);
                stem == wanted
                    || stem.starts_with(&wanted)
                    || trimmed.is_some_and(|t| stem == t)
                    || stem.strip_suffix("page").is_some_and(|s| s == wanted)
            });
            if let Some(i) = found {
                return hit(i, MatchStrategy::Heuristic);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Route → JSP
// ---------------------------------------------------------------------------

/// `renders` edge from a route to its primary result view.
pub fn link_route_view(route: &Entity, index: &JspIndex) -> Contribution {
    let mut out = Contribution::default();
    let Some(view) = route.route_attrs().and_then(|a| a.result_view.as_deref()) else {
        return out;
    };
    out.gaps.references_attempted += 1;
    let Some(found) = index.resolve(view, None) else {
        debug!(route = %route.id, view, "Result view not resolved");
        out.gaps.unresolved_views += 1;
        return out;
    };
    let evidence = route
        .source_refs
        .iter()
        .map(|r| line_evidence(&r.file, r.line, None))
        .collect();
    out.relations.push(Relation::new(
        &route.id,
        RelationType::Renders,
        &jsp_id(found.path),
        found.strategy.confidence(),
        evidence,
        format!("result view {view} matched by {}", found.strategy.label()),
    ));
    out
}

// ---------------------------------------------------------------------------
// JSP → Route
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionMatch {
    Exact,
    Basename,
    Containment,
}

impl ActionMatch {
    pub fn confidence(self) -> f64 {
        match self {
            ActionMatch::Exact => 0.9,
            ActionMatch::Basename => 0.75,
            ActionMatch::Containment => 0.6,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ActionMatch::Exact => "exact action",
            ActionMatch::Basename => "action basename",
            ActionMatch::Containment => "action containment",
        }
    }
}

#[derive(Debug)]
struct RouteKey<'a> {
    id: &'a str,
    attrs: &'a RouteAttrs,
    path: String,
    pattern: Option<Regex>,
}

/// A `{N}` method placeholder resolved from an in-page action call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct WildcardResolution {
    pub route_id: String,
    pub method: String,
}

/// Matches normalised action-call targets against known routes, in route id
/// order.
#[derive(Debug, Default)]
pub struct RouteMatcher<'a> {
    routes: Vec<RouteKey<'a>>,
}

impl<'a> RouteMatcher<'a> {
    pub fn new(routes: &'a [Entity]) -> Self {
        let mut keys: Vec<RouteKey<'a>> = routes
            .iter()
            .filter_map(|route| {
                let attrs = route.route_attrs()?;
                let action = normalize_action(&attrs.action);
                let path = route_path(&attrs.namespace, &action);
                let pattern = if has_wildcard(&path) {
                    wildcard_regex(&path)
                } else {
                    None
                };
                Some(RouteKey {
                    id: route.id.as_str(),
                    attrs,
                    path,
                    pattern,
                })
            })
            .collect();
        keys.sort_by(|a, b| a.id.cmp(b.id));
        keys.dedup_by(|later, earlier| later.id == earlier.id);
        RouteMatcher { routes: keys }
    }

    fn find_tier(&self, target: &str, tier: ActionMatch) -> Option<&RouteKey<'a>> {
        let target_base = basename(target);
        // Exact matches compare the full `namespace/action` path.
        self.routes.iter().find(|key| match tier {
            ActionMatch::Exact => {
                key.path == target || key.pattern.as_ref().is_some_and(|re| re.is_match(target))
            }
            ActionMatch::Basename => key.pattern.is_none() && basename(&key.path) == target_base,
            ActionMatch::Containment => {
                key.pattern.is_none()
                    && !key.path.is_empty()
                    && (target.ends_with(key.path.as_str())
                        || key.path.ends_with(target)
                        || key.path.contains(target)
                        || target.contains(key.path.as_str()))
            }
        })
    }

    /// Best route for an action-call target, with the tier that matched.
    pub fn find(&self, raw_target: &str) -> Option<(&str, ActionMatch, Option<String>)> {
        let target = normalize_action_target(raw_target);
        if target.is_empty() {
            return None;
        }
        for tier in [ActionMatch::Exact, ActionMatch::Basename, ActionMatch::Containment] {
            if let Some(key) = self.find_tier(&target, tier) {
                let method = substitute_wildcard_method(key, &target);
                return Some((key.id, tier, method));
            }
        }
        None
    }
}

/// Fill a route's `{N}` method from the groups its action pattern captures
/// on `target`.
fn substitute_wildcard_method(key: &RouteKey<'_>, target: &str) -> Option<String> {
    if !key.attrs.has_unresolved_method() {
        return None;
    }
    let template = key.attrs.method_raw.as_deref()?;
    let action = normalize_action(&key.attrs.action);
    let action_re = wildcard_regex(&action)?;
    let candidate = if key.attrs.namespace.is_empty() {
        target
    } else {
        target
            .strip_prefix(key.attrs.namespace.as_str())?
            .strip_prefix('/')?
    };
    let caps = action_re.captures(candidate)?;
    let groups: Vec<&str> = caps
        .iter()
        .map(|m| m.map(|m| m.as_str()).unwrap_or(""))
        .collect();
    substitute_placeholders(template, &groups)
}

// ---------------------------------------------------------------------------
// Per-page links
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct PageLinks {
    pub contribution: Contribution,
    pub wildcard: Vec<WildcardResolution>,
}

fn view_link_type(kind: MappingKind) -> Option<RelationType> {
    match kind {
        MappingKind::JspInclude => Some(RelationType::IncludesView),
        MappingKind::Iframe => Some(RelationType::EmbedsView),
        MappingKind::Redirect => Some(RelationType::RedirectsTo),
        _ => None,
    }
}

/// JSP→JSP links and JSP→Route action calls declared by one page.
pub fn link_page(
    page: &str,
    detail: &JspDetail,
    index: &JspIndex,
    matcher: &RouteMatcher<'_>,
    include_view_links: bool,
) -> PageLinks {
    let mut links = PageLinks::default();
    let from = jsp_id(page);
    let out = &mut links.contribution;

    let mut view_refs: Vec<(RelationType, &str, Option<u32>)> = Vec::new();
    if include_view_links {
        for mapping in &detail.code_mappings {
            if let (Some(rel), Some(target)) = (view_link_type(mapping.kind), mapping.to_reference.as_deref()) {
                view_refs.push((rel, target, mapping.line));
            }
        }
        for include in &detail.includes {
            view_refs.push((RelationType::IncludesView, include.as_str(), None));
        }
    }

    for (relation_type, target, line) in view_refs {
        out.gaps.references_attempted += 1;
        match index.resolve(target, Some(page)) {
            Some(found) if found.path != page => out.relations.push(Relation::new(
                &from,
                relation_type,
                &jsp_id(found.path),
                found.strategy.confidence(),
                vec![line_evidence(page, line, None)],
                format!("{target} matched by {}", found.strategy.label()),
            )),
            Some(_) => {}
            None => {
                debug!(page, target, "View link not resolved");
                out.gaps.unresolved_links += 1;
            }
        }
    }

    for mapping in &detail.code_mappings {
        if mapping.kind != MappingKind::ActionCall {
            continue;
        }
        let Some(target) = mapping.to_reference.as_deref().filter(|t| !t.trim().is_empty()) else {
            continue;
        };
        // Direct page references are view links, not route invocations.
        if has_jsp_extension(target.split(['?', '#']).next().unwrap_or(target)) {
            continue;
        }
        out.gaps.references_attempted += 1;
        let Some((route_id, tier, method)) = matcher.find(target) else {
            debug!(page, target, "Action call not resolved");
            out.gaps.unresolved_action_calls += 1;
            continue;
        };
        let mut rationale = format!("action call {target} matched by {}", tier.label());
        if let Some(method) = method {
            rationale.push_str(&format!("; wildcard method {method}"));
            links.wildcard.push(WildcardResolution {
                route_id: route_id.to_string(),
                method,
            });
        }
        out.relations.push(Relation::new(
            &from,
            RelationType::InvokesRoute,
            route_id,
            tier.confidence(),
            vec![line_evidence(page, mapping.line, None)],
            rationale,
        ));
    }
    links
}

// ---------------------------------------------------------------------------
// Navigation graph
// ---------------------------------------------------------------------------

/// JSP adjacency built from `includesView`, `embedsView` and `redirectsTo`
/// relations. Neighbours are kept sorted so traversal order is stable.
#[derive(Debug, Default)]
pub struct ViewGraph<'a> {
    adjacency: BTreeMap<&'a str, Vec<&'a str>>,
}

impl<'a> ViewGraph<'a> {
    pub fn from_relations(relations: &'a [Relation]) -> Self {
        let mut adjacency: BTreeMap<&'a str, Vec<&'a str>> = BTreeMap::new();
        for relation in relations.iter().filter(|r| r.relation_type.is_view_link()) {
            adjacency
                .entry(relation.from.as_str())
                .or_default()
                .push(relation.to.as_str());
        }
        for targets in adjacency.values_mut() {
            targets.sort_unstable();
            targets.dedup();
        }
        ViewGraph { adjacency }
    }

    /// Pages reachable from `starts` (inclusive), depth-first with an
    /// explicit stack. Cycles are cut by the visited set.
    pub fn reachable(&self, starts: &[&'a str]) -> Vec<&'a str> {
        let mut order = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&'a str> = starts.iter().rev().copied().collect();
        while let Some(page) = stack.pop() {
            if !visited.insert(page) {
                continue;
            }
            order.push(page);
            if let Some(next) = self.adjacency.get(page) {
                stack.extend(next.iter().rev().filter(|n| !visited.contains(*n)));
            }
        }
        order
    }
}
