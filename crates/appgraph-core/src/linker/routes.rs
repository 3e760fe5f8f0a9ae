//! Route construction from Struts action mappings, Struts 2 package blocks,
//! servlet URL mappings and JAX-RS resource annotations.

use tracing::debug;

use crate::config::AssemblerConfig;
use crate::linker::Contribution;
use crate::models::graph::{Entity, Framework, RouteAttrs, SourceRef};
use crate::models::inventory::{
    ActionMapping, Annotation, ConfigDetail, FileDetail, JavaDetail, ServletMapping, SourceFile,
};
use crate::normalize::{is_placeholder, normalize_action, normalize_namespace};

const PRIMARY_FORWARD: &str = "success";

const HTTP_VERB_ANNOTATIONS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Struts
// ---------------------------------------------------------------------------

/// The `success` forward if declared, else the first forward.
fn primary_view(mapping: &ActionMapping) -> Option<String> {
    let forwards: Vec<_> = mapping
        .forwards
        .iter()
        .filter(|f| !f.path.trim().is_empty())
        .collect();
    forwards
        .iter()
        .find(|f| {
            f.name
                .as_deref()
                .is_some_and(|n| n.trim().eq_ignore_ascii_case(PRIMARY_FORWARD))
        })
        .or_else(|| forwards.first())
        .map(|f| f.path.trim().to_string())
}

/// Build the route for one action mapping. `None` when the mapping lacks a
/// path or has nothing to dispatch to.
pub fn struts_route(
    mapping: &ActionMapping,
    inherited_namespace: Option<&str>,
    file: &str,
) -> Option<Entity> {
    let path = non_empty(mapping.path.as_deref())?;
    let action = normalize_action(path);
    if action.is_empty() {
        return None;
    }
    let action_class = non_empty(mapping.action_class.as_deref()).map(str::to_string);
    let result_view = primary_view(mapping);
    if action_class.is_none() && result_view.is_none() {
        return None;
    }

    let namespace = non_empty(mapping.namespace.as_deref())
        .or(inherited_namespace)
        .map(normalize_namespace)
        .unwrap_or_default();

    let declared = non_empty(mapping.method.as_deref());
    let (method, method_raw) = match declared {
        Some(m) if is_placeholder(m) => (None, Some(m.to_string())),
        Some(m) => (Some(m.to_string()), Some(m.to_string())),
        None => (Some("execute".to_string()), None),
    };

    Some(Entity::route(
        RouteAttrs {
            framework: Some(Framework::Struts),
            namespace,
            action,
            action_class,
            method,
            method_raw,
            result_view,
            http_method: None,
        },
        SourceRef::new(file, mapping.line),
    ))
}

// ---------------------------------------------------------------------------
// Servlets
// ---------------------------------------------------------------------------

pub fn servlet_route(mapping: &ServletMapping, file: &str) -> Option<Entity> {
    let pattern = non_empty(mapping.url_pattern.as_deref())?;
    let class = non_empty(mapping.servlet_class.as_deref())?;
    let mut action = normalize_action(pattern);
    if action.is_empty() {
        // default servlet
        action = "/".to_string();
    }
    let mut entity = Entity::route(
        RouteAttrs {
            framework: Some(Framework::Servlet),
            namespace: String::new(),
            action,
            action_class: Some(class.to_string()),
            method: None,
            method_raw: None,
            result_view: None,
            http_method: None,
        },
        SourceRef::new(file, mapping.line),
    );
    // `action` keeps the declared pattern; the id uses the normalised form.
    if let Some(attrs) = entity.route_attrs_mut() {
        attrs.action = pattern.to_string();
    }
    Some(entity)
}

// ---------------------------------------------------------------------------
// JAX-RS
// ---------------------------------------------------------------------------

fn path_annotation(annotations: &[Annotation]) -> Option<String> {
    annotations
        .iter()
        .find(|a| a.simple_name() == "Path")
        .and_then(|a| a.values("value").first().map(|v| v.trim().to_string()))
}

fn http_verb(annotations: &[Annotation]) -> Option<String> {
    annotations
        .iter()
        .map(Annotation::simple_name)
        .find(|name| HTTP_VERB_ANNOTATIONS.contains(name))
        .map(str::to_string)
}

fn join_paths(base: &str, tail: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let tail = tail.trim().trim_start_matches('/');
    match (base.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{tail}"),
    }
}

/// One route per HTTP-verb method of every `@Path` resource class.
pub fn jaxrs_routes(detail: &JavaDetail, file: &str) -> Vec<Entity> {
    let mut routes = Vec::new();
    for class in &detail.classes {
        let Some(class_path) = path_annotation(&class.annotations) else {
            continue;
        };
        let fqcn = class.qualified_name(detail.package.as_deref());
        for method in &class.methods {
            let Some(verb) = http_verb(&method.annotations) else {
                continue;
            };
            let method_path = path_annotation(&method.annotations).unwrap_or_default();
            let action = normalize_action(&join_paths(&class_path, &method_path));
            if action.is_empty() {
                continue;
            }
            routes.push(Entity::route(
                RouteAttrs {
                    framework: Some(Framework::JaxRs),
                    namespace: String::new(),
                    action,
                    action_class: Some(fqcn.clone()),
                    method: Some(method.name.clone()),
                    method_raw: Some(method.name.clone()),
                    result_view: None,
                    http_method: Some(verb),
                },
                SourceRef::new(file, method.line.or(class.line)),
            ));
        }
    }
    routes
}

// ---------------------------------------------------------------------------
// Per-file entry point
// ---------------------------------------------------------------------------

fn config_routes(detail: &ConfigDetail, file: &str, config: &AssemblerConfig) -> Contribution {
    let mut out = Contribution::default();

    let grouped = detail.mapping_groups.iter().flat_map(|group| {
        group
            .mappings
            .iter()
            .map(move |m| (m, non_empty(group.namespace.as_deref())))
    });
    let plain = detail.action_mappings.iter().map(|m| (m, None));

    for (mapping, namespace) in plain.chain(grouped) {
        match struts_route(mapping, namespace, file) {
            Some(route) => out.entities.push(route),
            None => {
                debug!(file, path = ?mapping.path, "Skipping incomplete action mapping");
                out.gaps.skipped_mappings += 1;
            }
        }
    }

    if config.enable_servlet {
        for mapping in &detail.servlet_mappings {
            match servlet_route(mapping, file) {
                Some(route) => out.entities.push(route),
                None => {
                    debug!(file, pattern = ?mapping.url_pattern, "Skipping incomplete servlet mapping");
                    out.gaps.skipped_mappings += 1;
                }
            }
        }
    }
    out
}

/// Routes declared by one source file.
pub fn build_routes_for_file(file: &SourceFile, config: &AssemblerConfig) -> Contribution {
    match &file.detail {
        Some(FileDetail::Config(detail)) => config_routes(detail, &file.path, config),
        Some(FileDetail::Java(detail)) if config.enable_jaxrs => Contribution {
            entities: jaxrs_routes(detail, &file.path),
            ..Contribution::default()
        },
        _ => Contribution::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::inventory::{AnnotationValue, Forward, JavaClass, JavaMethod, MappingGroup};
    use std::collections::BTreeMap;

    fn forward(name: &str, path: &str) -> Forward {
        Forward {
            name: Some(name.to_string()),
            path: path.to_string(),
            line: None,
        }
    }

    fn mapping(path: &str, class: Option<&str>, method: Option<&str>, forwards: Vec<Forward>) -> ActionMapping {
        ActionMapping {
            path: Some(path.to_string()),
            action_class: class.map(str::to_string),
            method: method.map(str::to_string),
            forwards,
            line: Some(12),
            ..ActionMapping::default()
        }
    }

    fn annotation(name: &str, value: Option<&str>) -> Annotation {
        let mut attributes = BTreeMap::new();
        if let Some(v) = value {
            attributes.insert("value".to_string(), AnnotationValue::Scalar(v.to_string()));
        }
        Annotation {
            name: name.to_string(),
            attributes,
            line: None,
        }
    }

    #[test]
    fn test_wildcard_mapping_keeps_placeholder_raw() {
        let m = mapping(
            "/user/*",
            Some("com.shop.UserAction"),
            Some("{1}"),
            vec![forward("success", "/WEB-INF/jsp/user/view.jsp")],
        );
        let route = struts_route(&m, None, "struts.xml").unwrap();
        let attrs = route.route_attrs().unwrap();
        assert_eq!(route.id, "route_user/*");
        assert_eq!(attrs.action, "user/*");
        assert_eq!(attrs.method, None);
        assert_eq!(attrs.method_raw.as_deref(), Some("{1}"));
        assert!(attrs.has_unresolved_method());
        assert_eq!(attrs.result_view.as_deref(), Some("/WEB-INF/jsp/user/view.jsp"));
    }

    #[test]
    fn test_no_declared_method_defaults_to_execute() {
        let m = mapping("/login", Some("LoginAction"), None, vec![]);
        let route = struts_route(&m, None, "struts.xml").unwrap();
        let attrs = route.route_attrs().unwrap();
        assert_eq!(attrs.method.as_deref(), Some("execute"));
        assert_eq!(attrs.method_raw, None);
        assert!(!attrs.has_unresolved_method());
    }

    #[test]
    fn test_primary_view_prefers_success_then_first() {
        let m = mapping(
            "/a",
            None,
            None,
            vec![forward("error", "/err.jsp"), forward("SUCCESS", "/ok.jsp")],
        );
        let route = struts_route(&m, None, "s.xml").unwrap();
        assert_eq!(route.route_attrs().unwrap().result_view.as_deref(), Some("/ok.jsp"));

        let m = mapping("/b", None, None, vec![forward("input", "/in.jsp"), forward("error", "/e.jsp")]);
        let route = struts_route(&m, None, "s.xml").unwrap();
        assert_eq!(route.route_attrs().unwrap().result_view.as_deref(), Some("/in.jsp"));
    }

    #[test]
    fn test_mapping_without_target_is_skipped() {
        let detail = ConfigDetail {
            action_mappings: vec![
                mapping("/empty", None, None, vec![]),
                ActionMapping::default(),
                mapping("/ok", Some("OkAction"), None, vec![]),
            ],
            ..ConfigDetail::default()
        };
        let out = config_routes(&detail, "s.xml", &AssemblerConfig::default());
        assert_eq!(out.entities.len(), 1);
        assert_eq!(out.gaps.skipped_mappings, 2);
    }

    #[test]
    fn test_group_namespace_is_inherited_and_normalized() {
        let detail = ConfigDetail {
            mapping_groups: vec![MappingGroup {
                name: Some("admin".into()),
                namespace: Some("/admin/".into()),
                mappings: vec![
                    mapping("users", Some("UsersAction"), None, vec![]),
                    ActionMapping {
                        namespace: Some("/ops".into()),
                        ..mapping("jobs", Some("JobsAction"), None, vec![])
                    },
                ],
                line: None,
            }],
            ..ConfigDetail::default()
        };
        let out = config_routes(&detail, "struts.xml", &AssemblerConfig::default());
        let ids: Vec<&str> = out.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["route_admin_users", "route_ops_jobs"]);
    }

    #[test]
    fn test_servlet_route_keeps_raw_pattern() {
        let m = ServletMapping {
            servlet_name: Some("orders".into()),
            url_pattern: Some("/api/orders".into()),
            servlet_class: Some("com.shop.OrderServlet".into()),
            line: Some(7),
        };
        let route = servlet_route(&m, "web.xml").unwrap();
        let attrs = route.route_attrs().unwrap();
        assert_eq!(route.id, "route_api/orders");
        assert_eq!(attrs.action, "/api/orders");
        assert_eq!(attrs.framework, Some(Framework::Servlet));
        assert_eq!(attrs.method, None);
    }

    #[test]
    fn test_default_servlet_pattern_is_kept() {
        let detail = ConfigDetail {
            servlet_mappings: vec![ServletMapping {
                servlet_name: Some("front".into()),
                url_pattern: Some("/".into()),
                servlet_class: Some("com.x.Front".into()),
                line: Some(4),
            }],
            ..ConfigDetail::default()
        };
        let out = config_routes(&detail, "web.xml", &AssemblerConfig::default());
        assert_eq!(out.gaps.skipped_mappings, 0);
        assert_eq!(out.entities.len(), 1);
        assert_eq!(out.entities[0].id, "route_/");
        assert_eq!(out.entities[0].route_attrs().unwrap().action, "/");
    }

    #[test]
    fn test_servlet_toggle() {
        let detail = ConfigDetail {
            servlet_mappings: vec![ServletMapping {
                url_pattern: Some("/x".into()),
                servlet_class: Some("X".into()),
                ..ServletMapping::default()
            }],
            ..ConfigDetail::default()
        };
        let disabled = AssemblerConfig {
            enable_servlet: false,
            ..AssemblerConfig::default()
        };
        assert!(config_routes(&detail, "web.xml", &disabled).entities.is_empty());
        assert_eq!(config_routes(&detail, "web.xml", &AssemblerConfig::default()).entities.len(), 1);
    }

    #[test]
    fn test_jaxrs_toggle() {
        let file = SourceFile {
            path: "src/R.java".into(),
            language: Some("java".into()),
            detail: Some(FileDetail::Java(JavaDetail {
                package: None,
                classes: vec![JavaClass {
                    name: "R".into(),
                    annotations: vec![annotation("Path", Some("r"))],
                    methods: vec![JavaMethod {
                        name: "get".into(),
                        annotations: vec![annotation("GET", None)],
                        ..JavaMethod::default()
                    }],
                    ..JavaClass::default()
                }],
            })),
            parse_error: None,
        };
        assert_eq!(build_routes_for_file(&file, &AssemblerConfig::default()).entities.len(), 1);
        let disabled = AssemblerConfig {
            enable_jaxrs: false,
            ..AssemblerConfig::default()
        };
        assert!(build_routes_for_file(&file, &disabled).entities.is_empty());
    }

    #[test]
    fn test_jaxrs_routes_from_annotations() {
        let detail = JavaDetail {
            package: Some("com.shop.api".into()),
            classes: vec![JavaClass {
                name: "OrderResource".into(),
                annotations: vec![annotation("javax.ws.rs.Path", Some("/orders"))],
                methods: vec![
                    JavaMethod {
                        name: "list".into(),
                        annotations: vec![annotation("GET", None)],
                        ..JavaMethod::default()
                    },
                    JavaMethod {
                        name: "byId".into(),
                        annotations: vec![annotation("GET", None), annotation("Path", Some("{id}"))],
                        ..JavaMethod::default()
                    },
                    JavaMethod {
                        name: "helper".into(),
                        ..JavaMethod::default()
                    },
                ],
                ..JavaClass::default()
            }],
        };
        let routes = jaxrs_routes(&detail, "src/OrderResource.java");
        let ids: Vec<&str> = routes.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["route_orders#GET", "route_orders/{id}#GET"]);
        let attrs = routes[1].route_attrs().unwrap();
        assert_eq!(attrs.action_class.as_deref(), Some("com.shop.api.OrderResource"));
        assert_eq!(attrs.method.as_deref(), Some("byId"));
        assert_eq!(attrs.http_method.as_deref(), Some("GET"));
    }

    #[test]
    fn test_jaxrs_verbs_on_one_path_are_distinct_routes() {
        let detail = JavaDetail {
            package: None,
            classes: vec![JavaClass {
                name: "R".into(),
                annotations: vec![annotation("Path", Some("/orders"))],
                methods: vec![
                    JavaMethod {
                        name: "list".into(),
                        annotations: vec![annotation("GET", None)],
                        ..JavaMethod::default()
                    },
                    JavaMethod {
                        name: "create".into(),
                        annotations: vec![annotation("POST", None)],
                        ..JavaMethod::default()
                    },
                ],
                ..JavaClass::default()
            }],
        };
        let routes = jaxrs_routes(&detail, "src/R.java");
        let ids: Vec<&str> = routes.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["route_orders#GET", "route_orders#POST"]);
        assert!(routes.iter().all(|r| r.name == "orders"));
    }
}
