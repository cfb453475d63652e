//! Property Lookup, the Available-Resources Index, and the Reference
//! Resolver: given a `"resource.path"` string, find the `Property` it
//! names and snapshot it for binding into the requesting node.

use std::collections::HashMap;
use std::sync::Arc;

use crate::manifest::{FlowResourceManager, Node};
use crate::property::{Header, Property, PropertyReference};

/// The special breakpoint naming "everything up to the flow's output" —
/// i.e. no node is excluded.
pub const OUTPUT_BREAKPOINT: &str = "output";

pub const INPUT_RESOURCE: &str = "input";
pub const STACK_RESOURCE: &str = "stack";
pub const RESOURCE_REQUEST: &str = "request";
pub const RESOURCE_RESPONSE: &str = "response";
pub const RESOURCE_HEADER: &str = "header";

/// A lookup method that returns the property available on a given path.
pub type PathLookup = Arc<dyn Fn(&str) -> Option<Property> + Send + Sync>;

/// Holds the resource's sub-resources (`request`, `response`, `header`,
/// ...) and their path lookups.
pub type ReferenceMap = HashMap<String, PathLookup>;

/// `resource-name -> ReferenceMap`, built up to a breakpoint node.
pub type ResourceIndex = HashMap<String, ReferenceMap>;

// ---------------------------------------------------------------------
// 4.1 Property Lookup
// ---------------------------------------------------------------------

/// Walks the static property tree rooted at `root` along a dotted path.
/// `"."` resolves to `root` itself (self-reference). A path `a.b.c` walks
/// `Nested[a].Nested[b].Nested[c]` through both `Message` and
/// `Repeated`-of-message children; the first match wins.
pub fn lookup_property(root: &Property, path: &str) -> Option<Property> {
    if path == "." {
        return Some(root.clone());
    }

    search(root, path)
}

fn search(property: &Property, path: &str) -> Option<Property> {
    let children = property.template.children()?;

    for child in children {
        if child.path == path {
            return Some(child.clone());
        }
    }

    for child in children {
        if let Some(found) = search(child, path) {
            return Some(found);
        }
    }

    None
}

/// Header lookups are flat: exact key match only, no dot-traversal.
pub fn lookup_header(header: &Header, path: &str) -> Option<Property> {
    header.get(path).cloned()
}

fn property_path_lookup(root: Property) -> PathLookup {
    Arc::new(move |path: &str| lookup_property(&root, path))
}

fn header_path_lookup(header: Header) -> PathLookup {
    Arc::new(move |path: &str| lookup_header(&header, path))
}

/// Flat lookup over the synthetic stack map (named intermediate properties
/// introduced by transforms — matched by exact name, like a header).
fn flat_path_lookup(entries: HashMap<String, Property>) -> PathLookup {
    Arc::new(move |path: &str| entries.get(path).cloned())
}

// ---------------------------------------------------------------------
// 4.2 Available-Resources Index
// ---------------------------------------------------------------------

/// Builds `map[resource-name -> ReferenceMap]` up to (but excluding) the
/// breakpoint node. `breakpoint == "output"` includes every node.
pub fn available_resources(flow: &dyn FlowResourceManager, breakpoint: &str) -> ResourceIndex {
    let mut index: ResourceIndex = HashMap::with_capacity(flow.nodes().len() + 2);
    let mut stack: HashMap<String, Property> = HashMap::new();

    if let Some(input) = flow.input() {
        let mut refs = ReferenceMap::new();
        if let Some(root) = &input.property {
            refs.insert(
                RESOURCE_REQUEST.to_string(),
                property_path_lookup(root.clone()),
            );
        }
        refs.insert(
            RESOURCE_HEADER.to_string(),
            header_path_lookup(input.header.clone()),
        );
        index.insert(INPUT_RESOURCE.to_string(), refs);
        stack.extend(input.stack.clone());
    }

    for node in flow.nodes() {
        if breakpoint != OUTPUT_BREAKPOINT && node.name == breakpoint {
            break;
        }

        index.insert(node.name.clone(), node_reference_map(node, &mut stack));
    }

    let mut stack_refs = ReferenceMap::new();
    stack_refs.insert(STACK_RESOURCE.to_string(), flat_path_lookup(stack));
    index.insert(STACK_RESOURCE.to_string(), stack_refs);

    index
}

fn node_reference_map(node: &Node, stack: &mut HashMap<String, Property>) -> ReferenceMap {
    let mut refs = ReferenceMap::new();

    let Some(call) = &node.call else {
        return refs;
    };

    if let Some(request) = &call.request {
        if let Some(root) = &request.property {
            refs.insert(
                RESOURCE_REQUEST.to_string(),
                property_path_lookup(root.clone()),
            );
        }
        refs.insert(
            RESOURCE_HEADER.to_string(),
            header_path_lookup(request.header.clone()),
        );
        stack.extend(request.stack.clone());
    }

    if let Some(response) = &call.response {
        if let Some(root) = &response.property {
            refs.insert(
                RESOURCE_RESPONSE.to_string(),
                property_path_lookup(root.clone()),
            );
        }
        stack.extend(response.stack.clone());
    }

    refs
}

// ---------------------------------------------------------------------
// 4.3 Reference Resolver
// ---------------------------------------------------------------------

/// Self-reference rewrite: a resource beginning with `.` is relative to the
/// current breakpoint. A trailing (but not leading) `.` is malformed and
/// left unchanged.
pub fn resolve_self_reference(resource: &str, breakpoint: &str) -> String {
    if resource.starts_with('.') {
        format!("{breakpoint}{resource}")
    } else {
        resource.to_string()
    }
}

fn default_sub_resource(resource: &str) -> &'static str {
    match resource {
        INPUT_RESOURCE => RESOURCE_REQUEST,
        STACK_RESOURCE => STACK_RESOURCE,
        _ => RESOURCE_RESPONSE,
    }
}

/// Resolves a `PropertyReference` against the index built by
/// `available_resources`. Returns `None` on any failure; the caller (the
/// Definer) wraps that into an `UndefinedReference` error with the original
/// expression and the logical location.
pub fn resolve_reference(
    reference: &PropertyReference,
    index: &ResourceIndex,
    breakpoint: &str,
) -> Option<Property> {
    let resource = resolve_self_reference(&reference.resource, breakpoint);

    let mut segments = resource.splitn(2, '.');
    let head = segments.next().unwrap_or_default();
    let tail = segments.next();

    let sub_resource = match tail {
        Some(rest) if !rest.is_empty() => rest,
        _ => default_sub_resource(head),
    };

    let reference_map = index.get(head)?;
    let path_lookup = reference_map.get(sub_resource)?;
    path_lookup(&reference.path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Flow;
    use crate::property::{Label, ParameterMap, ScalarType, Template};

    fn scalar(name: &str, path: &str) -> Property {
        Property::new(name, path, Template::Scalar(ScalarType::String))
    }

    #[test]
    fn self_reference_is_rewritten_relative_to_breakpoint() {
        assert_eq!(
            resolve_self_reference(".request", "input"),
            "input.request"
        );
        assert_eq!(
            resolve_self_reference("input.request", "first"),
            "input.request"
        );
        // malformed trailing dot, no leading dot: left unchanged
        assert_eq!(resolve_self_reference("input.", "first"), "input.");
    }

    #[test]
    fn self_reference_rewrite_is_idempotent() {
        let once = resolve_self_reference(".request", "first");
        let twice = resolve_self_reference(&once, "first");
        assert_eq!(once, twice);
    }

    #[test]
    fn lookup_property_resolves_self_reference_dot() {
        let root = scalar("root", "root");
        assert_eq!(lookup_property(&root, ".").unwrap().path, "root");
    }

    #[test]
    fn lookup_property_walks_nested_repeated_message() {
        let result_prop = scalar("result", "nested.repeated.result");
        let repeated = Property::new(
            "repeated",
            "nested.repeated",
            Template::Repeated(Box::new(Template::Message(vec![result_prop]))),
        );
        let nested = Property::new("nested", "nested", Template::Message(vec![repeated]));
        let root = Property::new("root", "root", Template::Message(vec![nested]));

        let found = lookup_property(&root, "nested.repeated.result").unwrap();
        assert_eq!(found.name, "result");
        assert_eq!(found.path, "nested.repeated.result");
    }

    #[test]
    fn header_lookup_is_exact_match_only() {
        let mut header = Header::new();
        header.insert("X-Token".to_string(), scalar("X-Token", "X-Token"));
        assert!(lookup_header(&header, "X-Token").is_some());
        assert!(lookup_header(&header, "x-token").is_none());
    }

    fn flow_with_two_nodes() -> Flow {
        let mut flow = Flow::new("demo");

        let mut input = ParameterMap::new();
        input.property = Some(Property::new(
            "input",
            "input",
            Template::Message(vec![scalar("id", "id")]),
        ));
        flow.input = Some(input);

        let mut first = crate::manifest::Node::new("first");
        let mut response = ParameterMap::new();
        response.property = Some(Property::new(
            "response",
            "response",
            Template::Message(vec![scalar("message", "message").with_label(Label::Optional)]),
        ));
        first.call = Some(crate::manifest::CallSpec {
            response: Some(response),
            ..Default::default()
        });
        flow.nodes.push(first);

        flow.nodes.push(crate::manifest::Node::new("second"));
        flow
    }

    #[test]
    fn available_resources_stops_strictly_before_breakpoint() {
        let flow = flow_with_two_nodes();
        let index = available_resources(&flow, "second");
        assert!(index.contains_key("first"));
        assert!(!index.contains_key("second"));
        assert!(index.contains_key(INPUT_RESOURCE));
    }

    #[test]
    fn available_resources_output_breakpoint_includes_everything() {
        let flow = flow_with_two_nodes();
        let index = available_resources(&flow, OUTPUT_BREAKPOINT);
        assert!(index.contains_key("first"));
        assert!(index.contains_key("second"));
    }

    #[test]
    fn resolve_reference_finds_response_property() {
        let flow = flow_with_two_nodes();
        let index = available_resources(&flow, "second");
        let reference = PropertyReference::new("first.response", "message");

        let resolved = resolve_reference(&reference, &index, "second").unwrap();
        assert_eq!(resolved.path, "message");
    }

    #[test]
    fn resolve_reference_defaults_input_to_request() {
        let flow = flow_with_two_nodes();
        let index = available_resources(&flow, "second");
        let reference = PropertyReference::new("input", "id");

        let resolved = resolve_reference(&reference, &index, "second").unwrap();
        assert_eq!(resolved.path, "id");
    }

    #[test]
    fn resolve_reference_returns_none_for_unknown_resource() {
        let flow = flow_with_two_nodes();
        let index = available_resources(&flow, "second");
        let reference = PropertyReference::new("unknown.response", "message");
        assert!(resolve_reference(&reference, &index, "second").is_none());
    }
}
