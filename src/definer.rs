//! Manifest Definer: the top-down type/reference binding pass over flows,
//! proxies, calls, rollbacks, and error handlers.

use crate::error::DefinitionError;
use crate::lookup::{self, OUTPUT_BREAKPOINT};
use crate::manifest::{CallSpec, FlowResourceManager, Manifest, Node, OnError};
use crate::property::{ParameterMap, Property, PropertyReference};

/// `DefineManifest(services, schema, flows)`: iterates flows then proxies.
pub fn define_manifest(manifest: &mut Manifest) -> Result<(), DefinitionError> {
    let flow_count = manifest.flows.len();
    for i in 0..flow_count {
        define_flow_at(manifest, i)?;
    }

    let proxy_count = manifest.proxies.len();
    for i in 0..proxy_count {
        define_proxy_at(manifest, i)?;
    }

    Ok(())
}

fn define_flow_at(manifest: &mut Manifest, index: usize) -> Result<(), DefinitionError> {
    let flow_name = manifest.flows[index].name.clone();

    if let Some(schema_name) = manifest.flows[index]
        .input
        .as_ref()
        .map(|p| p.schema.clone())
    {
        let input = manifest
            .schema
            .get_property(&schema_name)
            .ok_or_else(|| DefinitionError::UndefinedSchemaObject {
                object: schema_name.clone(),
            })?
            .clone();
        manifest.flows[index].input = Some(to_parameter_map(schema_name, input));
    }

    if let Some(schema_name) = manifest.flows[index]
        .error
        .as_ref()
        .map(|p| p.schema.clone())
    {
        let error_root = manifest
            .schema
            .get_property(&schema_name)
            .ok_or_else(|| DefinitionError::UndefinedSchemaObject {
                object: schema_name.clone(),
            })?
            .clone();
        manifest.flows[index].error = Some(to_parameter_map(schema_name, error_root));
    }

    let node_count = manifest.flows[index].nodes.len();
    for node_index in 0..node_count {
        define_node(manifest, index, node_index, &flow_name)?;
    }

    if manifest.flows[index].output.is_some() {
        let flow = manifest.flows[index].clone();
        let mut output = flow.output.clone().unwrap();
        define_parameter_map(manifest, None, &mut output, &flow, false)?;
        manifest.flows[index].output = Some(output);
    }

    Ok(())
}

fn define_proxy_at(manifest: &mut Manifest, index: usize) -> Result<(), DefinitionError> {
    if let Some(schema_name) = manifest.proxies[index]
        .input
        .as_ref()
        .map(|p| p.schema.clone())
    {
        let input = manifest
            .schema
            .get_property(&schema_name)
            .ok_or_else(|| DefinitionError::UndefinedSchemaObject {
                object: schema_name.clone(),
            })?
            .clone();
        manifest.proxies[index].input = Some(to_parameter_map(schema_name, input));
    }

    if let Some(schema_name) = manifest.proxies[index]
        .error
        .as_ref()
        .map(|p| p.schema.clone())
    {
        let error_root = manifest
            .schema
            .get_property(&schema_name)
            .ok_or_else(|| DefinitionError::UndefinedSchemaObject {
                object: schema_name.clone(),
            })?
            .clone();
        manifest.proxies[index].error = Some(to_parameter_map(schema_name, error_root));
    }

    let node_count = manifest.proxies[index].nodes.len();
    for node_index in 0..node_count {
        define_proxy_node(manifest, index, node_index)?;
    }

    if let Some(forward) = manifest.proxies[index].forward.clone() {
        let proxy = manifest.proxies[index].clone();
        for (_, header_prop) in forward.header.iter() {
            let mut header_prop = header_prop.clone();
            define_property(manifest, None, &mut header_prop, &proxy, false)?;
        }
    }

    Ok(())
}

fn to_parameter_map(schema: String, root: Property) -> ParameterMap {
    let mut map = ParameterMap::new();
    map.schema = schema;
    map.property = Some(root);
    map
}

fn define_node(
    manifest: &mut Manifest,
    flow_index: usize,
    node_index: usize,
    flow_name: &str,
) -> Result<(), DefinitionError> {
    if manifest.flows[flow_index].nodes[node_index].call.is_some() {
        define_call(manifest, flow_index, node_index, flow_name, CallSlot::Call)?;
    }

    if manifest.flows[flow_index].nodes[node_index].rollback.is_some() {
        define_call(
            manifest,
            flow_index,
            node_index,
            flow_name,
            CallSlot::Rollback,
        )?;
    }

    if manifest.flows[flow_index].nodes[node_index].on_error.is_some() {
        let flow = manifest.flows[flow_index].clone();
        let node = flow.nodes[node_index].clone();
        let mut on_error = node.on_error.clone().unwrap();
        define_error(manifest, &node, &mut on_error, &flow)?;
        manifest.flows[flow_index].nodes[node_index].on_error = Some(on_error);
    }

    Ok(())
}

fn define_proxy_node(manifest: &mut Manifest, proxy_index: usize, node_index: usize) -> Result<(), DefinitionError> {
    if manifest.proxies[proxy_index].nodes[node_index].call.is_some() {
        define_call_on_proxy(manifest, proxy_index, node_index, CallSlot::Call)?;
    }

    if manifest.proxies[proxy_index].nodes[node_index].rollback.is_some() {
        define_call_on_proxy(manifest, proxy_index, node_index, CallSlot::Rollback)?;
    }

    if manifest.proxies[proxy_index].nodes[node_index].on_error.is_some() {
        let proxy = manifest.proxies[proxy_index].clone();
        let node = proxy.nodes[node_index].clone();
        let mut on_error = node.on_error.clone().unwrap();
        define_error(manifest, &node, &mut on_error, &proxy)?;
        manifest.proxies[proxy_index].nodes[node_index].on_error = Some(on_error);
    }

    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CallSlot {
    Call,
    Rollback,
}

fn define_call(
    manifest: &mut Manifest,
    flow_index: usize,
    node_index: usize,
    flow_name: &str,
    slot: CallSlot,
) -> Result<(), DefinitionError> {
    let flow = manifest.flows[flow_index].clone();
    let node = flow.nodes[node_index].clone();
    let mut call = match slot {
        CallSlot::Call => node.call.clone().unwrap(),
        CallSlot::Rollback => node.rollback.clone().unwrap(),
    };

    define_call_body(manifest, &node, &mut call, &flow, flow_name, slot)?;

    match slot {
        CallSlot::Call => manifest.flows[flow_index].nodes[node_index].call = Some(call),
        CallSlot::Rollback => manifest.flows[flow_index].nodes[node_index].rollback = Some(call),
    }

    Ok(())
}

fn define_call_on_proxy(
    manifest: &mut Manifest,
    proxy_index: usize,
    node_index: usize,
    slot: CallSlot,
) -> Result<(), DefinitionError> {
    let proxy = manifest.proxies[proxy_index].clone();
    let node = proxy.nodes[node_index].clone();
    let flow_name = proxy.name.clone();
    let mut call = match slot {
        CallSlot::Call => node.call.clone().unwrap(),
        CallSlot::Rollback => node.rollback.clone().unwrap(),
    };

    define_call_body(manifest, &node, &mut call, &proxy, &flow_name, slot)?;

    match slot {
        CallSlot::Call => manifest.proxies[proxy_index].nodes[node_index].call = Some(call),
        CallSlot::Rollback => manifest.proxies[proxy_index].nodes[node_index].rollback = Some(call),
    }

    Ok(())
}

/// `DefineCall`: types a call's request as-is, resolves `(service, method)`
/// against the catalog when declared, synthesizes the response from the
/// method's output schema, then types the response.
///
/// A rollback's own request is resolved with the breakpoint advanced to the
/// next node in declared order: by the time a rollback fires, every node
/// that ran after it has already completed, so its request may reference
/// their resources. The forward call's request never gets this advance.
fn define_call_body(
    manifest: &Manifest,
    node: &Node,
    call: &mut CallSpec,
    flow: &dyn FlowResourceManager,
    flow_name: &str,
    slot: CallSlot,
) -> Result<(), DefinitionError> {
    if let Some(request) = call.request.as_mut() {
        define_parameter_map(manifest, Some(node), request, flow, slot == CallSlot::Rollback)?;
    }

    if call.has_method() {
        let service = manifest
            .services
            .get_service(&call.service)
            .ok_or_else(|| DefinitionError::UndefinedService {
                flow: flow_name.to_string(),
                service: call.service.clone(),
            })?;

        let method = service.get_method(&call.method).ok_or_else(|| {
            DefinitionError::UndefinedMethod {
                flow: flow_name.to_string(),
                method: call.method.clone(),
            }
        })?;

        let output = manifest
            .schema
            .get_property(&method.output)
            .ok_or_else(|| DefinitionError::UndefinedSchemaObject {
                object: method.output.clone(),
            })?
            .clone();

        call.descriptor = Some(method.clone());
        call.response = Some(to_parameter_map(String::new(), output));
    }

    if let Some(response) = call.response.as_mut() {
        define_parameter_map(manifest, Some(node), response, flow, false)?;
    }

    Ok(())
}

/// `DefineError`: resolves every param reference declared on an `OnError`.
fn define_error(
    manifest: &Manifest,
    node: &Node,
    on_error: &mut OnError,
    flow: &dyn FlowResourceManager,
) -> Result<(), DefinitionError> {
    let _ = manifest;
    for (_, param) in on_error.params.iter_mut() {
        let resolved = lookup_reference(&node.name, param, flow)?;
        bind_property_reference(param, resolved);
    }
    Ok(())
}

/// `DefineParameterMap`: types header, params, then the root property tree.
/// `advance_breakpoint` is set only while defining a rollback's own request.
fn define_parameter_map(
    manifest: &Manifest,
    node: Option<&Node>,
    params: &mut ParameterMap,
    flow: &dyn FlowResourceManager,
    advance_breakpoint: bool,
) -> Result<(), DefinitionError> {
    let Some(root) = params.property.as_mut() else {
        return Ok(());
    };

    for (_, header_prop) in params.header.iter_mut() {
        define_property(manifest, node, header_prop, flow, advance_breakpoint)?;
    }

    define_params(manifest, node, &mut params.params, flow, advance_breakpoint)?;
    define_property(manifest, node, root, flow, advance_breakpoint)?;

    Ok(())
}

/// `DefineParams`: types every named reference in a `params` map.
fn define_params(
    manifest: &Manifest,
    node: Option<&Node>,
    params: &mut std::collections::HashMap<String, PropertyReference>,
    flow: &dyn FlowResourceManager,
    advance_breakpoint: bool,
) -> Result<(), DefinitionError> {
    let _ = manifest;
    let node_name = node.map(|n| n.name.clone()).unwrap_or_default();
    let breakpoint = if advance_breakpoint {
        next_node_name(flow, &node_name).unwrap_or(node_name)
    } else {
        node_name
    };
    for (_, param) in params.iter_mut() {
        let resolved = lookup_reference(&breakpoint, param, flow)?;
        bind_property_reference(param, resolved);
    }
    Ok(())
}

/// `DefineProperty`: recurses into nested properties first, then resolves
/// this property's own reference (if any) against the breakpoint — which
/// is advanced to the next node when `advance_breakpoint` is set (the
/// rollback-inside-request rule; see `define_call_body`).
fn define_property(
    manifest: &Manifest,
    node: Option<&Node>,
    property: &mut Property,
    flow: &dyn FlowResourceManager,
    advance_breakpoint: bool,
) -> Result<(), DefinitionError> {
    if let Some(children) = property.template.children_mut() {
        for child in children.iter_mut() {
            define_property(manifest, node, child, flow, advance_breakpoint)?;
        }
    }

    let Some(reference) = property.reference.clone() else {
        return Ok(());
    };

    let mut breakpoint = OUTPUT_BREAKPOINT.to_string();
    if let Some(node) = node {
        breakpoint = node.name.clone();

        if advance_breakpoint {
            breakpoint = next_node_name(flow, &breakpoint).unwrap_or(breakpoint);
        }
    }

    let _ = manifest;
    let resolved = lookup_reference(&breakpoint, &reference, flow).map_err(|_| {
        DefinitionError::UndefinedReference {
            flow: flow.name().to_string(),
            breakpoint: breakpoint.clone(),
            reference: reference.to_string(),
            expr: property.expr.clone(),
        }
    })?;

    property.reference = Some(reference);
    property.bind_resolved(resolved);

    Ok(())
}

/// `LookupReference`: rewrites self-references, builds the available-
/// resources index up to `breakpoint`, and resolves the reference.
fn lookup_reference(
    breakpoint: &str,
    reference: &PropertyReference,
    flow: &dyn FlowResourceManager,
) -> Result<crate::property::ResolvedReference, DefinitionError> {
    let rewritten = lookup::resolve_self_reference(&reference.resource, breakpoint);
    let rewritten_reference = PropertyReference::new(rewritten, reference.path.clone());

    let index = lookup::available_resources(flow, breakpoint);
    let found = lookup::resolve_reference(&rewritten_reference, &index, breakpoint).ok_or_else(|| {
        DefinitionError::UndefinedReference {
            flow: flow.name().to_string(),
            breakpoint: breakpoint.to_string(),
            reference: reference.to_string(),
            expr: None,
        }
    })?;

    Ok(crate::property::ResolvedReference {
        name: found.name,
        path: found.path,
        template: found.template,
        label: found.label,
        default: found.default,
    })
}

fn bind_property_reference(
    reference: &mut PropertyReference,
    resolved: crate::property::ResolvedReference,
) {
    reference.property = Some(resolved);
}

/// The next node name in declared order after `breakpoint`, or `breakpoint`
/// unchanged if it's the last node (mirrors `lookup.GetNextResource`).
fn next_node_name(flow: &dyn FlowResourceManager, breakpoint: &str) -> Option<String> {
    let nodes = flow.nodes();
    let position = nodes.iter().position(|n| n.name == breakpoint)?;
    nodes.get(position + 1).map(|n| n.name.clone())
}
