//! Manifest config loader: deserializes a YAML/JSON manifest (services,
//! schema message templates, flows, proxies) into the static data model of
//! `crate::manifest`. Reads the file to a string and hands it to
//! `serde_yaml::from_str` (or `serde_json::from_str` by extension),
//! returning `anyhow::Result`, generalized from one flat step list to the
//! full services/schema/flows/proxies manifest shape.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::manifest::{
    CallSpec, DependencyEdge, Flow, Forward, Manifest, MethodDescriptor, Node, OnError, Proxy,
    ServiceDescriptor, ServicesManifest,
};
use crate::property::{EnumDescriptor, Label, ParameterMap, Property, PropertyReference, ScalarType, Template, Value};

/// Reads a manifest from disk, dispatching on extension (`.json` vs.
/// everything else treated as YAML, since YAML is a superset of JSON).
pub fn load_manifest(path: &Path) -> anyhow::Result<Manifest> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading manifest {}: {e}", path.display()))?;

    let dto: ManifestDto = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&raw)?
    } else {
        serde_yaml::from_str(&raw)?
    };

    dto.into_manifest()
}

#[derive(Debug, Deserialize, Default)]
struct ManifestDto {
    #[serde(default)]
    services: Vec<ServiceDto>,
    #[serde(default)]
    schema: HashMap<String, PropertyDto>,
    #[serde(default)]
    flows: Vec<FlowDto>,
    #[serde(default)]
    proxies: Vec<ProxyDto>,
}

#[derive(Debug, Deserialize)]
struct ServiceDto {
    name: String,
    #[serde(default)]
    methods: Vec<MethodDto>,
}

#[derive(Debug, Deserialize)]
struct MethodDto {
    name: String,
    output: String,
}

#[derive(Debug, Deserialize)]
struct FlowDto {
    name: String,
    input: Option<String>,
    output: Option<String>,
    error: Option<String>,
    #[serde(default)]
    nodes: Vec<NodeDto>,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProxyDto {
    name: String,
    input: Option<String>,
    error: Option<String>,
    #[serde(default)]
    nodes: Vec<NodeDto>,
    #[serde(default)]
    forward: Option<ForwardDto>,
}

#[derive(Debug, Deserialize)]
struct ForwardDto {
    #[serde(default)]
    header: Vec<PropertyDto>,
}

#[derive(Debug, Deserialize)]
struct NodeDto {
    name: String,
    #[serde(default)]
    call: Option<CallSpecDto>,
    #[serde(default)]
    rollback: Option<CallSpecDto>,
    #[serde(default)]
    on_error: Option<OnErrorDto>,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CallSpecDto {
    #[serde(default)]
    service: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    request: Option<ParameterMapDto>,
    #[serde(default)]
    response: Option<ParameterMapDto>,
}

#[derive(Debug, Deserialize, Default)]
struct OnErrorDto {
    #[serde(default)]
    params: HashMap<String, String>,
}

/// A root of a message tree: either bound to a named schema object (flow
/// input/output/error) or given its own ad hoc `properties` (a call's
/// request/response body).
#[derive(Debug, Deserialize, Default)]
struct ParameterMapDto {
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    properties: Vec<PropertyDto>,
    #[serde(default)]
    header: Vec<PropertyDto>,
    #[serde(default)]
    params: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PropertyDto {
    #[serde(default)]
    name: String,
    /// One of the scalar type names, `"message"`, or `"enum"`.
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    default: Option<serde_yaml::Value>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    properties: Vec<PropertyDto>,
    #[serde(default)]
    enum_name: Option<String>,
    #[serde(default)]
    enum_values: HashMap<String, i32>,
}

impl ManifestDto {
    fn into_manifest(self) -> anyhow::Result<Manifest> {
        let services = self
            .services
            .into_iter()
            .map(|s| ServiceDescriptor {
                name: s.name,
                methods: s
                    .methods
                    .into_iter()
                    .map(|m| MethodDescriptor {
                        name: m.name,
                        output: m.output,
                    })
                    .collect(),
            })
            .collect();

        let mut objects = HashMap::with_capacity(self.schema.len());
        for (name, dto) in self.schema {
            let root_name = name.clone();
            objects.insert(name, build_property(&dto, &root_name, "", 0)?);
        }

        let flows = self
            .flows
            .into_iter()
            .map(FlowDto::into_flow)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let proxies = self
            .proxies
            .into_iter()
            .map(ProxyDto::into_proxy)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Manifest {
            services: ServicesManifest { services },
            schema: crate::manifest::SchemaManifest { objects },
            flows,
            proxies,
        })
    }
}

impl FlowDto {
    fn into_flow(self) -> anyhow::Result<Flow> {
        Ok(Flow {
            name: self.name,
            input: self.input.map(schema_parameter_map),
            output: self.output.map(schema_parameter_map),
            error: self.error.map(schema_parameter_map),
            nodes: self
                .nodes
                .into_iter()
                .map(NodeDto::into_node)
                .collect::<anyhow::Result<Vec<_>>>()?,
            depends_on: unresolved_edges(self.depends_on),
        })
    }
}

impl ProxyDto {
    fn into_proxy(self) -> anyhow::Result<Proxy> {
        Ok(Proxy {
            name: self.name,
            input: self.input.map(schema_parameter_map),
            error: self.error.map(schema_parameter_map),
            nodes: self
                .nodes
                .into_iter()
                .map(NodeDto::into_node)
                .collect::<anyhow::Result<Vec<_>>>()?,
            forward: self
                .forward
                .map(|f| -> anyhow::Result<Forward> {
                    let mut header = crate::property::Header::new();
                    for (position, prop) in f.header.iter().enumerate() {
                        let built = build_property(prop, &prop.name, "", position as u32)?;
                        header.insert(built.name.clone(), built);
                    }
                    Ok(Forward { header })
                })
                .transpose()?,
        })
    }
}

impl NodeDto {
    fn into_node(self) -> anyhow::Result<Node> {
        Ok(Node {
            name: self.name,
            call: self.call.map(CallSpecDto::into_call_spec).transpose()?,
            rollback: self.rollback.map(CallSpecDto::into_call_spec).transpose()?,
            on_error: self.on_error.map(OnErrorDto::into_on_error).transpose()?,
            depends_on: unresolved_edges(self.depends_on),
            previous: Vec::new(),
            next: Vec::new(),
        })
    }
}

impl CallSpecDto {
    fn into_call_spec(self) -> anyhow::Result<CallSpec> {
        Ok(CallSpec {
            service: self.service,
            method: self.method,
            request: self
                .request
                .map(|r| r.into_parameter_map("request"))
                .transpose()?,
            response: self
                .response
                .map(|r| r.into_parameter_map("response"))
                .transpose()?,
            descriptor: None,
        })
    }
}

impl OnErrorDto {
    fn into_on_error(self) -> anyhow::Result<OnError> {
        let mut params = HashMap::with_capacity(self.params.len());
        for (name, reference) in self.params {
            params.insert(name, parse_reference(&reference)?);
        }
        Ok(OnError { params })
    }
}

impl ParameterMapDto {
    fn into_parameter_map(self, root_name: &str) -> anyhow::Result<ParameterMap> {
        let mut map = ParameterMap::new();

        if let Some(schema) = self.schema {
            map.schema = schema;
        } else if !self.properties.is_empty() {
            let children = build_children(&self.properties, "")?;
            map.property = Some(Property::new(root_name, root_name, Template::Message(children)));
        }

        for (position, prop) in self.header.iter().enumerate() {
            let built = build_property(prop, &prop.name, "", position as u32)?;
            map.header.insert(built.name.clone(), built);
        }

        for (name, reference) in self.params {
            map.params.insert(name, parse_reference(&reference)?);
        }

        Ok(map)
    }
}

fn schema_parameter_map(schema: String) -> ParameterMap {
    let mut map = ParameterMap::new();
    map.schema = schema;
    map
}

fn unresolved_edges(names: Vec<String>) -> HashMap<String, DependencyEdge> {
    names.into_iter().map(|n| (n, DependencyEdge::Unresolved)).collect()
}

/// `"resource:path"`, the same shape `PropertyReference`'s `Display` impl
/// produces, parsed back into its two halves.
fn parse_reference(raw: &str) -> anyhow::Result<PropertyReference> {
    let (resource, path) = raw
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("malformed reference '{raw}', expected 'resource:path'"))?;
    Ok(PropertyReference::new(resource, path))
}

fn build_children(dtos: &[PropertyDto], parent_path: &str) -> anyhow::Result<Vec<Property>> {
    dtos.iter()
        .enumerate()
        .map(|(position, dto)| build_property(dto, &dto.name, parent_path, position as u32))
        .collect()
}

/// Builds one `Property` (and, recursively, its children) from a DTO node.
/// `parent_path` is the dot-joined path of the enclosing property, empty at
/// the root.
fn build_property(
    dto: &PropertyDto,
    name: &str,
    parent_path: &str,
    position: u32,
) -> anyhow::Result<Property> {
    let path = if parent_path.is_empty() {
        name.to_string()
    } else {
        format!("{parent_path}.{name}")
    };

    let label = match dto.label.as_deref() {
        Some(raw) => Label::parse(raw)
            .ok_or_else(|| anyhow::anyhow!("unknown label '{raw}' on property '{path}'"))?,
        None => Label::Optional,
    };

    let base_template = build_base_template(dto, &path)?;
    let template = if label == Label::Repeated {
        Template::Repeated(Box::new(base_template))
    } else {
        base_template
    };

    let default = dto
        .default
        .as_ref()
        .map(|raw| build_default(dto, raw, &path))
        .transpose()?;

    let mut property = Property::new(name, path, template).with_label(label);
    property.position = position;
    property.default = default;

    if let Some(reference) = &dto.reference {
        property = property.with_reference(parse_reference(reference)?);
    }

    Ok(property)
}

fn build_base_template(dto: &PropertyDto, path: &str) -> anyhow::Result<Template> {
    match dto.kind.as_str() {
        "message" => Ok(Template::Message(build_children(&dto.properties, path)?)),
        "enum" => Ok(Template::Enum(EnumDescriptor {
            name: dto.enum_name.clone().unwrap_or_default(),
            values: dto.enum_values.clone(),
        })),
        scalar => Ok(Template::Scalar(parse_scalar_type(scalar, path)?)),
    }
}

fn parse_scalar_type(raw: &str, path: &str) -> anyhow::Result<ScalarType> {
    match raw {
        "bool" => Ok(ScalarType::Bool),
        "int32" => Ok(ScalarType::Int32),
        "int64" => Ok(ScalarType::Int64),
        "uint32" => Ok(ScalarType::UInt32),
        "uint64" => Ok(ScalarType::UInt64),
        "float" => Ok(ScalarType::Float),
        "double" => Ok(ScalarType::Double),
        "string" => Ok(ScalarType::String),
        "bytes" => Ok(ScalarType::Bytes),
        other => Err(anyhow::anyhow!("unknown scalar type '{other}' on property '{path}'")),
    }
}

fn build_default(dto: &PropertyDto, raw: &serde_yaml::Value, path: &str) -> anyhow::Result<Value> {
    match dto.kind.as_str() {
        "bool" => raw
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| anyhow::anyhow!("default for '{path}' is not a bool")),
        "int32" => raw
            .as_i64()
            .map(|v| Value::Int32(v as i32))
            .ok_or_else(|| anyhow::anyhow!("default for '{path}' is not an integer")),
        "int64" => raw
            .as_i64()
            .map(Value::Int64)
            .ok_or_else(|| anyhow::anyhow!("default for '{path}' is not an integer")),
        "uint32" => raw
            .as_u64()
            .map(|v| Value::UInt32(v as u32))
            .ok_or_else(|| anyhow::anyhow!("default for '{path}' is not an unsigned integer")),
        "uint64" => raw
            .as_u64()
            .map(Value::UInt64)
            .ok_or_else(|| anyhow::anyhow!("default for '{path}' is not an unsigned integer")),
        "float" => raw
            .as_f64()
            .map(|v| Value::Float(v as f32))
            .ok_or_else(|| anyhow::anyhow!("default for '{path}' is not a float")),
        "double" => raw
            .as_f64()
            .map(Value::Double)
            .ok_or_else(|| anyhow::anyhow!("default for '{path}' is not a float")),
        "string" => raw
            .as_str()
            .map(|v| Value::String(v.to_string()))
            .ok_or_else(|| anyhow::anyhow!("default for '{path}' is not a string")),
        "bytes" => raw
            .as_str()
            .map(|v| Value::Bytes(v.as_bytes().to_vec()))
            .ok_or_else(|| anyhow::anyhow!("default for '{path}' is not a string")),
        _ => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST_YAML: &str = r#"
services:
  - name: greeter
    methods:
      - name: Greet
        output: Output

schema:
  Input:
    type: message
    properties:
      - name: id
        type: string
        label: required
  Output:
    type: message
    properties:
      - name: message
        type: string

flows:
  - name: greeting
    input: Input
    output: Output
    nodes:
      - name: first
        call:
          service: greeter
          method: Greet
      - name: second
        call:
          request:
            properties:
              - name: text
                type: string
                reference: "first.response:message"
        depends_on: [first]
"#;

    #[test]
    fn loads_services_schema_flows_and_node_dependencies() {
        let dto: ManifestDto = serde_yaml::from_str(MANIFEST_YAML).unwrap();
        let manifest = dto.into_manifest().unwrap();

        assert_eq!(manifest.services.get_service("greeter").unwrap().name, "greeter");
        assert!(manifest.schema.get_property("Input").is_some());

        let flow = manifest.get_flow("greeting").unwrap();
        assert_eq!(flow.nodes.len(), 2);
        assert_eq!(flow.nodes[0].call.as_ref().unwrap().method, "Greet");
        assert!(flow.nodes[1].depends_on.contains_key("first"));

        let second_request = flow.nodes[1]
            .call
            .as_ref()
            .unwrap()
            .request
            .as_ref()
            .unwrap()
            .property
            .as_ref()
            .unwrap();
        let text = &second_request.template.children().unwrap()[0];
        assert_eq!(text.reference.as_ref().unwrap().resource, "first.response");
    }

    #[test]
    fn unknown_label_is_rejected() {
        let yaml = r#"
schema:
  Bad:
    type: message
    properties:
      - name: id
        type: string
        label: sideways
"#;
        let dto: ManifestDto = serde_yaml::from_str(yaml).unwrap();
        assert!(dto.into_manifest().is_err());
    }

    #[test]
    fn repeated_label_wraps_template() {
        let yaml = r#"
schema:
  List:
    type: message
    properties:
      - name: items
        type: string
        label: repeated
"#;
        let dto: ManifestDto = serde_yaml::from_str(yaml).unwrap();
        let manifest = dto.into_manifest().unwrap();
        let list = manifest.schema.get_property("List").unwrap();
        let items = &list.template.children().unwrap()[0];
        assert!(matches!(items.template, Template::Repeated(_)));
    }
}
