//! The static manifest: services, schema objects, flows, proxies, nodes.
//! This is the object graph the Manifest Definer (`crate::definer`) types
//! and the Flow Manager (`crate::manager`) executes; the deserialization
//! from YAML lives in `crate::config`.

use std::collections::HashMap;

use crate::property::ParameterMap;

/// A method exposed by a service, resolved by name during `DefineCall`.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: String,
    /// Name of the schema object describing this method's output message.
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn get_method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServicesManifest {
    pub services: Vec<ServiceDescriptor>,
}

impl ServicesManifest {
    pub fn get_service(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Named schema message templates, referenced by `Input`/`Error`/method
/// output bindings.
#[derive(Debug, Clone, Default)]
pub struct SchemaManifest {
    pub objects: HashMap<String, crate::property::Property>,
}

impl SchemaManifest {
    pub fn get_property(&self, name: &str) -> Option<&crate::property::Property> {
        self.objects.get(name)
    }
}

/// The declarative forward action / compensating action of a node. The
/// same shape backs both `Node::call` and `Node::rollback`.
#[derive(Debug, Clone, Default)]
pub struct CallSpec {
    pub service: String,
    pub method: String,
    pub request: Option<ParameterMap>,
    pub response: Option<ParameterMap>,
    pub descriptor: Option<MethodDescriptor>,
}

impl CallSpec {
    /// Whether this call declares a `(Service, Method)` pair to resolve
    /// against the service catalog, as opposed to a request-only call whose
    /// response was provided as-is by the user.
    pub fn has_method(&self) -> bool {
        !self.method.is_empty()
    }
}

/// Error-enrichment spec attached to a node.
#[derive(Debug, Clone, Default)]
pub struct OnError {
    pub params: HashMap<String, crate::property::PropertyReference>,
}

/// An edge in a `DependsOn` map. Starts `Unresolved`; the Dependency
/// Resolver mutates it to a resolved index for fast runtime traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyEdge {
    Unresolved,
    ResolvedFlow(usize),
    ResolvedCall(usize),
}

/// A unit of execution within a flow.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub call: Option<CallSpec>,
    pub rollback: Option<CallSpec>,
    pub on_error: Option<OnError>,
    /// Node-to-node `DependsOn`, keyed by predecessor node name.
    pub depends_on: HashMap<String, DependencyEdge>,
    /// Computed edge lists, populated once `depends_on` resolves: indices
    /// into the owning flow's `nodes`.
    pub previous: Vec<usize>,
    pub next: Vec<usize>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            call: None,
            rollback: None,
            on_error: None,
            depends_on: HashMap::new(),
            previous: Vec::new(),
            next: Vec::new(),
        }
    }
}

/// Capability set shared by `Flow` and `Proxy` so the Definer and Resolver
/// can accept either without duplicating code (design note: replaces
/// source-style structural typing with an explicit trait object).
pub trait FlowResourceManager {
    fn name(&self) -> &str;
    fn nodes(&self) -> &[Node];
    fn nodes_mut(&mut self) -> &mut Vec<Node>;
    fn input(&self) -> Option<&ParameterMap>;
    /// `Output` for a flow, always `None` for a proxy (a proxy forwards raw
    /// bytes instead of producing a typed output).
    fn output(&self) -> Option<&ParameterMap>;
    fn error(&self) -> Option<&ParameterMap>;
}

/// An ordered collection of nodes with input/output/error and flow-to-flow
/// dependencies.
#[derive(Debug, Clone)]
pub struct Flow {
    pub name: String,
    pub input: Option<ParameterMap>,
    pub output: Option<ParameterMap>,
    pub error: Option<ParameterMap>,
    pub nodes: Vec<Node>,
    pub depends_on: HashMap<String, DependencyEdge>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Flow {
            name: name.into(),
            input: None,
            output: None,
            error: None,
            nodes: Vec::new(),
            depends_on: HashMap::new(),
        }
    }
}

impl FlowResourceManager for Flow {
    fn name(&self) -> &str {
        &self.name
    }
    fn nodes(&self) -> &[Node] {
        &self.nodes
    }
    fn nodes_mut(&mut self) -> &mut Vec<Node> {
        &mut self.nodes
    }
    fn input(&self) -> Option<&ParameterMap> {
        self.input.as_ref()
    }
    fn output(&self) -> Option<&ParameterMap> {
        self.output.as_ref()
    }
    fn error(&self) -> Option<&ParameterMap> {
        self.error.as_ref()
    }
}

/// Raw forwarding spec for a proxy's terminal behavior.
#[derive(Debug, Clone, Default)]
pub struct Forward {
    pub header: crate::property::Header,
}

/// A flow variant whose terminal behavior is to forward raw request bytes
/// rather than produce a typed output.
#[derive(Debug, Clone)]
pub struct Proxy {
    pub name: String,
    pub input: Option<ParameterMap>,
    pub error: Option<ParameterMap>,
    pub nodes: Vec<Node>,
    pub forward: Option<Forward>,
}

impl Proxy {
    pub fn new(name: impl Into<String>) -> Self {
        Proxy {
            name: name.into(),
            input: None,
            error: None,
            nodes: Vec::new(),
            forward: None,
        }
    }
}

impl FlowResourceManager for Proxy {
    fn name(&self) -> &str {
        &self.name
    }
    fn nodes(&self) -> &[Node] {
        &self.nodes
    }
    fn nodes_mut(&mut self) -> &mut Vec<Node> {
        &mut self.nodes
    }
    fn input(&self) -> Option<&ParameterMap> {
        self.input.as_ref()
    }
    fn output(&self) -> Option<&ParameterMap> {
        None
    }
    fn error(&self) -> Option<&ParameterMap> {
        self.error.as_ref()
    }
}

/// The full manifest: services, schema, flows, proxies.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub services: ServicesManifest,
    pub schema: SchemaManifest,
    pub flows: Vec<Flow>,
    pub proxies: Vec<Proxy>,
}

impl Manifest {
    pub fn get_flow(&self, name: &str) -> Option<&Flow> {
        self.flows.iter().find(|f| f.name == name)
    }

    pub fn get_flow_mut(&mut self, name: &str) -> Option<&mut Flow> {
        self.flows.iter_mut().find(|f| f.name == name)
    }
}
