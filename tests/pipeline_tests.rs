//! End-to-end coverage of the manifest pipeline: load -> resolve
//! dependencies -> define -> execute, against a manifest written to a temp
//! file.

use std::io::Write;
use std::sync::Arc;

use tempfile::NamedTempFile;

use relay_flow::caller::StubCaller;
use relay_flow::manager::{Context, Manager, RuntimeNode};
use relay_flow::manifest::FlowResourceManager;
use relay_flow::store::ReferenceStore;
use relay_flow::{config, definer, dependencies};

fn write_manifest(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("failed to create temp file");
    write!(file, "{contents}").expect("failed to write manifest");
    file
}

const GREETING_MANIFEST: &str = r#"
services:
  - name: greeter
    methods:
      - name: Greet
        output: Greeting

schema:
  Input:
    type: message
    properties:
      - name: id
        type: string
        label: required
  Greeting:
    type: message
    properties:
      - name: message
        type: string
  Output:
    type: message
    properties:
      - name: final_message
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

fn build_manager(path: &std::path::Path, flow_name: &str) -> Arc<Manager> {
    let mut manifest = config::load_manifest(path).expect("manifest should load");
    dependencies::resolve_manifest_dependencies(&mut manifest).expect("dependencies should resolve");
    definer::define_manifest(&mut manifest).expect("manifest should define");

    let flow = manifest.get_flow(flow_name).expect("flow should exist");
    let nodes = flow
        .nodes()
        .iter()
        .map(|node| RuntimeNode {
            name: node.name.clone(),
            call: node
                .call
                .as_ref()
                .map(|_| Arc::new(StubCaller::new(node.name.clone())) as _),
            rollback: None,
            previous: node.previous.clone(),
            next: node.next.clone(),
        })
        .collect();

    Arc::new(Manager::new(flow_name, nodes))
}

#[tokio::test]
async fn manifest_loads_resolves_defines_and_executes() {
    let file = write_manifest(GREETING_MANIFEST);
    let manager = build_manager(file.path(), "greeting");

    let result = manager
        .do_flow(Arc::new(Context::new()), Arc::new(ReferenceStore::new()))
        .await;

    assert!(result.is_ok(), "expected flow to succeed, got {result:?}");
}

#[test]
fn dependency_cycle_is_rejected_before_definition() {
    let yaml = r#"
flows:
  - name: a
    nodes: []
    depends_on: [b]
  - name: b
    nodes: []
    depends_on: [a]
"#;
    let file = write_manifest(yaml);
    let mut manifest = config::load_manifest(file.path()).unwrap();
    let err = dependencies::resolve_manifest_dependencies(&mut manifest).unwrap_err();
    assert!(matches!(
        err,
        relay_flow::error::DefinitionError::CircularDependency { kind: "flow", .. }
    ));
}

#[test]
fn undefined_service_is_rejected_at_definition_time() {
    let yaml = r#"
flows:
  - name: demo
    nodes:
      - name: first
        call:
          service: missing
          method: Do
"#;
    let file = write_manifest(yaml);
    let mut manifest = config::load_manifest(file.path()).unwrap();
    dependencies::resolve_manifest_dependencies(&mut manifest).unwrap();
    let err = definer::define_manifest(&mut manifest).unwrap_err();
    assert!(matches!(
        err,
        relay_flow::error::DefinitionError::UndefinedService { .. }
    ));
}
