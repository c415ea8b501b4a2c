//! Persisted graph description tests.

use std::sync::Arc;

use cascade_core::{
    GraphDescription, GraphError, GraphModel, GraphSection, InputSlot, NodeKindRegistry, PropertyValue,
};

fn registry() -> Arc<NodeKindRegistry> {
    Arc::new(NodeKindRegistry::builtin())
}

#[test]
fn test_save_load_preserves_structure() {
    let mut g = GraphModel::new(registry());
    let read = g.add_node("read", None).unwrap();
    let blur = g.add_node("blur", Some("soft")).unwrap();
    let merge = g.add_node("merge", None).unwrap();
    let solid = g.add_node("solid", None).unwrap();
    g.connect(read, 0, blur, 0).unwrap();
    g.connect(blur, 0, merge, 0).unwrap();
    g.connect(solid, 0, merge, 1).unwrap();
    g.set_property_str(read, 0, "shots/a_0001.png,shots/a_0002.png").unwrap();
    g.set_property(blur, 0, PropertyValue::Int(12)).unwrap();
    g.set_property_str(solid, 0, "0.25,0.5,0.75,1").unwrap();
    g.move_node(merge, 300, 40).unwrap();

    let json = g.to_json().unwrap();
    let loaded = GraphModel::from_json(registry(), &json, true).unwrap();

    assert_eq!(loaded.len(), 4);
    assert_eq!(loaded.upstream(merge, InputSlot::Back).unwrap(), Some(blur));
    assert_eq!(loaded.upstream(merge, InputSlot::Front).unwrap(), Some(solid));
    assert_eq!(loaded.upstream(blur, InputSlot::Back).unwrap(), Some(read));
    assert_eq!(loaded.node(blur).unwrap().custom_name(), Some("soft"));
    assert_eq!(loaded.node(blur).unwrap().property(0), Some(&PropertyValue::Int(12)));
    assert_eq!(loaded.node(read).unwrap().files(0).len(), 2);
    assert_eq!(loaded.node(merge).unwrap().position(), (300, 40));
    assert_eq!(
        loaded.node(solid).unwrap().property(0),
        Some(&PropertyValue::Color([0.25, 0.5, 0.75, 1.0]))
    );
    assert!(loaded.nodes().all(|n| n.is_dirty()));
    assert_eq!(loaded.node(merge).unwrap().input_connectors(), g.node(merge).unwrap().input_connectors());

    // A second round trip is stable.
    assert_eq!(loaded.to_description(), g.to_description());
}

#[test]
fn test_document_shape() {
    let mut g = GraphModel::new(registry());
    let a = g.add_node("solid", None).unwrap();
    let b = g.add_node("invert", None).unwrap();
    g.connect(a, 0, b, 0).unwrap();

    let value: serde_json::Value = serde_json::from_str(&g.to_json().unwrap()).unwrap();
    assert!(value["cascade-version"].is_string());
    let sections = value["nodegraph"].as_array().unwrap();
    assert_eq!(sections[0]["nodes"].as_array().unwrap().len(), 2);
    let conn = &sections[1]["connections"][0];
    assert_eq!(conn["src"], a.to_string());
    assert_eq!(conn["dst-node"], b.to_string());
    assert_eq!(conn["dst"], g.node(b).unwrap().input_connectors()[0].to_string());
    assert_eq!(sections[0]["nodes"][1]["properties"]["0"], "0");
    assert_eq!(sections[0]["nodes"][1]["customname"], "");
}

#[test]
fn test_load_handwritten_document() {
    let json = r#"{
        "nodegraph": [
            { "nodes": [
                { "id": "{6f1f3c1e-3a52-4c38-9a55-2b8a1f3d0001}", "kind": "solid",
                  "posx": 0, "posy": 0,
                  "properties": { "0": "1,0,0", "1": "64,32", "7": "ignored" },
                  "inputs": { "0": "6f1f3c1e-3a52-4c38-9a55-2b8a1f3d00a0" },
                  "customname": "red" },
                { "id": "6f1f3c1e-3a52-4c38-9a55-2b8a1f3d0002", "kind": "exposure",
                  "posx": 120, "posy": 0,
                  "properties": { "0": "not-a-number" },
                  "inputs": { "0": "6f1f3c1e-3a52-4c38-9a55-2b8a1f3d00b0" },
                  "customname": "" }
            ] },
            { "connections": [
                { "src": "6f1f3c1e-3a52-4c38-9a55-2b8a1f3d0001",
                  "dst": "6f1f3c1e-3a52-4c38-9a55-2b8a1f3d00b0",
                  "dst-node": "6f1f3c1e-3a52-4c38-9a55-2b8a1f3d0002" }
            ] }
        ],
        "cascade-version": "0.0.7"
    }"#;

    let g = GraphModel::from_json(registry(), json, true).unwrap();
    let red = g.find_by_name("red").unwrap();
    let exposure = g.find_by_name("exposure").unwrap();
    assert_eq!(g.upstream(exposure, InputSlot::Back).unwrap(), Some(red));
    assert_eq!(g.node(red).unwrap().property(0), Some(&PropertyValue::Color([1.0, 0.0, 0.0, 1.0])));
    assert_eq!(g.node(red).unwrap().property(1), Some(&PropertyValue::Size([64, 32])));
    // Bad value falls back to the default.
    assert_eq!(g.node(exposure).unwrap().property(0), Some(&PropertyValue::Float(0.0)));
}

#[test]
fn test_load_errors() {
    let mut g = GraphModel::new(registry());
    let a = g.add_node("solid", None).unwrap();
    let mut desc = g.to_description();

    // Unknown kind.
    if let GraphSection::Nodes { nodes } = &mut desc.nodegraph[0] {
        nodes[0].kind = "glow".into();
    }
    assert!(matches!(
        GraphModel::from_description(registry(), &desc, true),
        Err(GraphError::UnknownKind(_))
    ));

    // Duplicate id.
    let mut desc = g.to_description();
    if let GraphSection::Nodes { nodes } = &mut desc.nodegraph[0] {
        let copy = nodes[0].clone();
        nodes.push(copy);
    }
    assert_eq!(
        GraphModel::from_description(registry(), &desc, true).unwrap_err(),
        GraphError::DuplicateNode(a)
    );

    assert!(matches!(GraphDescription::from_json("{ nope"), Err(GraphError::Document(_))));
}
