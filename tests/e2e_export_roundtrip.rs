//! Export round trip: Graph A → JSON snapshot → Graph B, compared by
//! snapshot, plus the line-per-arc dump format.

use std::io::Cursor;

use arcgraph::export::{export_arc_dump, export_snapshot, import_snapshot, load_graph};
use arcgraph::{
    ArcProbe, ArcSpec, ArcValue, Direction, Error, Graph, GraphConfig, Manifestation, ModifierKind, OpenMode,
};
use pretty_assertions::assert_eq;

fn seed() -> Graph {
    let g = Graph::with_config(GraphConfig::default().with_name("social"));
    g.create_vertex("alice", Some("person")).unwrap();
    g.create_vertex("bob", Some("person")).unwrap();
    {
        let a = g.open_vertex("alice", OpenMode::Write, None).unwrap();
        a.set_property("age", 30i64).unwrap();
        a.set_vector(vec![1.0, 0.0]).unwrap();
    }
    g.connect("alice", ArcSpec::valued("knows", ModifierKind::Integer, 5), "bob").unwrap();
    g.connect("alice", ArcSpec::valued("sim", ModifierKind::Similarity, 0.75), "bob").unwrap();
    g.count("bob", "visits", "carol", Some(3), None).unwrap();
    g.connect("bob", ArcSpec::new("seen").forward_only(), "ghost").unwrap();
    g.mark_expiring("bob", 4_000_000_000, None).unwrap();
    g
}

#[test]
fn test_snapshot_roundtrip() {
    let a = seed();
    let mut buf = Vec::new();
    export_snapshot(&a, &mut buf, None).unwrap();

    let b = load_graph(GraphConfig::default(), &mut Cursor::new(&buf)).unwrap();
    assert_eq!(b.config().name, "social");
    assert_eq!(b.snapshot(None).unwrap(), a.snapshot(None).unwrap());
    assert_eq!((b.order(), b.size()), (a.order(), a.size()));

    // The restored graph is fully functional
    let probe = ArcProbe::new("knows", Direction::Out).with_modifier(ModifierKind::Integer);
    assert_eq!(b.arc_value("alice", &probe, "bob", None).unwrap(), Some(ArcValue::Integer(5)));
    assert_eq!(b.count("bob", "visits", "carol", None, None).unwrap(), 4);
    assert_eq!(b.vertex_info("carol", None).unwrap().manifestation, Manifestation::Virtual);
    assert_eq!(b.vertex_info("ghost", None).unwrap().indegree, 1);
    assert!(b.initials("ghost", None, None).unwrap().is_empty());
    assert_eq!(b.next_expiration(), Some(4_000_000_000));
    assert_eq!(b.vertex_info("alice", None).unwrap().vector, Some(vec![1.0, 0.0]));
}

#[test]
fn test_import_rejects_garbage() {
    let err = import_snapshot(&mut Cursor::new(b"{\"name\": 3}".to_vec())).unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));
}

#[test]
fn test_load_into_nonempty_graph_fails() {
    let a = seed();
    let snapshot = a.snapshot(None).unwrap();
    assert!(matches!(a.restore(&snapshot), Err(Error::Vertex(_))));
}

#[test]
fn test_arc_dump_format() {
    let g = seed();
    let mut out = Vec::new();
    export_arc_dump(&g, &mut out, None).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines[0], "# graph: social");
    assert_eq!(lines[1], format!("# vertices: {}", g.order()));
    assert_eq!(lines[2], format!("# arcs: {}", g.size()));
    assert_eq!(lines.len(), 3 + g.size() as usize);
    assert!(lines.iter().any(|l| l.starts_with("alice -[knows, ") && l.ends_with(", 5]-> bob")));
    assert!(lines.iter().any(|l| l.starts_with("bob -[seen, ") && l.ends_with(", fwd]-> ghost")));
}
