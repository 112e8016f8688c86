//! End-to-end tests for Connect, Count, Accumulate and the read probes.

use arcgraph::{
    ArcCondition, ArcError, ArcProbe, ArcSpec, ArcValue, Connect, Direction, Error, Graph,
    GraphConfig, ModifierKind, OpenMode,
};
use proptest::prelude::*;

// ============================================================================
// 1. Connect / ArcValue round trip
// ============================================================================

#[test]
fn test_connect_then_read_value() {
    let g = Graph::new();
    let to5 = ArcSpec::valued("to", ModifierKind::Integer, 5);

    assert_eq!(g.connect("A", to5.clone(), "B").unwrap(), 1);
    let probe = ArcProbe::new("to", Direction::Out).with_modifier(ModifierKind::Integer);
    assert_eq!(g.arc_value("A", &probe, "B", None).unwrap(), Some(ArcValue::Integer(5)));

    let before = g.degree("A", None, None).unwrap();
    assert_eq!(g.connect("A", to5, "B").unwrap(), 0);
    assert_eq!(g.degree("A", None, None).unwrap(), before);
}

// ============================================================================
// 2. Distinct modifier kinds are distinct arcs
// ============================================================================

#[test]
fn test_relationship_kind_pairs_are_unique() {
    let g = Graph::new();
    assert_eq!(g.connect("A", ArcSpec::valued("r", ModifierKind::Integer, 1), "B").unwrap(), 1);
    assert_eq!(g.connect("A", ArcSpec::valued("r", ModifierKind::Float, 1.5), "B").unwrap(), 1);
    assert_eq!(g.connect("A", ArcSpec::valued("r", ModifierKind::Integer, 2), "B").unwrap(), 0);
    assert_eq!(g.size(), 2);
    assert_eq!(g.degree("A", Some(&ArcProbe::new("r", Direction::Out)), None).unwrap(), 2);

    let int = ArcProbe::new("r", Direction::Out).with_modifier(ModifierKind::Integer);
    assert_eq!(g.arc_value("A", &int, "B", None).unwrap(), Some(ArcValue::Integer(2)));
}

#[test]
fn test_out_of_domain_value_rejected() {
    let g = Graph::new();
    let bad = ArcSpec::valued("sim", ModifierKind::Similarity, 2.0);
    assert!(matches!(g.connect("A", bad, "B"), Err(Error::Arc(ArcError::InvalidValue { .. }))));
    assert!(!g.contains("B"));
}

// ============================================================================
// 3. Counters and accumulators
// ============================================================================

#[test]
fn test_count_and_accumulate() {
    let g = Graph::new();
    assert_eq!(g.count("A", "hits", "B", None, None).unwrap(), 1);
    assert_eq!(g.count("A", "hits", "B", Some(10), None).unwrap(), 11);
    assert_eq!(g.count("A", "hits", "B", Some(-100), None).unwrap(), 0);
    assert_eq!(g.accumulate("A", "score", "B", Some(2.5), None).unwrap(), 2.5);
    assert_eq!(g.accumulate("A", "score", "B", None, None).unwrap(), 3.5);
    assert_eq!(g.size(), 2);

    // Connect on a counter kind adds too
    let spec = ArcSpec::valued("hits", ModifierKind::Counter, 4);
    assert_eq!(g.connect("A", spec, "B").unwrap(), 0);
    let probe = ArcProbe::new("hits", Direction::Out).with_modifier(ModifierKind::Counter);
    assert_eq!(g.arc_value("A", &probe, "B", None).unwrap(), Some(ArcValue::Unsigned(4)));
}

proptest! {
    #[test]
    fn prop_counter_stays_in_range(deltas in proptest::collection::vec(-5_000_000_000i64..5_000_000_000i64, 1..40)) {
        let g = Graph::new();
        let mut model: i64 = 0;
        for d in deltas {
            model = (model + d).clamp(0, u32::MAX as i64);
            let got = g.count("A", "c", "B", Some(d), None).unwrap();
            prop_assert_eq!(got as i64, model);
        }
    }

    #[test]
    fn prop_connect_is_idempotent(value in -1000i32..1000, kind_ix in 0usize..3) {
        let kind = [ModifierKind::Integer, ModifierKind::Float, ModifierKind::Static][kind_ix];
        let g = Graph::new();
        let spec = ArcSpec::valued("rel", kind, value);
        prop_assert_eq!(g.connect("a", spec.clone(), "b").unwrap(), 1);
        let degree = g.degree("a", None, None).unwrap();
        prop_assert_eq!(g.connect("a", spec, "b").unwrap(), 0);
        prop_assert_eq!(g.degree("a", None, None).unwrap(), degree);
        prop_assert_eq!(degree, 1);
    }
}

// ============================================================================
// 4. Forward-only exclusivity
// ============================================================================

#[test]
fn test_forward_only_excludes_regular() {
    let g = Graph::new();
    g.create_vertex("b", None).unwrap();
    assert_eq!(g.connect("x", ArcSpec::new("f").forward_only(), "b").unwrap(), 1);

    for y in ["y1", "y2", "x"] {
        assert!(matches!(
            g.connect(y, "regular", "b"),
            Err(Error::Arc(ArcError::RegularNotAllowed { .. }))
        ));
    }
    // Forward-only inarcs are counted but not indexed on the terminal
    assert_eq!(g.degree("b", None, None).unwrap(), 1);
    assert!(g.initials("b", None, None).unwrap().is_empty());

    assert_eq!(g.disconnect("x", &ArcProbe::out(), Some("b"), None).unwrap(), 1);
    assert_eq!(g.connect("y1", "regular", "b").unwrap(), 1);
    assert!(matches!(
        g.connect("x", ArcSpec::new("f").forward_only(), "b"),
        Err(Error::Arc(ArcError::ForwardOnlyNotAllowed { .. }))
    ));
}

#[test]
fn test_inbound_disconnect_skips_forward_only() {
    let g = Graph::new();
    g.create_vertex("b", None).unwrap();
    g.connect("x", ArcSpec::new("f").forward_only(), "b").unwrap();
    assert_eq!(g.disconnect("b", &ArcProbe::inbound(), None, None).unwrap(), 0);
    assert_eq!(g.size(), 1);
}

// ============================================================================
// 5. Conditions, lists, lifespans
// ============================================================================

#[test]
fn test_conditional_bulk_connect() {
    let g = Graph::new();
    for t in ["t1", "t2", "t3"] {
        g.create_vertex(t, None).unwrap();
    }
    g.connect("A", "seen", "t2").unwrap();

    let only_unseen = Connect::to_many("A", "seen", ["t1", "t2", "t3"])
        .with_condition(ArcCondition::absent(ArcProbe::new("seen", Direction::Out)));
    assert_eq!(g.connect_with(&only_unseen).unwrap(), 2);
    assert_eq!(g.connect_with(&only_unseen).unwrap(), 0);
    assert_eq!(g.terminals("A", Some("seen"), None).unwrap().len(), 3);
}

#[test]
fn test_explicit_list_forbids_implicit_creation() {
    let g = Graph::new();
    g.create_vertex("t1", None).unwrap();
    let req = Connect::to_many("A", "to", ["t1", "ghost"]);
    assert!(matches!(g.connect_with(&req), Err(Error::Vertex(_))));
    assert!(!g.contains("ghost"));
    assert_eq!(g.size(), 0);
}

#[test]
fn test_relationship_labels_are_bounded() {
    let g = Graph::with_config(GraphConfig { max_relationships: 2, ..GraphConfig::default() });
    g.connect("A", "r1", "B").unwrap();
    g.connect("A", "r2", "B").unwrap();
    assert!(matches!(g.connect("A", "r3", "B"), Err(Error::Query(_))));
}

#[test]
fn test_append_open_promotes_virtual() {
    let g = Graph::new();
    g.connect("A", "to", "T").unwrap();
    let t = g.open_vertex("T", OpenMode::Append, None).unwrap();
    assert!(!t.is_virtual());
    g.close_vertex(t);
    g.disconnect("A", &ArcProbe::any(), None, None).unwrap();
    assert!(g.contains("T"));
}
