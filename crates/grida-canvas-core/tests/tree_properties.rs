//! Property tests: the tree invariant holds under random command sequences,
//! undo restores the exact starting document, and arbitrary coordinates
//! survive archives and CRDT replicas bit for bit.

use std::f64::consts::PI;

use grida_canvas_core::command::{self, Command};
use grida_canvas_core::node::{BoxData, Node, NodeId, NodeKind};
use grida_canvas_core::{CrdtDocument, Document, Fragment, History, Transform, io};
use kurbo::{Affine, Vec2};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Insert { parent: usize, container: bool, size: f64 },
    Remove(usize),
    Translate(usize, f64, f64),
    Move { node: usize, parent: usize, index: usize },
    Duplicate(usize),
    Group(usize, usize),
    Ungroup(usize),
    Rename(usize, String),
    SetTransform { node: usize, tx: f64, ty: f64, scale: f64, angle: f64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<usize>(), any::<bool>(), 1.0..200.0f64)
            .prop_map(|(parent, container, size)| Op::Insert { parent, container, size }),
        1 => any::<usize>().prop_map(Op::Remove),
        1 => (any::<usize>(), -50.0..50.0f64, -50.0..50.0f64)
            .prop_map(|(i, dx, dy)| Op::Translate(i, dx, dy)),
        2 => (any::<usize>(), any::<usize>(), any::<usize>())
            .prop_map(|(node, parent, index)| Op::Move { node, parent, index }),
        1 => any::<usize>().prop_map(Op::Duplicate),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Group(a, b)),
        1 => any::<usize>().prop_map(Op::Ungroup),
        1 => (any::<usize>(), "[a-z]{1,8}").prop_map(|(i, name)| Op::Rename(i, name)),
    ]
}

/// Structural ops mixed with arbitrary placements.
fn placement_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => op(),
        3 => (any::<usize>(), -1e6..1e6f64, -1e6..1e6f64, 0.01..100.0f64, -PI..PI)
            .prop_map(|(node, tx, ty, scale, angle)| Op::SetTransform { node, tx, ty, scale, angle }),
    ]
}

fn sorted(ids: impl Iterator<Item = NodeId>) -> Vec<NodeId> {
    let mut ids: Vec<NodeId> = ids.collect();
    ids.sort();
    ids
}

fn pick(ids: &[NodeId], i: usize) -> Option<NodeId> {
    (!ids.is_empty()).then(|| ids[i % ids.len()].clone())
}

fn to_command(doc: &Document, op: Op) -> Option<Command> {
    let nodes = sorted(doc.nodes().keys().filter(|id| !doc.is_scene(id)).cloned());
    let parents = sorted(
        doc.nodes()
            .values()
            .filter(|n| n.kind.accepts_children())
            .map(|n| n.id.clone()),
    );
    Some(match op {
        Op::Insert {
            parent,
            container,
            size,
        } => {
            let data = BoxData::new(size, size);
            let kind = if container {
                NodeKind::Container(data)
            } else {
                NodeKind::Rectangle(data)
            };
            Command::Insert {
                fragment: Fragment::single(Node::new("new", kind)),
                parent: pick(&parents, parent),
                index: None,
            }
        }
        Op::Remove(i) => Command::Remove {
            ids: vec![pick(&nodes, i)?],
        },
        Op::Translate(i, dx, dy) => Command::Translate {
            ids: vec![pick(&nodes, i)?],
            delta: Vec2::new(dx, dy),
        },
        Op::Move {
            node,
            parent,
            index,
        } => Command::Move {
            id: pick(&nodes, node)?,
            parent: pick(&parents, parent)?,
            index: Some(index % 4),
        },
        Op::Duplicate(i) => Command::Duplicate {
            ids: vec![pick(&nodes, i)?],
            offset: Vec2::new(10.0, 10.0),
        },
        Op::Group(a, b) => Command::Group {
            ids: vec![pick(&nodes, a)?, pick(&nodes, b)?],
        },
        Op::Ungroup(i) => Command::Ungroup {
            id: pick(&nodes, i)?,
        },
        Op::Rename(i, name) => Command::rename(pick(&nodes, i)?, name),
        Op::SetTransform {
            node,
            tx,
            ty,
            scale,
            angle,
        } => Command::set_transform(
            pick(&nodes, node)?,
            Transform(Affine::translate((tx, ty)) * Affine::rotate(angle) * Affine::scale(scale)),
        ),
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn test_tree_invariant_and_undo_roundtrip(ops in prop::collection::vec(op(), 1..40)) {
        let mut doc = Document::with_default_scene();
        let initial = doc.clone();
        let mut history = History::new(1_000);

        for op in ops {
            let Some(cmd) = to_command(&doc, op) else { continue };
            let before = doc.clone();
            match command::apply(&mut doc, cmd) {
                Ok(result) => history.record(result.inverse),
                // A rejected command leaves the document untouched.
                Err(_) => prop_assert_eq!(&doc, &before),
            }
            prop_assert!(doc.validate().is_ok(), "invariant broken: {:?}", doc.validate());
        }

        let last = doc.clone();
        while history.can_undo() {
            prop_assert!(history.undo(&mut doc).is_ok());
            prop_assert!(doc.validate().is_ok());
        }
        prop_assert_eq!(&doc, &initial);

        while history.can_redo() {
            prop_assert!(history.redo(&mut doc).is_ok());
        }
        prop_assert_eq!(&doc, &last);
    }

    #[test]
    fn test_coordinates_survive_archive_and_replicas(ops in prop::collection::vec(placement_op(), 1..30)) {
        let mut doc = Document::with_default_scene();
        for op in ops {
            let Some(cmd) = to_command(&doc, op) else { continue };
            // Rejected commands leave the document as it was.
            let _ = command::apply(&mut doc, cmd);
        }

        let unpacked = io::unpack(&io::pack(&doc).unwrap()).unwrap();
        prop_assert_eq!(&unpacked, &doc);

        let mut local = CrdtDocument::with_peer_id(1).unwrap();
        local.write_document(&doc).unwrap();
        let remote = CrdtDocument::from_snapshot(&local.export_snapshot().unwrap(), Some(2)).unwrap();
        prop_assert_eq!(&remote.materialize().unwrap(), &doc);
    }
}
