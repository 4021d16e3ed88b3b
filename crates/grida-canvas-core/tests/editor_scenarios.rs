//! End-to-end editing scenarios through the `Editor` facade.

use grida_canvas_core::crdt::CrdtDocument;
use grida_canvas_core::io::{self, DocumentInit};
use grida_canvas_core::node::{
    BoxData, ChildrenConstraint, ImageData, Node, NodeId, NodeKind, SceneConstraints,
};
use grida_canvas_core::sync::{ClientMessage, ServerMessage, encode_payload};
use grida_canvas_core::tools::{InsertKind, ToolMode};
use grida_canvas_core::{
    Document, Editor, EditorConfig, FitTarget, Fragment, SceneSpec, Transform, command,
};
use kurbo::{Point, Rect, Vec2};

fn editor() -> Editor {
    Editor::new(DocumentInit::default(), EditorConfig::default()).unwrap()
}

fn rect_at(editor: &mut Editor, x: f64, y: f64, w: f64, h: f64) -> NodeId {
    let node = Node::new("new", NodeKind::Rectangle(BoxData::new(w, h)))
        .with_transform(Transform::translate(Vec2::new(x, y)));
    editor.insert_node(node).unwrap()
}

fn joined(snapshot: Option<String>) -> String {
    ServerMessage::Joined {
        room: "room".into(),
        peer_count: 2,
        snapshot,
    }
    .to_json()
    .unwrap()
}

/// Forward every patch `from` produced to `to`, the way the relay does.
fn relay(from: &mut Editor, from_id: &str, to: &mut Editor) {
    for json in from.take_sync_outgoing() {
        let Ok(ClientMessage::Patch { data }) = serde_json::from_str(&json) else {
            continue;
        };
        let msg = ServerMessage::Patch {
            from: from_id.into(),
            data,
        };
        to.receive_sync_message(&msg.to_json().unwrap());
    }
}

fn name_of(editor: &Editor, id: &NodeId) -> String {
    editor.doc().node(id).unwrap().name.clone()
}

#[test]
fn test_duplicate_undo_redo() {
    let mut editor = editor();
    let scene = editor
        .create_scene(SceneSpec {
            name: "S".into(),
            constraints: SceneConstraints {
                children: ChildrenConstraint::Multiple,
            },
            ..Default::default()
        })
        .unwrap();
    editor.load_scene(&scene).unwrap();
    let original = rect_at(&mut editor, 0.0, 0.0, 100.0, 100.0);
    let before = editor.doc().clone();

    let copies = editor.duplicate(&[original.clone()]).unwrap();
    assert_eq!(copies.len(), 1);
    assert_ne!(copies[0], original);
    assert_eq!(editor.state().selection(), copies.as_slice());
    assert_eq!(editor.doc().children_of(&scene), &[original.clone(), copies[0].clone()]);
    let after = editor.doc().clone();

    assert!(editor.undo().unwrap());
    assert_eq!(editor.doc(), &before);
    assert!(editor.state().selection().is_empty());

    assert!(editor.redo().unwrap());
    assert_eq!(editor.doc(), &after);
    assert!(!editor.redo().unwrap());
}

#[test]
fn test_insert_tool_is_single_shot_brush_persists() {
    let mut editor = editor();
    editor
        .surface_set_tool(ToolMode::Insert {
            node: InsertKind::Container,
        })
        .unwrap();
    editor.pointer_down(Point::new(10.0, 10.0), false);
    editor.pointer_move(Point::new(60.0, 40.0));
    editor.pointer_up(Point::new(110.0, 60.0)).unwrap();

    let inserted = editor.state().selection()[0].clone();
    assert_eq!(
        editor.doc().bounds_of(&inserted),
        Some(Rect::new(10.0, 10.0, 110.0, 60.0))
    );
    assert_eq!(editor.state().tool(), ToolMode::Cursor);

    editor.surface_set_tool(ToolMode::Brush).unwrap();
    for y in [200.0, 300.0] {
        editor.pointer_down(Point::new(0.0, y), false);
        editor.pointer_move(Point::new(20.0, y + 5.0));
        editor.pointer_up(Point::new(40.0, y)).unwrap();
        assert_eq!(editor.state().tool(), ToolMode::Brush);
    }
    // Scene, container and two strokes.
    assert_eq!(editor.doc().len(), 4);
}

#[test]
fn test_insert_click_uses_default_size() {
    let mut editor = editor();
    editor
        .surface_set_tool(ToolMode::Insert {
            node: InsertKind::Ellipse,
        })
        .unwrap();
    editor.pointer_down(Point::new(5.0, 5.0), false);
    editor.pointer_up(Point::new(5.0, 5.0)).unwrap();
    let id = editor.state().selection()[0].clone();
    assert_eq!(editor.doc().bounds_of(&id), Some(Rect::new(5.0, 5.0, 105.0, 105.0)));
}

#[test]
fn test_camera_fit_selection_and_empty_scene() {
    let mut editor = editor();
    assert!(editor.fit(FitTarget::All));
    assert_eq!(editor.state().camera().transform(), kurbo::Affine::IDENTITY);

    let id = rect_at(&mut editor, 100.0, 100.0, 200.0, 100.0);
    assert!(editor.fit(FitTarget::Selection));
    let camera = editor.state().camera();
    let center = camera.world_to_screen(Point::new(200.0, 150.0));
    assert!((center.x - 400.0).abs() < 1e-6);
    assert!((center.y - 300.0).abs() < 1e-6);
    let top_left = camera.world_to_screen(Point::new(100.0, 100.0));
    let bottom_right = camera.world_to_screen(Point::new(300.0, 200.0));
    assert!(top_left.x >= 0.0 && top_left.y >= 0.0);
    assert!(bottom_right.x <= 800.0 && bottom_right.y <= 600.0);

    editor.clear_selection();
    let transform = editor.state().camera().transform();
    assert!(!editor.fit(FitTarget::Selection));
    assert_eq!(editor.state().camera().transform(), transform);
    assert!(editor.fit("*".parse().unwrap()));
    assert!(editor.fit(FitTarget::Node(id)));
}

#[test]
fn test_archive_roundtrip_through_editor() {
    let mut doc = Document::with_default_scene();
    let hash = doc.add_asset(vec![0x89, b'P', b'N', b'G']);
    let image = Node::new(
        "img",
        NodeKind::Image(ImageData {
            image_ref: hash,
            width: 64.0,
            height: 64.0,
        }),
    );
    command::apply(
        &mut doc,
        command::Command::Insert {
            fragment: Fragment::single(image),
            parent: None,
            index: None,
        },
    )
    .unwrap();

    let mut source = Editor::new(DocumentInit::new(doc), EditorConfig::default()).unwrap();
    rect_at(&mut source, 10.0, 10.0, 20.0, 20.0);
    let bytes = source.archive().unwrap();

    let mut target = editor();
    let ticket = target.begin_load();
    target.finish_load(ticket, Ok(bytes)).unwrap();
    assert_eq!(target.doc(), source.doc());
    assert_eq!(target.doc().assets().len(), 1);
    assert_eq!(&io::unpack(&io::pack(target.doc()).unwrap()).unwrap(), target.doc());
}

#[test]
fn test_concurrent_rename_converges_to_higher_peer() {
    let mut a = editor();
    let rect = rect_at(&mut a, 0.0, 0.0, 50.0, 50.0);
    a.connect_collaboration("room", 1).unwrap();
    a.receive_sync_message(&joined(None));

    let snapshot = {
        let crdt: &CrdtDocument = a.collaboration().unwrap().crdt();
        encode_payload(&crdt.export_snapshot().unwrap())
    };
    let mut b = editor();
    b.connect_collaboration("room", 2).unwrap();
    b.receive_sync_message(&joined(Some(snapshot)));
    relay(&mut a, "1", &mut b);
    relay(&mut b, "2", &mut a);
    assert!(b.doc().contains(&rect));
    assert_eq!(a.doc(), b.doc());

    a.rename(&rect, "from-a").unwrap();
    b.rename(&rect, "from-b").unwrap();
    relay(&mut a, "1", &mut b);
    relay(&mut b, "2", &mut a);

    assert_eq!(name_of(&a, &rect), "from-b");
    assert_eq!(name_of(&b, &rect), "from-b");
    assert_eq!(a.doc(), b.doc());

    // Remote changes never enter the local undo history.
    assert!(a.undo().unwrap());
    assert!(a.doc().contains(&rect));
}

#[test]
fn test_disjoint_edits_both_survive() {
    let mut a = editor();
    let left = rect_at(&mut a, 0.0, 0.0, 10.0, 10.0);
    a.connect_collaboration("room", 1).unwrap();
    a.receive_sync_message(&joined(None));
    let snapshot = encode_payload(&a.collaboration().unwrap().crdt().export_snapshot().unwrap());

    let mut b = editor();
    b.connect_collaboration("room", 2).unwrap();
    b.receive_sync_message(&joined(Some(snapshot)));
    relay(&mut b, "2", &mut a);
    a.take_sync_outgoing();

    a.translate(&[left.clone()], Vec2::new(5.0, 0.0)).unwrap();
    let right = rect_at(&mut b, 100.0, 0.0, 10.0, 10.0);
    relay(&mut a, "1", &mut b);
    relay(&mut b, "2", &mut a);

    assert_eq!(a.doc(), b.doc());
    assert!(a.doc().contains(&right));
    assert_eq!(b.doc().bounds_of(&left).unwrap().x0, 5.0);
    // Ids minted by different peers never collide.
    assert!(right.as_str().starts_with("2-"));
}

fn coefficient_bits(editor: &Editor, id: &NodeId) -> [u64; 6] {
    let node = editor.doc().node(id).unwrap();
    node.relative_transform.0.as_coeffs().map(f64::to_bits)
}

#[test]
fn test_archive_keeps_float_coordinates_exact() {
    let mut source = editor();
    let mut ids = Vec::new();
    for i in 0..50 {
        let f = f64::from(i);
        let x = -201.10819328626894 + f * 0.1;
        let y = f / 3.0 + 1e-9;
        ids.push(rect_at(&mut source, x, y, 0.1 + f * 0.7, 1.0 / (f + 3.0)));
    }
    let bytes = source.archive().unwrap();

    let mut target = editor();
    let ticket = target.begin_load();
    target.finish_load(ticket, Ok(bytes)).unwrap();
    assert_eq!(target.doc(), source.doc());
    for id in &ids {
        assert_eq!(coefficient_bits(&target, id), coefficient_bits(&source, id));
    }
}

#[test]
fn test_remote_translate_is_bit_exact() {
    let mut a = editor();
    let rect = rect_at(&mut a, 0.1, 0.2, 10.0, 10.0);
    a.connect_collaboration("room", 1).unwrap();
    a.receive_sync_message(&joined(None));
    let snapshot = encode_payload(&a.collaboration().unwrap().crdt().export_snapshot().unwrap());

    let mut b = editor();
    b.connect_collaboration("room", 2).unwrap();
    b.receive_sync_message(&joined(Some(snapshot)));
    relay(&mut b, "2", &mut a);
    a.take_sync_outgoing();

    a.translate(&[rect.clone()], Vec2::new(-201.10819328626894, 1.0 / 3.0))
        .unwrap();
    relay(&mut a, "1", &mut b);

    assert_eq!(coefficient_bits(&b, &rect), coefficient_bits(&a, &rect));
    assert_eq!(a.doc(), b.doc());
}

#[test]
fn test_content_created_before_joining_survives() {
    let mut a = editor();
    let rect = rect_at(&mut a, 0.0, 0.0, 10.0, 10.0);
    let mut b = editor();
    let ellipse = b
        .insert_node(Node::new("new", NodeKind::Ellipse(BoxData::new(20.0, 20.0))))
        .unwrap();
    assert_ne!(rect, ellipse);

    a.connect_collaboration("room", 1).unwrap();
    a.receive_sync_message(&joined(None));
    let snapshot = encode_payload(&a.collaboration().unwrap().crdt().export_snapshot().unwrap());
    b.connect_collaboration("room", 2).unwrap();
    b.receive_sync_message(&joined(Some(snapshot)));
    relay(&mut b, "2", &mut a);
    relay(&mut a, "1", &mut b);

    for editor in [&a, &b] {
        assert!(editor.doc().contains(&rect));
        assert!(editor.doc().contains(&ellipse));
        assert_eq!(editor.doc().len(), 3);
        editor.doc().validate().unwrap();
    }
    assert_eq!(a.doc(), b.doc());
}
