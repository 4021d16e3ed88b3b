//! Conversion between document nodes and Loro attribute maps.

use kurbo::Affine;
use loro::{LoroMapValue, LoroValue};

use crate::math::Transform;
use crate::node::{Node, NodeId, NodeKind};

pub const KEY_TYPE: &str = "type";
pub const KEY_NAME: &str = "name";
pub const KEY_ACTIVE: &str = "active";
pub const KEY_LOCKED: &str = "locked";
pub const KEY_VISIBLE: &str = "visible";
/// Relative transform, the six affine coefficients as doubles.
pub const KEY_TRANSFORM: &str = "transform";
/// Kind payload, JSON encoded. A single register.
pub const KEY_PROPS: &str = "props";
/// Parent id, empty for scenes.
pub const KEY_PARENT: &str = "parent";
/// Sibling order key.
pub const KEY_ORDER: &str = "order";

/// A node as stored in the CRDT, before the tree is rebuilt.
#[derive(Debug, Clone, PartialEq)]
pub struct CrdtNode {
    pub node: Node,
    pub parent: Option<NodeId>,
    pub order: f64,
}

fn get_double(map: &LoroMapValue, key: &str) -> Option<f64> {
    match map.get(key)? {
        LoroValue::Double(d) => Some(*d),
        LoroValue::I64(i) => Some(*i as f64),
        _ => None,
    }
}

fn get_string(map: &LoroMapValue, key: &str) -> Option<String> {
    match map.get(key)? {
        LoroValue::String(s) => Some(s.to_string()),
        _ => None,
    }
}

fn get_transform(map: &LoroMapValue) -> Option<Transform> {
    let LoroValue::List(list) = map.get(KEY_TRANSFORM)? else {
        return None;
    };
    let mut coeffs = [0.0; 6];
    if list.len() != coeffs.len() {
        return None;
    }
    for (c, value) in coeffs.iter_mut().zip(list.iter()) {
        *c = match value {
            LoroValue::Double(d) => *d,
            LoroValue::I64(i) => *i as f64,
            _ => return None,
        };
    }
    Some(Transform(Affine::new(coeffs)))
}

fn get_bool(map: &LoroMapValue, key: &str) -> Option<bool> {
    match map.get(key)? {
        LoroValue::Bool(b) => Some(*b),
        _ => None,
    }
}

/// The attribute registers of a node.
pub fn node_to_loro(
    node: &Node,
    parent: Option<&NodeId>,
    order: f64,
) -> Result<Vec<(&'static str, LoroValue)>, serde_json::Error> {
    let parent = parent.map(|p| p.as_str().to_string()).unwrap_or_default();
    Ok(vec![
        (KEY_TYPE, LoroValue::String(node.kind.type_name().to_string().into())),
        (KEY_NAME, LoroValue::String(node.name.clone().into())),
        (KEY_ACTIVE, LoroValue::Bool(node.active)),
        (KEY_LOCKED, LoroValue::Bool(node.locked)),
        (KEY_VISIBLE, LoroValue::Bool(node.visible)),
        (
            KEY_TRANSFORM,
            LoroValue::List(
                node.relative_transform
                    .0
                    .as_coeffs()
                    .iter()
                    .map(|c| LoroValue::Double(*c))
                    .collect::<Vec<_>>()
                    .into(),
            ),
        ),
        (KEY_PROPS, LoroValue::String(serde_json::to_string(&node.kind)?.into())),
        (KEY_PARENT, LoroValue::String(parent.into())),
        (KEY_ORDER, LoroValue::Double(order)),
    ])
}

/// Rebuild a node (without children) from its attribute map. Returns `None`
/// for records missing the kind payload or carrying one that does not parse.
pub fn node_from_loro(id: &str, map: &LoroMapValue) -> Option<CrdtNode> {
    let kind: NodeKind = match serde_json::from_str(&get_string(map, KEY_PROPS)?) {
        Ok(kind) => kind,
        Err(e) => {
            log::warn!("dropping node {id} with unreadable props: {e}");
            return None;
        }
    };
    let relative_transform = get_transform(map).unwrap_or_default();
    let mut node = Node::new(id, kind);
    node.name = get_string(map, KEY_NAME).unwrap_or_default();
    node.active = get_bool(map, KEY_ACTIVE).unwrap_or(true);
    node.locked = get_bool(map, KEY_LOCKED).unwrap_or(false);
    node.visible = get_bool(map, KEY_VISIBLE).unwrap_or(true);
    node.relative_transform = relative_transform;
    let parent = get_string(map, KEY_PARENT)
        .filter(|p| !p.is_empty())
        .map(NodeId::from);
    Some(CrdtNode {
        node,
        parent,
        order: get_double(map, KEY_ORDER).unwrap_or(0.0),
    })
}
