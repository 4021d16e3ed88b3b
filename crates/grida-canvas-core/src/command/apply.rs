use std::collections::HashSet;

use kurbo::Vec2;

use super::{Command, CommandResult, Patch, Property, SceneSpec};
use crate::document::{Document, Fragment};
use crate::error::CommandError;
use crate::node::{BooleanData, ChildrenConstraint, Node, NodeId, NodeKind, SceneData};

/// Apply `command` to `doc`.
///
/// On error the document is unchanged.
pub fn apply(doc: &mut Document, command: Command) -> Result<CommandResult, CommandError> {
    log::debug!("apply {}", command.label());
    match command {
        Command::Insert {
            fragment,
            parent,
            index,
        } => insert(doc, &fragment, parent.as_ref(), index),
        Command::Attach {
            fragment,
            parent,
            index,
        } => attach(doc, fragment, &parent, index),
        Command::Remove { ids } => remove(doc, ids),
        Command::SetProperty { id, property } => set_property(doc, &id, property),
        Command::Translate { ids, delta } => translate(doc, &ids, delta),
        Command::Move { id, parent, index } => move_node(doc, &id, &parent, index),
        Command::Duplicate { ids, offset } => duplicate(doc, &ids, offset),
        Command::Group { ids } => wrap(doc, &ids, NodeKind::Group),
        Command::Boolean { ids, op } => wrap(doc, &ids, NodeKind::Boolean(BooleanData { op })),
        Command::Ungroup { id } => ungroup(doc, &id),
        Command::CreateScene { spec } => create_scene(doc, spec),
        Command::AddScene {
            scene,
            content,
            index,
        } => add_scene(doc, scene, content, index),
        Command::RemoveScene { id } => remove_scene(doc, &id),
        Command::Batch { commands } => composite(doc, |steps| {
            for command in commands {
                steps.run(command)?;
            }
            Ok(())
        }),
    }
}

/// Accumulates the steps of a composite command so they can be rolled back.
struct Steps<'a> {
    doc: &'a mut Document,
    inverses: Vec<Command>,
    patch: Patch,
    created: Vec<NodeId>,
}

impl Steps<'_> {
    fn run(&mut self, command: Command) -> Result<(), CommandError> {
        let result = apply(self.doc, command)?;
        self.inverses.push(result.inverse);
        self.patch.merge(result.patch);
        self.created.extend(result.created);
        Ok(())
    }

    fn rollback(&mut self) {
        while let Some(inverse) = self.inverses.pop() {
            if let Err(e) = apply(self.doc, inverse) {
                log::error!("rollback step failed: {e}");
            }
        }
    }
}

fn composite(
    doc: &mut Document,
    body: impl FnOnce(&mut Steps<'_>) -> Result<(), CommandError>,
) -> Result<CommandResult, CommandError> {
    let mut steps = Steps {
        doc,
        inverses: Vec::new(),
        patch: Patch::new(),
        created: Vec::new(),
    };
    if let Err(e) = body(&mut steps) {
        steps.rollback();
        return Err(e);
    }
    let mut inverses = steps.inverses;
    inverses.reverse();
    Ok(CommandResult {
        patch: steps.patch,
        inverse: Command::Batch { commands: inverses },
        created: steps.created,
    })
}

fn fragment_patch(patch: &mut Patch, fragment: &Fragment, parent: &NodeId) {
    for id in fragment.nodes.keys() {
        patch.touch(id);
    }
    patch.touch(parent);
}

fn insert(
    doc: &mut Document,
    fragment: &Fragment,
    parent: Option<&NodeId>,
    index: Option<usize>,
) -> Result<CommandResult, CommandError> {
    let parent = doc.resolve_parent(parent)?;
    let roots = doc.insert(fragment, Some(&parent), index)?;
    let mut patch = Patch::new();
    patch.touch(&parent);
    for root in &roots {
        patch.touch(root);
        for d in doc.descendants(root) {
            patch.touch(&d);
        }
    }
    Ok(CommandResult {
        patch,
        inverse: Command::Remove { ids: roots.clone() },
        created: roots,
    })
}

fn attach(
    doc: &mut Document,
    fragment: Fragment,
    parent: &NodeId,
    index: Option<usize>,
) -> Result<CommandResult, CommandError> {
    let mut patch = Patch::new();
    fragment_patch(&mut patch, &fragment, parent);
    let roots = fragment.roots.clone();
    doc.attach(fragment, parent, index)?;
    Ok(CommandResult {
        patch,
        inverse: Command::Remove { ids: roots.clone() },
        created: roots,
    })
}

/// Drop ids that are descendants of other ids in the list, keeping order.
fn outermost(doc: &Document, ids: &[NodeId]) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert((*id).clone()))
        .filter(|id| !ids.iter().any(|other| other != *id && doc.is_same_or_ancestor(other, id)))
        .cloned()
        .collect()
}

fn check_nodes(doc: &Document, ids: &[NodeId]) -> Result<(), CommandError> {
    if ids.is_empty() {
        return Err(CommandError::precondition("no target nodes"));
    }
    for id in ids {
        if doc.node(id)?.is_scene() {
            return Err(CommandError::precondition(format!("{id} is a scene")));
        }
    }
    Ok(())
}

fn remove(doc: &mut Document, ids: Vec<NodeId>) -> Result<CommandResult, CommandError> {
    check_nodes(doc, &ids)?;
    let ids = outermost(doc, &ids);
    if let [id] = ids.as_slice() {
        let (fragment, parent, index) = doc.detach(id)?;
        let mut patch = Patch::new();
        for n in fragment.nodes.keys() {
            patch.remove(n);
        }
        patch.touch(&parent);
        return Ok(CommandResult {
            patch,
            inverse: Command::Attach {
                fragment,
                parent,
                index: Some(index),
            },
            created: Vec::new(),
        });
    }
    composite(doc, |steps| {
        for id in ids {
            steps.run(Command::Remove { ids: vec![id] })?;
        }
        Ok(())
    })
}

fn set_property(
    doc: &mut Document,
    id: &NodeId,
    property: Property,
) -> Result<CommandResult, CommandError> {
    if let Property::Kind(kind) = &property {
        let node = doc.node(id)?;
        if !node.kind.same_variant(kind) {
            return Err(CommandError::precondition(format!(
                "cannot change {} node {id} into {}",
                node.kind.type_name(),
                kind.type_name()
            )));
        }
        if let NodeKind::Scene(SceneData { constraints, .. }) = kind {
            if constraints.children == ChildrenConstraint::Single && doc.children_of(id).len() > 1 {
                return Err(CommandError::precondition(format!(
                    "scene {id} has more than one child"
                )));
            }
        }
    }
    let node = doc.node_mut(id)?;
    let old = match property {
        Property::Name(v) => Property::Name(std::mem::replace(&mut node.name, v)),
        Property::Active(v) => Property::Active(std::mem::replace(&mut node.active, v)),
        Property::Locked(v) => Property::Locked(std::mem::replace(&mut node.locked, v)),
        Property::Visible(v) => Property::Visible(std::mem::replace(&mut node.visible, v)),
        Property::Transform(v) => {
            Property::Transform(std::mem::replace(&mut node.relative_transform, v))
        }
        Property::Kind(v) => Property::Kind(std::mem::replace(&mut node.kind, v)),
    };
    let mut patch = Patch::new();
    patch.touch(id);
    Ok(CommandResult {
        patch,
        inverse: Command::SetProperty {
            id: id.clone(),
            property: old,
        },
        created: Vec::new(),
    })
}

fn translate(doc: &mut Document, ids: &[NodeId], delta: Vec2) -> Result<CommandResult, CommandError> {
    check_nodes(doc, ids)?;
    let ids = outermost(doc, ids);
    let commands = ids
        .iter()
        .map(|id| {
            let t = doc.node(id)?.relative_transform.translated(delta);
            Ok(Command::set_transform(id.clone(), t))
        })
        .collect::<Result<Vec<_>, CommandError>>()?;
    composite(doc, |steps| {
        for command in commands {
            steps.run(command)?;
        }
        Ok(())
    })
}

fn move_node(
    doc: &mut Document,
    id: &NodeId,
    parent: &NodeId,
    index: Option<usize>,
) -> Result<CommandResult, CommandError> {
    let (old_parent, old_index) = doc.reparent(id, parent, index)?;
    let mut patch = Patch::new();
    patch.touch(id);
    patch.touch(parent);
    patch.touch(&old_parent);
    Ok(CommandResult {
        patch,
        inverse: Command::Move {
            id: id.clone(),
            parent: old_parent,
            index: Some(old_index),
        },
        created: Vec::new(),
    })
}

fn duplicate(doc: &mut Document, ids: &[NodeId], offset: Vec2) -> Result<CommandResult, CommandError> {
    check_nodes(doc, ids)?;
    let ids = outermost(doc, ids);
    composite(doc, |steps| {
        for id in &ids {
            let mut copy = steps.doc.extract_fragment(std::slice::from_ref(id))?;
            copy = copy.rekey(steps.doc.id_allocator_mut());
            copy.translate_roots(offset);
            let parent = steps
                .doc
                .parent_of(id)
                .cloned()
                .ok_or_else(|| CommandError::precondition(format!("node {id} has no parent")))?;
            let index = steps.doc.index_in_parent(id).map(|i| i + 1);
            steps.run(Command::Attach {
                fragment: copy,
                parent,
                index,
            })?;
        }
        Ok(())
    })
}

/// Wrap sibling nodes into a new group-like node at the position of the
/// first of them.
fn wrap(doc: &mut Document, ids: &[NodeId], kind: NodeKind) -> Result<CommandResult, CommandError> {
    check_nodes(doc, ids)?;
    let ids = outermost(doc, ids);
    let parent = doc
        .parent_of(&ids[0])
        .cloned()
        .ok_or_else(|| CommandError::precondition("node has no parent"))?;
    if ids.iter().any(|id| doc.parent_of(id) != Some(&parent)) {
        return Err(CommandError::precondition("grouped nodes must share a parent"));
    }
    let mut ordered: Vec<(usize, NodeId)> = ids
        .iter()
        .map(|id| (doc.index_in_parent(id).unwrap_or(0), id.clone()))
        .collect();
    ordered.sort();
    let mut ordered = ordered.into_iter();
    let Some((index, first)) = ordered.next() else {
        return Err(CommandError::precondition("nothing to group"));
    };
    let wrapper_id = doc.next_id();
    let wrapper = Node::new(wrapper_id.clone(), kind).with_children(vec![first.clone()]);

    composite(doc, |steps| {
        // The wrapper takes the first node's slot with that node inside, so
        // the parent never holds more children than before.
        let mut fragment = steps.doc.extract_fragment(std::slice::from_ref(&first))?;
        fragment.roots = vec![wrapper_id.clone()];
        fragment.nodes.insert(wrapper_id.clone(), wrapper);
        steps.run(Command::Remove { ids: vec![first] })?;
        steps.run(Command::Attach {
            fragment,
            parent,
            index: Some(index),
        })?;
        for (_, id) in ordered {
            steps.run(Command::Move {
                id,
                parent: wrapper_id.clone(),
                index: None,
            })?;
        }
        Ok(())
    })
    .map(|mut result| {
        result.created = vec![wrapper_id];
        result
    })
}

fn ungroup(doc: &mut Document, id: &NodeId) -> Result<CommandResult, CommandError> {
    let node = doc.node(id)?;
    if !matches!(node.kind, NodeKind::Group | NodeKind::Boolean(_)) {
        return Err(CommandError::precondition(format!(
            "{} node {id} cannot be ungrouped",
            node.kind.type_name()
        )));
    }
    let group_transform = node.relative_transform;
    let children = node.children.clone();
    let parent = doc
        .parent_of(id)
        .cloned()
        .ok_or_else(|| CommandError::precondition(format!("node {id} has no parent")))?;
    let index = doc.index_in_parent(id).unwrap_or(0);

    composite(doc, |steps| {
        for (i, child) in children.iter().enumerate() {
            let t = steps.doc.node(child)?.relative_transform;
            steps.run(Command::set_transform(child.clone(), group_transform.compose(&t)))?;
            steps.run(Command::Move {
                id: child.clone(),
                parent: parent.clone(),
                index: Some(index + 1 + i),
            })?;
        }
        steps.run(Command::Remove {
            ids: vec![id.clone()],
        })?;
        Ok(())
    })
    .map(|mut result| {
        result.created = children;
        result
    })
}

fn create_scene(doc: &mut Document, spec: SceneSpec) -> Result<CommandResult, CommandError> {
    let id = doc.next_id();
    let name = if spec.name.is_empty() {
        format!("Scene {}", doc.scenes_ref().len() + 1)
    } else {
        spec.name
    };
    let scene = Node::new(
        id.clone(),
        NodeKind::Scene(SceneData {
            constraints: spec.constraints,
            background_color: spec.background_color,
            ..Default::default()
        }),
    )
    .with_name(name);
    doc.add_scene(scene, spec.index)?;
    let mut patch = Patch::new();
    patch.touch(&id);
    patch.scenes_changed = true;
    Ok(CommandResult {
        patch,
        inverse: Command::RemoveScene { id: id.clone() },
        created: vec![id],
    })
}

fn add_scene(
    doc: &mut Document,
    scene: Node,
    content: Option<Fragment>,
    index: usize,
) -> Result<CommandResult, CommandError> {
    let id = scene.id.clone();
    doc.add_scene(scene, Some(index))?;
    let mut patch = Patch::new();
    patch.touch(&id);
    patch.scenes_changed = true;
    if let Some(content) = content {
        fragment_patch(&mut patch, &content, &id);
        if let Err(e) = doc.attach(content, &id, None) {
            if let Err(cleanup) = doc.remove_scene(&id) {
                log::warn!("failed to roll back scene {id}: {cleanup}");
            }
            return Err(e);
        }
    }
    Ok(CommandResult {
        patch,
        inverse: Command::RemoveScene { id: id.clone() },
        created: vec![id],
    })
}

fn remove_scene(doc: &mut Document, id: &NodeId) -> Result<CommandResult, CommandError> {
    let (scene, content, index) = doc.remove_scene(id)?;
    let mut patch = Patch::new();
    patch.remove(id);
    patch.scenes_changed = true;
    if let Some(content) = &content {
        for n in content.nodes.keys() {
            patch.remove(n);
        }
    }
    Ok(CommandResult {
        patch,
        inverse: Command::AddScene {
            scene,
            content,
            index,
        },
        created: Vec::new(),
    })
}
