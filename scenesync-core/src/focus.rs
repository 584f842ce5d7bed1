//! Focus/selection isolation for applying remote operations.
//!
//! A remote operation runs against the same selection-driven primitives as
//! the local user's edits, so the user's selection, active entity, mode and
//! granularity are saved, replaced by the operation's own focus, and put back
//! afterwards. Every restore step is best-effort: ids or indices that no
//! longer exist are skipped.

use log::{debug, trace, warn};
use std::collections::BTreeSet;

use crate::error::SceneError;
use crate::mesh::ElementSelection;
use crate::operation::Operation;
use crate::scene::{EditMode, Granularity, Scene, SceneQuery};

/// Selection state of one editing level.
#[derive(Debug, Clone, PartialEq)]
pub enum FocusLayer {
    Object {
        selected: BTreeSet<String>,
        active: Option<String>,
    },
    Edit {
        elements: ElementSelection,
        granularity: Granularity,
        active: Option<String>,
    },
}

impl FocusLayer {
    pub fn capture(scene: &impl SceneQuery) -> Self {
        match scene.mode() {
            EditMode::ObjectLevel => FocusLayer::Object {
                selected: scene.selected_entities(),
                active: scene.active(),
            },
            EditMode::EditLevel => FocusLayer::Edit {
                elements: scene.selected_elements(),
                granularity: scene.granularity(),
                active: scene.active(),
            },
        }
    }

    pub fn mode(&self) -> EditMode {
        match self {
            FocusLayer::Object { .. } => EditMode::ObjectLevel,
            FocusLayer::Edit { .. } => EditMode::EditLevel,
        }
    }

    pub fn active(&self) -> Option<&str> {
        match self {
            FocusLayer::Object { active, .. } | FocusLayer::Edit { active, .. } => active.as_deref(),
        }
    }

    /// Put this layer back. Assumes the scene is already in this layer's mode.
    pub fn restore(&self, scene: &mut impl Scene) {
        match self {
            FocusLayer::Object { selected, active } => {
                scene.deselect_all();
                for id in selected {
                    skip_missing(scene.select_entity(id));
                }
                set_active_or_clear(scene, active.as_deref());
            }
            FocusLayer::Edit { elements, granularity, active } => {
                skip_missing(scene.set_active(active.as_deref()));
                scene.deselect_all();
                scene.set_granularity(*granularity);
                for (class, index) in elements.iter() {
                    skip_missing(scene.select_element(class, index));
                }
            }
        }
    }
}

/// Saved focus: the user's layer, plus the layer exposed by a mode toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct FocusSnapshot {
    pub outer: FocusLayer,
    pub inner: Option<FocusLayer>,
    /// Element selection of an edit target other than the user's active entity.
    pub target: Option<FocusLayer>,
    /// Entities locked for the duration of the operation.
    pub locked: Vec<String>,
}

fn skip_missing(result: Result<(), SceneError>) {
    if let Err(e) = result {
        trace!("Focus step skipped: {}", e);
    }
}

fn set_active_or_clear(scene: &mut impl Scene, id: Option<&str>) {
    if let Err(e) = scene.set_active(id) {
        trace!("Active entity not restored: {}", e);
        skip_missing(scene.set_active(None));
    }
}

/// Wraps operation application with save/restore of the user's focus.
#[derive(Debug, Default, Clone, Copy)]
pub struct FocusManager;

impl FocusManager {
    pub fn new() -> Self {
        Self
    }

    /// Save the current focus and replace it with the operation's.
    pub fn remove_focus(&self, op: &Operation, scene: &mut impl Scene) -> FocusSnapshot {
        let outer = FocusLayer::capture(scene);
        scene.deselect_all();

        let mut inner = None;
        if op.mode != scene.mode() {
            if op.mode == EditMode::EditLevel {
                // Entering edit level needs the operation's entity as edit target.
                skip_missing(scene.set_active(op.active()));
            }
            match scene.toggle_mode() {
                Ok(_) => {
                    let layer = FocusLayer::capture(scene);
                    scene.deselect_all();
                    inner = Some(layer);
                }
                Err(e) => warn!("Could not switch to {:?} for {}: {}", op.mode, op.label(), e),
            }
        }

        let targets = op.focus_targets();
        let mut target = None;
        match scene.mode() {
            EditMode::ObjectLevel => {
                for id in &targets {
                    skip_missing(scene.select_entity(id));
                }
                set_active_or_clear(scene, op.active());
            }
            EditMode::EditLevel => {
                let current = scene.active();
                skip_missing(scene.set_active(op.active()));
                if inner.is_none() && op.active().is_some() && scene.active() != current {
                    target = Some(FocusLayer::capture(scene));
                }
                scene.deselect_all();
                scene.set_granularity(op.granularity());
                for (class, index) in op.element_selection().iter() {
                    skip_missing(scene.select_element(class, index));
                }
            }
        }

        let mut locked = Vec::new();
        for name in scene.entity_names() {
            if targets.contains(&name) || op.active() == Some(name.as_str()) || !scene.is_selectable(&name) {
                continue;
            }
            if scene.set_selectable(&name, false).is_ok() {
                locked.push(name);
            }
        }
        debug!(
            "Focused {} on {} target(s), {} locked",
            op.label(),
            targets.len(),
            locked.len()
        );

        FocusSnapshot { outer, inner, target, locked }
    }

    /// Undo [`remove_focus`](Self::remove_focus) after the operation ran.
    pub fn return_focus(&self, op: &Operation, snapshot: FocusSnapshot, scene: &mut impl Scene) {
        for name in &snapshot.locked {
            skip_missing(scene.set_selectable(name, true));
        }

        match scene.mode() {
            EditMode::ObjectLevel => {
                for id in op.focus_targets().iter().map(String::as_str).chain(op.active()) {
                    skip_missing(scene.deselect_entity(id));
                }
            }
            EditMode::EditLevel => {
                for (class, index) in op.element_selection().iter() {
                    skip_missing(scene.deselect_element(class, index));
                }
            }
        }

        if let Some(target) = &snapshot.target {
            target.restore(scene);
        }

        if scene.mode() != snapshot.outer.mode() {
            if let Some(inner) = &snapshot.inner {
                inner.restore(scene);
            }
            if scene.toggle_mode().is_err() {
                // The edit target may have been removed by the operation.
                skip_missing(scene.set_active(snapshot.outer.active()));
                if let Err(e) = scene.toggle_mode() {
                    warn!("Could not return to {:?}: {}", snapshot.outer.mode(), e);
                    return;
                }
            }
        }
        snapshot.outer.restore(scene);
    }

    /// Run `f` with the scene focused on `op`, restoring focus afterwards
    /// whether or not `f` succeeds.
    pub fn apply_isolated<S, T, F>(&self, op: &Operation, scene: &mut S, f: F) -> Result<T, SceneError>
    where
        S: Scene,
        F: FnOnce(&Operation, &mut S) -> Result<T, SceneError>,
    {
        let snapshot = self.remove_focus(op, scene);
        let result = f(op, scene);
        self.return_focus(op, snapshot, scene);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::apply;
    use crate::geometry::{AxisMask, Vec3};
    use crate::mesh::{ElementClass, PrimitiveShape};
    use crate::operation::{ElementTargets, OperationKind};
    use crate::scene::{Entity, MemoryScene};

    fn scene_abc() -> MemoryScene {
        let mut scene = MemoryScene::new();
        for (i, name) in ["A", "B", "C"].iter().enumerate() {
            scene.insert(*name, Entity::new(PrimitiveShape::Cube, Vec3::new(i as f64 * 3.0, 0.0, 0.0)));
        }
        scene
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn translate_op(targets: &[&str], active: &str, mode: EditMode, elements: Option<ElementTargets>) -> Operation {
        Operation {
            kind: OperationKind::Translate { offset: Vec3::new(0.0, 0.0, 1.0), constraint: AxisMask::NONE },
            targets: set(targets),
            active_object: active.into(),
            mode,
            elements,
        }
    }

    #[test]
    fn test_object_focus_round_trip() {
        let mut scene = scene_abc();
        scene.select_entity("A").unwrap();
        scene.select_entity("C").unwrap();
        scene.set_active(Some("C")).unwrap();

        let op = translate_op(&["B"], "B", EditMode::ObjectLevel, None);
        FocusManager::new().apply_isolated(&op, &mut scene, |op, s| apply(op, s)).unwrap();

        assert_eq!(scene.entity("B").unwrap().location, Vec3::new(3.0, 0.0, 1.0));
        assert_eq!(scene.entity("A").unwrap().location, Vec3::new(0.0, 0.0, 0.0));
        assert_eq!(scene.selected_entities(), set(&["A", "C"]));
        assert_eq!(scene.active().as_deref(), Some("C"));
        assert!(["A", "B", "C"].iter().all(|n| scene.is_selectable(n)));
    }

    #[test]
    fn test_non_targets_locked_during_apply() {
        let mut scene = scene_abc();
        scene.set_selectable("C", false).unwrap();
        let op = translate_op(&["B"], "B", EditMode::ObjectLevel, None);
        let manager = FocusManager::new();
        let snapshot = manager.remove_focus(&op, &mut scene);
        assert_eq!(snapshot.locked, vec!["A".to_string()]);
        assert!(!scene.is_selectable("A"));
        assert!(scene.is_selectable("B"));
        manager.return_focus(&op, snapshot, &mut scene);
        assert!(scene.is_selectable("A"));
        // Already locked before the operation, stays locked.
        assert!(!scene.is_selectable("C"));
    }

    #[test]
    fn test_edit_op_from_object_level_user() {
        let mut scene = scene_abc();
        // Give B an element selection the user left behind in edit mode.
        scene.set_active(Some("B")).unwrap();
        scene.toggle_mode().unwrap();
        scene.select_element(ElementClass::Vertex, 5).unwrap();
        scene.toggle_mode().unwrap();
        scene.select_entity("A").unwrap();
        scene.set_active(Some("A")).unwrap();

        let mut elements = ElementSelection::default();
        elements.faces.insert(0);
        let op = translate_op(
            &["B"],
            "B",
            EditMode::EditLevel,
            Some(ElementTargets::new(elements, Granularity { vertex: false, edge: false, face: true })),
        );
        let before = scene.entity("B").unwrap().mesh.vertices.clone();
        let manager = FocusManager::new();
        let snapshot = manager.remove_focus(&op, &mut scene);
        assert!(snapshot.inner.is_some());
        assert_eq!(scene.mode(), EditMode::EditLevel);
        apply(&op, &mut scene).unwrap();
        manager.return_focus(&op, snapshot, &mut scene);

        assert_eq!(scene.mode(), EditMode::ObjectLevel);
        assert_eq!(scene.selected_entities(), set(&["A"]));
        assert_eq!(scene.active().as_deref(), Some("A"));
        let mesh = &scene.entity("B").unwrap().mesh;
        assert_eq!(mesh.selection.verts, [5].into_iter().collect());
        assert!(mesh.selection.faces.is_empty());
        assert_eq!(mesh.vertices[0], before[0] + Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(mesh.vertices[4], before[4]);
    }

    #[test]
    fn test_edit_op_on_other_entity_keeps_its_selection() {
        let mut scene = scene_abc();
        scene.set_active(Some("B")).unwrap();
        scene.toggle_mode().unwrap();
        scene.select_element(ElementClass::Vertex, 5).unwrap();
        scene.set_active(Some("A")).unwrap();
        scene.set_granularity(Granularity { vertex: false, edge: true, face: false });
        scene.select_element(ElementClass::Edge, 2).unwrap();

        let mut elements = ElementSelection::default();
        elements.faces.insert(0);
        let op = translate_op(
            &["B"],
            "B",
            EditMode::EditLevel,
            Some(ElementTargets::new(elements, Granularity { vertex: false, edge: false, face: true })),
        );
        let before = scene.entity("B").unwrap().mesh.vertices.clone();
        FocusManager::new().apply_isolated(&op, &mut scene, |op, s| apply(op, s)).unwrap();

        assert_eq!(scene.mode(), EditMode::EditLevel);
        assert_eq!(scene.active().as_deref(), Some("A"));
        assert_eq!(scene.granularity(), Granularity { vertex: false, edge: true, face: false });
        assert_eq!(scene.selected_elements().edges, [2].into_iter().collect());
        let b = &scene.entity("B").unwrap().mesh;
        assert_eq!(b.selection.verts, [5].into_iter().collect());
        assert!(b.selection.faces.is_empty());
        assert_eq!(b.vertices[0], before[0] + Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_object_op_from_edit_level_user() {
        let mut scene = scene_abc();
        scene.select_entity("A").unwrap();
        scene.set_active(Some("A")).unwrap();
        scene.toggle_mode().unwrap();
        scene.set_granularity(Granularity { vertex: false, edge: true, face: false });
        scene.select_element(ElementClass::Edge, 2).unwrap();

        let op = translate_op(&["B"], "B", EditMode::ObjectLevel, None);
        FocusManager::new().apply_isolated(&op, &mut scene, |op, s| apply(op, s)).unwrap();

        assert_eq!(scene.mode(), EditMode::EditLevel);
        assert_eq!(scene.active().as_deref(), Some("A"));
        assert_eq!(scene.granularity(), Granularity { vertex: false, edge: true, face: false });
        assert_eq!(scene.selected_elements().edges, [2].into_iter().collect());
        assert_eq!(scene.entity("B").unwrap().location, Vec3::new(3.0, 0.0, 1.0));

        scene.toggle_mode().unwrap();
        assert_eq!(scene.selected_entities(), set(&["A"]));
    }

    #[test]
    fn test_missing_targets_are_tolerated() {
        let mut scene = scene_abc();
        scene.select_entity("A").unwrap();
        scene.select_entity("B").unwrap();
        scene.set_active(Some("B")).unwrap();

        let op = Operation {
            kind: OperationKind::Delete { use_global: Some(false), element_class: None },
            targets: set(&["B", "Ghost"]),
            active_object: "Ghost".into(),
            mode: EditMode::ObjectLevel,
            elements: None,
        };
        FocusManager::new().apply_isolated(&op, &mut scene, |op, s| apply(op, s)).unwrap();

        assert!(!scene.contains("B"));
        assert_eq!(scene.selected_entities(), set(&["A"]));
        assert_eq!(scene.active(), None);
    }

    #[test]
    fn test_focus_restored_when_apply_fails() {
        let mut scene = scene_abc();
        scene.select_entity("C").unwrap();
        let op = Operation {
            kind: OperationKind::Rename { old_name: "A".into() },
            targets: set(&["B"]),
            active_object: "B".into(),
            mode: EditMode::ObjectLevel,
            elements: None,
        };
        let result = FocusManager::new().apply_isolated(&op, &mut scene, |op, s| apply(op, s));
        assert_eq!(result, Err(SceneError::NameTaken("B".into())));
        assert_eq!(scene.selected_entities(), set(&["C"]));
        assert!(scene.is_selectable("A"));
    }
}
