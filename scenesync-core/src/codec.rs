//! Operation codec: local edit → [`Operation`] → scene mutation.
//!
//! Encoding reads kind-specific parameters from the [`LocalAction`] itself;
//! only targets, active entity and mode come from the selection snapshot.

use log::{debug, trace};
use std::collections::BTreeSet;

use crate::error::SceneError;
use crate::geometry::{AxisMask, Vec3};
use crate::mesh::{ElementClass, ElementSelection, PrimitiveShape};
use crate::operation::{ElementTargets, Operation, OperationKind};
use crate::scene::{DeleteScope, EditMode, Granularity, Scene, SceneQuery};

/// An edit as the local user performed it, with its recorded parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalAction {
    Translate { offset: Vec3, constraint: AxisMask },
    Rotate { angle: f64, axis: Vec3, constraint: AxisMask },
    Resize { factors: Vec3, constraint: AxisMask },
    AddPrimitive { shape: PrimitiveShape, location: Vec3 },
    Delete { scope: DeleteScope },
    Rename { from: String, to: String },
}

impl LocalAction {
    /// Perform the edit directly on the current selection context.
    pub fn perform(&self, scene: &mut impl Scene) -> Result<(), SceneError> {
        match self {
            LocalAction::Translate { offset, constraint } => {
                scene.translate(constraint.mask_offset(*offset))
            }
            LocalAction::Rotate { angle, axis, constraint } => rotate(scene, *angle, *axis, constraint),
            LocalAction::Resize { factors, constraint } => {
                scene.resize(constraint.mask_factors(*factors))
            }
            LocalAction::AddPrimitive { shape, location } => {
                scene.add_primitive(*shape, *location, None).map(|_| ())
            }
            LocalAction::Delete { scope } => scene.delete(*scope),
            LocalAction::Rename { from, to } => scene.rename(from, to),
        }
    }

    fn is_destructive(&self) -> bool {
        matches!(self, LocalAction::Delete { .. })
    }
}

fn rotate(scene: &mut impl Scene, angle: f64, axis: Vec3, constraint: &AxisMask) -> Result<(), SceneError> {
    match constraint.rotation_axis(axis) {
        Some(axis) => scene.rotate(angle, axis),
        None => {
            debug!("Rotate without usable axis skipped");
            Ok(())
        }
    }
}

/// Selection state read from the scene around an edit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectionSnapshot {
    pub entities: BTreeSet<String>,
    pub elements: ElementSelection,
    pub granularity: Granularity,
}

impl SelectionSnapshot {
    pub fn capture(scene: &impl SceneQuery) -> Self {
        let elements = match scene.mode() {
            EditMode::EditLevel => scene.selected_elements(),
            EditMode::ObjectLevel => ElementSelection::default(),
        };
        Self {
            entities: scene.selected_entities(),
            elements,
            granularity: scene.granularity(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.elements.is_empty()
    }
}

/// Stateful encoder: remembers the last non-empty selection for the delete
/// fallback, and the last emitted record for dedup.
#[derive(Debug, Default)]
pub struct Encoder {
    tracked: SelectionSnapshot,
    last: Option<Operation>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the pre-action selection. Empty parts leave the previous
    /// values in place.
    pub fn track(&mut self, selection: &SelectionSnapshot) {
        if selection.entities.is_empty() {
            return;
        }
        self.tracked.entities = selection.entities.clone();
        if !selection.elements.is_empty() {
            self.tracked.elements = selection.elements.clone();
            self.tracked.granularity = selection.granularity;
        }
    }

    pub fn tracked(&self) -> &SelectionSnapshot {
        &self.tracked
    }

    /// Build the canonical record for `action`.
    pub fn encode(
        &self,
        action: &LocalAction,
        selection: &SelectionSnapshot,
        active: Option<&str>,
        mode: EditMode,
    ) -> Operation {
        let fallback = action.is_destructive();
        let targets = if fallback && selection.entities.is_empty() {
            trace!("Delete with empty selection, using tracked entities");
            self.tracked.entities.clone()
        } else {
            selection.entities.clone()
        };
        let elements = (mode == EditMode::EditLevel).then(|| {
            if fallback && selection.elements.is_empty() {
                ElementTargets::new(self.tracked.elements.clone(), self.tracked.granularity)
            } else {
                ElementTargets::new(selection.elements.clone(), selection.granularity)
            }
        });

        Operation {
            kind: encode_kind(action),
            targets,
            active_object: active.unwrap_or_default().to_string(),
            mode,
            elements,
        }
    }

    /// Encode, returning `None` when the record equals the previous one.
    pub fn encode_distinct(
        &mut self,
        action: &LocalAction,
        selection: &SelectionSnapshot,
        active: Option<&str>,
        mode: EditMode,
    ) -> Option<Operation> {
        let op = self.encode(action, selection, active, mode);
        if self.last.as_ref() == Some(&op) {
            trace!("Suppressing duplicate {} record", op.label());
            return None;
        }
        self.last = Some(op.clone());
        Some(op)
    }

    /// Mark `op` as already emitted.
    pub fn prime(&mut self, op: Operation) {
        self.last = Some(op);
    }
}

fn encode_kind(action: &LocalAction) -> OperationKind {
    match action {
        LocalAction::Translate { offset, constraint } => OperationKind::Translate {
            offset: *offset,
            constraint: *constraint,
        },
        LocalAction::Rotate { angle, axis, constraint } => OperationKind::Rotate {
            value: *angle,
            axis_x: axis.x,
            axis_y: axis.y,
            axis_z: axis.z,
            constraint: *constraint,
        },
        LocalAction::Resize { factors, constraint } => OperationKind::Resize {
            factors: *factors,
            constraint: *constraint,
        },
        LocalAction::AddPrimitive { shape, location } => OperationKind::AddPrimitive {
            shape: *shape,
            loc_x: location.x,
            loc_y: location.y,
            loc_z: location.z,
        },
        LocalAction::Delete { scope } => match scope {
            DeleteScope::Objects { use_global } => OperationKind::Delete {
                use_global: Some(*use_global),
                element_class: None,
            },
            DeleteScope::Elements(class) => OperationKind::Delete {
                use_global: None,
                element_class: Some(*class),
            },
        },
        LocalAction::Rename { from, .. } => OperationKind::Rename { old_name: from.clone() },
    }
}

/// Apply `op` to the scene's current selection context.
///
/// Callers isolate the selection first (see [`FocusManager`](crate::focus::FocusManager)).
pub fn apply(op: &Operation, scene: &mut impl Scene) -> Result<(), SceneError> {
    match &op.kind {
        OperationKind::Translate { offset, constraint } => scene.translate(constraint.mask_offset(*offset)),
        OperationKind::Rotate { value, axis_x, axis_y, axis_z, constraint } => {
            rotate(scene, *value, Vec3::new(*axis_x, *axis_y, *axis_z), constraint)
        }
        OperationKind::Resize { factors, constraint } => scene.resize(constraint.mask_factors(*factors)),
        OperationKind::AddPrimitive { shape, loc_x, loc_y, loc_z } => {
            let name = match op.mode {
                EditMode::ObjectLevel => op.active(),
                EditMode::EditLevel => None,
            };
            let created = scene.add_primitive(*shape, Vec3::new(*loc_x, *loc_y, *loc_z), name)?;
            debug!("Applied {} -> {}", op.label(), created);
            Ok(())
        }
        OperationKind::Delete { use_global, element_class } => {
            let scope = match op.mode {
                EditMode::ObjectLevel => DeleteScope::Objects { use_global: use_global.unwrap_or(false) },
                EditMode::EditLevel => DeleteScope::Elements(element_class.unwrap_or(ElementClass::Vertex)),
            };
            scene.delete(scope)
        }
        OperationKind::Rename { old_name } => scene.rename(old_name, &op.active_object),
    }
}
