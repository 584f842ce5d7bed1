//! The canonical, replayable `Operation` record.
//!
//! Wire shape (JSON), object level:
//! ```text
//! {"name":"Translate","x":2.0,"y":0.0,"z":0.0,"caxis_x":true,"caxis_y":false,"caxis_z":false,
//!  "targets":["Cube"],"active_object":"Cube","mode":"OBJECT"}
//! ```
//! Edit-level records additionally carry `verts`, `edges`, `faces` and
//! `select_mode` (`[vertex, edge, face]`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::OperationError;
use crate::geometry::{AxisMask, Vec3};
use crate::mesh::{ElementClass, ElementSelection, PrimitiveShape};
use crate::scene::{EditMode, Granularity};

/// Kind tags understood by [`Operation::from_value`].
pub const KNOWN_KINDS: [&str; 6] = ["Translate", "Rotate", "Resize", "Add Primitive", "Delete", "Rename"];

/// Kind-specific payload, tagged by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum OperationKind {
    Translate {
        #[serde(flatten)]
        offset: Vec3,
        #[serde(flatten)]
        constraint: AxisMask,
    },
    Rotate {
        value: f64,
        axis_x: f64,
        axis_y: f64,
        axis_z: f64,
        #[serde(flatten)]
        constraint: AxisMask,
    },
    Resize {
        #[serde(flatten)]
        factors: Vec3,
        #[serde(flatten)]
        constraint: AxisMask,
    },
    #[serde(rename = "Add Primitive")]
    AddPrimitive {
        #[serde(default)]
        shape: PrimitiveShape,
        loc_x: f64,
        loc_y: f64,
        loc_z: f64,
    },
    Delete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        use_global: Option<bool>,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        element_class: Option<ElementClass>,
    },
    Rename {
        old_name: String,
    },
}

impl OperationKind {
    /// The wire tag of this kind.
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::Translate { .. } => "Translate",
            OperationKind::Rotate { .. } => "Rotate",
            OperationKind::Resize { .. } => "Resize",
            OperationKind::AddPrimitive { .. } => "Add Primitive",
            OperationKind::Delete { .. } => "Delete",
            OperationKind::Rename { .. } => "Rename",
        }
    }
}

/// Element indices and granularity carried by edit-level records.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementTargets {
    #[serde(default)]
    pub verts: BTreeSet<usize>,
    #[serde(default)]
    pub edges: BTreeSet<usize>,
    #[serde(default)]
    pub faces: BTreeSet<usize>,
    pub select_mode: Granularity,
}

impl ElementTargets {
    pub fn new(selection: ElementSelection, select_mode: Granularity) -> Self {
        Self {
            verts: selection.verts,
            edges: selection.edges,
            faces: selection.faces,
            select_mode,
        }
    }

    pub fn selection(&self) -> ElementSelection {
        ElementSelection {
            verts: self.verts.clone(),
            edges: self.edges.clone(),
            faces: self.faces.clone(),
        }
    }
}

/// One edit, self-describing: applying it needs nothing but the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(flatten)]
    pub kind: OperationKind,
    /// Entity ids involved.
    #[serde(default)]
    pub targets: BTreeSet<String>,
    /// Active entity id, empty when none.
    #[serde(default)]
    pub active_object: String,
    pub mode: EditMode,
    #[serde(flatten)]
    pub elements: Option<ElementTargets>,
}

impl Operation {
    /// Parse a wire payload, separating unknown kinds from malformed records.
    pub fn from_value(value: Value) -> Result<Self, OperationError> {
        let name = match value.get("name") {
            Some(Value::String(name)) => name.clone(),
            Some(other) => return Err(OperationError::Malformed(format!("name is not a string: {other}"))),
            None => return Err(OperationError::Malformed("missing name".into())),
        };
        if !KNOWN_KINDS.contains(&name.as_str()) {
            return Err(OperationError::UnsupportedOperation(name));
        }
        serde_json::from_value(value).map_err(|e| OperationError::Malformed(format!("{name}: {e}")))
    }

    pub fn to_value(&self) -> Result<Value, OperationError> {
        serde_json::to_value(self).map_err(|e| OperationError::Malformed(e.to_string()))
    }

    /// Active entity, `None` when the record carries an empty id.
    pub fn active(&self) -> Option<&str> {
        (!self.active_object.is_empty()).then_some(self.active_object.as_str())
    }

    /// Object-level creation records are the only ones the collision rule rewrites.
    pub fn is_creation(&self) -> bool {
        matches!(self.kind, OperationKind::AddPrimitive { .. }) && self.mode == EditMode::ObjectLevel
    }

    pub fn label(&self) -> &'static str {
        self.kind.label()
    }

    /// Entities the record touches on the receiving side: the targets, plus
    /// the pre-rename id for a Rename.
    pub fn focus_targets(&self) -> BTreeSet<String> {
        let mut out = self.targets.clone();
        if let OperationKind::Rename { old_name } = &self.kind {
            out.insert(old_name.clone());
        }
        out
    }

    /// Element selection to focus on, empty at object level.
    pub fn element_selection(&self) -> ElementSelection {
        self.elements.as_ref().map(ElementTargets::selection).unwrap_or_default()
    }

    /// Granularity to focus with; the scene default when not recorded.
    pub fn granularity(&self) -> Granularity {
        self.elements.as_ref().map(|e| e.select_mode).unwrap_or_default()
    }
}
