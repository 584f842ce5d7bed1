//! Scene capability traits and the in-memory reference scene.
//!
//! The mutation primitives behave like the host editor's operators: they act
//! on the current selection context rather than on explicit ids. At object
//! level that means every selected, selectable entity; at edit level it means
//! the selected elements of the edit target (the active entity).

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::error::SceneError;
use crate::geometry::{Quat, Vec3};
use crate::mesh::{ElementClass, ElementSelection, Mesh, PrimitiveShape};
use crate::naming;

/// Editing level of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EditMode {
    #[default]
    #[serde(rename = "OBJECT")]
    ObjectLevel,
    #[serde(rename = "EDIT_MESH")]
    EditLevel,
}

impl EditMode {
    pub fn toggled(self) -> Self {
        match self {
            EditMode::ObjectLevel => EditMode::EditLevel,
            EditMode::EditLevel => EditMode::ObjectLevel,
        }
    }
}

/// Element-level selection granularity flags.
///
/// Travels on the wire as `[vertex, edge, face]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[bool; 3]", into = "[bool; 3]")]
pub struct Granularity {
    pub vertex: bool,
    pub edge: bool,
    pub face: bool,
}

impl Default for Granularity {
    fn default() -> Self {
        Self { vertex: true, edge: false, face: false }
    }
}

impl From<[bool; 3]> for Granularity {
    fn from([vertex, edge, face]: [bool; 3]) -> Self {
        Self { vertex, edge, face }
    }
}

impl From<Granularity> for [bool; 3] {
    fn from(g: Granularity) -> Self {
        [g.vertex, g.edge, g.face]
    }
}

/// What a delete removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteScope {
    /// Selected entities. `use_global` also unlinks them from every other
    /// scene sharing the data; a single scene treats both the same.
    Objects { use_global: bool },
    /// Selected elements of one class on the edit target.
    Elements(ElementClass),
}

/// Read side of the scene capability.
pub trait SceneQuery {
    fn contains(&self, id: &str) -> bool;

    fn entity_names(&self) -> Vec<String>;

    fn mode(&self) -> EditMode;

    fn active(&self) -> Option<String>;

    fn selected_entities(&self) -> BTreeSet<String>;

    /// Element selection of the edit target; empty when there is none.
    fn selected_elements(&self) -> ElementSelection;

    fn granularity(&self) -> Granularity;

    fn is_selectable(&self, id: &str) -> bool;
}

/// Mutation side of the scene capability.
pub trait Scene: SceneQuery {
    /// Selecting a non-selectable entity is a silent no-op.
    fn select_entity(&mut self, id: &str) -> Result<(), SceneError>;

    fn deselect_entity(&mut self, id: &str) -> Result<(), SceneError>;

    /// Clear the selection of the current mode only.
    fn deselect_all(&mut self);

    fn set_active(&mut self, id: Option<&str>) -> Result<(), SceneError>;

    /// Switch between object and edit level; returns the new mode.
    fn toggle_mode(&mut self) -> Result<EditMode, SceneError>;

    fn select_element(&mut self, class: ElementClass, index: usize) -> Result<(), SceneError>;

    fn deselect_element(&mut self, class: ElementClass, index: usize) -> Result<(), SceneError>;

    fn set_granularity(&mut self, granularity: Granularity);

    fn set_selectable(&mut self, id: &str, selectable: bool) -> Result<(), SceneError>;

    fn translate(&mut self, offset: Vec3) -> Result<(), SceneError>;

    /// `axis` need not be normalized; a zero axis is a no-op.
    fn rotate(&mut self, angle: f64, axis: Vec3) -> Result<(), SceneError>;

    fn resize(&mut self, factors: Vec3) -> Result<(), SceneError>;

    /// Returns the name of the created entity (object level) or of the edit
    /// target the geometry was merged into (edit level).
    fn add_primitive(
        &mut self,
        shape: PrimitiveShape,
        location: Vec3,
        name: Option<&str>,
    ) -> Result<String, SceneError>;

    fn delete(&mut self, scope: DeleteScope) -> Result<(), SceneError>;

    fn rename(&mut self, from: &str, to: &str) -> Result<(), SceneError>;
}

/// One scene entity. Keyed by name in [`MemoryScene`]; `id` survives renames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub shape: Option<PrimitiveShape>,
    pub location: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub mesh: Mesh,
}

impl Entity {
    pub fn new(shape: PrimitiveShape, location: Vec3) -> Self {
        Self {
            id: Uuid::new_v4(),
            shape: Some(shape),
            location,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            mesh: shape.template(),
        }
    }
}

/// In-memory scene used for the server's canonical copy and in tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryScene {
    entities: BTreeMap<String, Entity>,
    selected: BTreeSet<String>,
    active: Option<String>,
    mode: EditMode,
    granularity: Granularity,
    locked: BTreeSet<String>,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = (&String, &Entity)> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Insert an entity directly, bypassing selection side effects.
    pub fn insert(&mut self, name: impl Into<String>, entity: Entity) {
        self.entities.insert(name.into(), entity);
    }

    fn edit_target_mut(&mut self) -> Result<&mut Mesh, SceneError> {
        let name = self.active.as_deref().ok_or(SceneError::NoEditTarget)?;
        self.entities
            .get_mut(name)
            .map(|e| &mut e.mesh)
            .ok_or(SceneError::NoEditTarget)
    }

    /// Selected entities that are not locked, in name order.
    fn operands(&self) -> Vec<String> {
        self.selected
            .iter()
            .filter(|n| !self.locked.contains(*n) && self.entities.contains_key(*n))
            .cloned()
            .collect()
    }

    fn operand_pivot(&self, operands: &[String]) -> Option<Vec3> {
        Vec3::centroid(operands.iter().filter_map(|n| self.entities.get(n)).map(|e| &e.location))
    }
}

impl SceneQuery for MemoryScene {
    fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    fn entity_names(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }

    fn mode(&self) -> EditMode {
        self.mode
    }

    fn active(&self) -> Option<String> {
        self.active.clone()
    }

    fn selected_entities(&self) -> BTreeSet<String> {
        self.selected.clone()
    }

    fn selected_elements(&self) -> ElementSelection {
        self.active
            .as_deref()
            .and_then(|a| self.entities.get(a))
            .map(|e| e.mesh.selection.clone())
            .unwrap_or_default()
    }

    fn granularity(&self) -> Granularity {
        self.granularity
    }

    fn is_selectable(&self, id: &str) -> bool {
        self.entities.contains_key(id) && !self.locked.contains(id)
    }
}

impl Scene for MemoryScene {
    fn select_entity(&mut self, id: &str) -> Result<(), SceneError> {
        if !self.entities.contains_key(id) {
            return Err(SceneError::MissingEntity(id.to_string()));
        }
        if self.locked.contains(id) {
            trace!("Ignoring select of locked entity {}", id);
            return Ok(());
        }
        self.selected.insert(id.to_string());
        Ok(())
    }

    fn deselect_entity(&mut self, id: &str) -> Result<(), SceneError> {
        if !self.entities.contains_key(id) {
            return Err(SceneError::MissingEntity(id.to_string()));
        }
        self.selected.remove(id);
        Ok(())
    }

    fn deselect_all(&mut self) {
        match self.mode {
            EditMode::ObjectLevel => self.selected.clear(),
            EditMode::EditLevel => {
                if let Ok(mesh) = self.edit_target_mut() {
                    mesh.selection.clear();
                }
            }
        }
    }

    fn set_active(&mut self, id: Option<&str>) -> Result<(), SceneError> {
        match id {
            Some(name) if !self.entities.contains_key(name) => {
                Err(SceneError::MissingEntity(name.to_string()))
            }
            _ => {
                self.active = id.map(str::to_string);
                Ok(())
            }
        }
    }

    fn toggle_mode(&mut self) -> Result<EditMode, SceneError> {
        if self.mode == EditMode::ObjectLevel {
            self.edit_target_mut()?;
        }
        self.mode = self.mode.toggled();
        debug!("Scene mode -> {:?}", self.mode);
        Ok(self.mode)
    }

    fn select_element(&mut self, class: ElementClass, index: usize) -> Result<(), SceneError> {
        self.edit_target_mut()?.select(class, index)
    }

    fn deselect_element(&mut self, class: ElementClass, index: usize) -> Result<(), SceneError> {
        self.edit_target_mut()?.deselect(class, index)
    }

    fn set_granularity(&mut self, granularity: Granularity) {
        self.granularity = granularity;
    }

    fn set_selectable(&mut self, id: &str, selectable: bool) -> Result<(), SceneError> {
        if !self.entities.contains_key(id) {
            return Err(SceneError::MissingEntity(id.to_string()));
        }
        if selectable {
            self.locked.remove(id);
        } else {
            self.locked.insert(id.to_string());
        }
        Ok(())
    }

    fn translate(&mut self, offset: Vec3) -> Result<(), SceneError> {
        match self.mode {
            EditMode::ObjectLevel => {
                for name in self.operands() {
                    if let Some(e) = self.entities.get_mut(&name) {
                        e.location += offset;
                    }
                }
            }
            EditMode::EditLevel => self.edit_target_mut()?.map_selected(|p| p + offset),
        }
        Ok(())
    }

    fn rotate(&mut self, angle: f64, axis: Vec3) -> Result<(), SceneError> {
        let Some(axis) = axis.normalized() else {
            debug!("Rotate with zero axis ignored");
            return Ok(());
        };
        match self.mode {
            EditMode::ObjectLevel => {
                let operands = self.operands();
                let Some(pivot) = self.operand_pivot(&operands) else {
                    return Ok(());
                };
                let q = Quat::from_axis_angle(&axis, angle);
                for name in operands {
                    if let Some(e) = self.entities.get_mut(&name) {
                        e.location = pivot + (e.location - pivot).rotated(&axis, angle);
                        e.rotation = q.then(&e.rotation);
                    }
                }
            }
            EditMode::EditLevel => {
                let mesh = self.edit_target_mut()?;
                if let Some(pivot) = mesh.selection_centroid() {
                    mesh.map_selected(|p| pivot + (p - pivot).rotated(&axis, angle));
                }
            }
        }
        Ok(())
    }

    fn resize(&mut self, factors: Vec3) -> Result<(), SceneError> {
        match self.mode {
            EditMode::ObjectLevel => {
                let operands = self.operands();
                let Some(pivot) = self.operand_pivot(&operands) else {
                    return Ok(());
                };
                for name in operands {
                    if let Some(e) = self.entities.get_mut(&name) {
                        e.location = pivot + (e.location - pivot).scaled_by(&factors);
                        e.scale = e.scale.scaled_by(&factors);
                    }
                }
            }
            EditMode::EditLevel => {
                let mesh = self.edit_target_mut()?;
                if let Some(pivot) = mesh.selection_centroid() {
                    mesh.map_selected(|p| pivot + (p - pivot).scaled_by(&factors));
                }
            }
        }
        Ok(())
    }

    fn add_primitive(
        &mut self,
        shape: PrimitiveShape,
        location: Vec3,
        name: Option<&str>,
    ) -> Result<String, SceneError> {
        match self.mode {
            EditMode::ObjectLevel => {
                let requested = name.unwrap_or(shape.default_name());
                let name = naming::unique_name(requested, |n| self.entities.contains_key(n));
                self.entities.insert(name.clone(), Entity::new(shape, location));
                self.selected.clear();
                self.selected.insert(name.clone());
                self.active = Some(name.clone());
                debug!("Added {:?} as {}", shape, name);
                Ok(name)
            }
            EditMode::EditLevel => {
                let target = self.active.clone().ok_or(SceneError::NoEditTarget)?;
                let entity = self.entities.get_mut(&target).ok_or(SceneError::NoEditTarget)?;
                let offset = location - entity.location;
                entity.mesh.merge(&shape.template(), offset);
                Ok(target)
            }
        }
    }

    fn delete(&mut self, scope: DeleteScope) -> Result<(), SceneError> {
        match scope {
            DeleteScope::Objects { .. } => {
                for name in self.operands() {
                    self.entities.remove(&name);
                    self.selected.remove(&name);
                    self.locked.remove(&name);
                    if self.active.as_deref() == Some(name.as_str()) {
                        self.active = None;
                    }
                    debug!("Deleted entity {}", name);
                }
            }
            DeleteScope::Elements(class) => self.edit_target_mut()?.delete(class),
        }
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), SceneError> {
        if from == to {
            return Ok(());
        }
        if self.entities.contains_key(to) {
            return Err(SceneError::NameTaken(to.to_string()));
        }
        let entity = self
            .entities
            .remove(from)
            .ok_or_else(|| SceneError::MissingEntity(from.to_string()))?;
        self.entities.insert(to.to_string(), entity);
        if self.selected.remove(from) {
            self.selected.insert(to.to_string());
        }
        if self.locked.remove(from) {
            self.locked.insert(to.to_string());
        }
        if self.active.as_deref() == Some(from) {
            self.active = Some(to.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene_with(names: &[&str]) -> MemoryScene {
        let mut scene = MemoryScene::new();
        for (i, n) in names.iter().enumerate() {
            scene.insert(*n, Entity::new(PrimitiveShape::Cube, Vec3::new(i as f64 * 3.0, 0.0, 0.0)));
        }
        scene
    }

    #[test]
    fn test_add_primitive_selects_and_activates() {
        let mut scene = MemoryScene::new();
        let name = scene.add_primitive(PrimitiveShape::Cube, Vec3::ZERO, None).unwrap();
        assert_eq!(name, "Cube");
        let second = scene.add_primitive(PrimitiveShape::Cube, Vec3::ZERO, None).unwrap();
        assert_eq!(second, "Cube.001");
        assert_eq!(scene.selected_entities(), ["Cube.001".to_string()].into_iter().collect());
        assert_eq!(scene.active().as_deref(), Some("Cube.001"));
    }

    #[test]
    fn test_translate_skips_locked() {
        let mut scene = scene_with(&["A", "B"]);
        scene.select_entity("A").unwrap();
        scene.select_entity("B").unwrap();
        scene.set_selectable("B", false).unwrap();
        scene.translate(Vec3::new(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(scene.entity("A").unwrap().location, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(scene.entity("B").unwrap().location, Vec3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn test_select_locked_is_noop() {
        let mut scene = scene_with(&["A"]);
        scene.set_selectable("A", false).unwrap();
        scene.select_entity("A").unwrap();
        assert!(scene.selected_entities().is_empty());
        assert_eq!(
            scene.select_entity("Missing"),
            Err(SceneError::MissingEntity("Missing".into()))
        );
    }

    #[test]
    fn test_toggle_requires_edit_target() {
        let mut scene = scene_with(&["A"]);
        assert_eq!(scene.toggle_mode(), Err(SceneError::NoEditTarget));
        scene.set_active(Some("A")).unwrap();
        assert_eq!(scene.toggle_mode(), Ok(EditMode::EditLevel));
        assert_eq!(scene.toggle_mode(), Ok(EditMode::ObjectLevel));
    }

    #[test]
    fn test_edit_level_selection_is_independent() {
        let mut scene = scene_with(&["A"]);
        scene.select_entity("A").unwrap();
        scene.set_active(Some("A")).unwrap();
        scene.toggle_mode().unwrap();
        scene.select_element(ElementClass::Vertex, 2).unwrap();
        scene.deselect_all();
        assert!(scene.selected_elements().is_empty());
        scene.toggle_mode().unwrap();
        assert_eq!(scene.selected_entities().len(), 1);
    }

    #[test]
    fn test_edit_level_translate_moves_selected_vertices() {
        let mut scene = scene_with(&["A"]);
        scene.set_active(Some("A")).unwrap();
        scene.toggle_mode().unwrap();
        scene.select_element(ElementClass::Vertex, 0).unwrap();
        scene.translate(Vec3::new(0.0, 0.0, -1.0)).unwrap();
        let mesh = &scene.entity("A").unwrap().mesh;
        assert_eq!(mesh.vertices[0], Vec3::new(-1.0, -1.0, -2.0));
        assert_eq!(mesh.vertices[1], Vec3::new(-1.0, -1.0, 1.0));
    }

    #[test]
    fn test_resize_about_median() {
        let mut scene = scene_with(&["A", "B"]);
        scene.select_entity("A").unwrap();
        scene.select_entity("B").unwrap();
        scene.resize(Vec3::new(2.0, 1.0, 1.0)).unwrap();
        assert_eq!(scene.entity("A").unwrap().location, Vec3::new(-1.5, 0.0, 0.0));
        assert_eq!(scene.entity("B").unwrap().location, Vec3::new(4.5, 0.0, 0.0));
        assert_eq!(scene.entity("B").unwrap().scale, Vec3::new(2.0, 1.0, 1.0));
    }

    #[test]
    fn test_rename_moves_selection_state() {
        let mut scene = scene_with(&["A", "B"]);
        scene.select_entity("A").unwrap();
        scene.set_active(Some("A")).unwrap();
        let id = scene.entity("A").unwrap().id;
        scene.rename("A", "C").unwrap();
        assert_eq!(scene.entity("C").unwrap().id, id);
        assert_eq!(scene.active().as_deref(), Some("C"));
        assert!(scene.selected_entities().contains("C"));
        assert_eq!(scene.rename("C", "B"), Err(SceneError::NameTaken("B".into())));
    }

    #[test]
    fn test_delete_objects_clears_active() {
        let mut scene = scene_with(&["A", "B"]);
        scene.select_entity("A").unwrap();
        scene.set_active(Some("A")).unwrap();
        scene.delete(DeleteScope::Objects { use_global: false }).unwrap();
        assert!(!scene.contains("A"));
        assert!(scene.contains("B"));
        assert_eq!(scene.active(), None);
    }

    #[test]
    fn test_granularity_wire_shape() {
        let g = Granularity { vertex: false, edge: true, face: false };
        assert_eq!(serde_json::to_string(&g).unwrap(), "[false,true,false]");
        assert_eq!(serde_json::to_string(&EditMode::EditLevel).unwrap(), "\"EDIT_MESH\"");
    }
}
