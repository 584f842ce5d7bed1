//! Identifier-collision rewrite for creation operations.
//!
//! This is the whole conflict policy: the first creation to reach the server
//! keeps its name, later ones are renamed `Name.001`, `Name.002`, ... before
//! they are applied or broadcast. Transforms and deletes pass through.

use log::debug;

use crate::naming;
use crate::operation::Operation;
use crate::scene::SceneQuery;

#[derive(Debug, Default, Clone, Copy)]
pub struct Transformer;

impl Transformer {
    pub fn new() -> Self {
        Self
    }

    /// Rewrite `op` in place if it creates an entity whose id is already
    /// taken in `scene`. Returns the new id when a rewrite happened.
    pub fn resolve(&self, op: &mut Operation, scene: &impl SceneQuery) -> Option<String> {
        if !op.is_creation() {
            return None;
        }
        let original = op.active()?.to_string();
        if !scene.contains(&original) {
            return None;
        }
        let renamed = naming::next_free_name(&original, |n| scene.contains(n));
        if op.targets.remove(&original) {
            op.targets.insert(renamed.clone());
        }
        op.active_object = renamed.clone();
        debug!("Creation of {} rewritten to {}", original, renamed);
        Some(renamed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::apply;
    use crate::geometry::{AxisMask, Vec3};
    use crate::mesh::PrimitiveShape;
    use crate::operation::OperationKind;
    use crate::scene::{EditMode, MemoryScene, Scene};

    fn add_cube() -> Operation {
        Operation {
            kind: OperationKind::AddPrimitive {
                shape: PrimitiveShape::Cube,
                loc_x: 0.0,
                loc_y: 0.0,
                loc_z: 0.0,
            },
            targets: ["Cube".to_string()].into_iter().collect(),
            active_object: "Cube".into(),
            mode: EditMode::ObjectLevel,
            elements: None,
        }
    }

    #[test]
    fn test_no_collision_passes_through() {
        let scene = MemoryScene::new();
        let mut op = add_cube();
        assert_eq!(Transformer::new().resolve(&mut op, &scene), None);
        assert_eq!(op, add_cube());
    }

    #[test]
    fn test_collision_probes_suffixes_in_order() {
        let transformer = Transformer::new();
        let mut scene = MemoryScene::new();
        apply(&add_cube(), &mut scene).unwrap();

        let mut second = add_cube();
        assert_eq!(transformer.resolve(&mut second, &scene).as_deref(), Some("Cube.001"));
        assert_eq!(second.active_object, "Cube.001");
        assert!(second.targets.contains("Cube.001") && !second.targets.contains("Cube"));
        apply(&second, &mut scene).unwrap();

        let mut third = add_cube();
        assert_eq!(transformer.resolve(&mut third, &scene).as_deref(), Some("Cube.002"));
    }

    #[test]
    fn test_suffixed_id_uses_base_name() {
        let mut scene = MemoryScene::new();
        scene.add_primitive(PrimitiveShape::Cube, Vec3::ZERO, None).unwrap();
        scene.add_primitive(PrimitiveShape::Cube, Vec3::ZERO, None).unwrap();
        let mut op = add_cube();
        op.active_object = "Cube.001".into();
        assert_eq!(Transformer::new().resolve(&mut op, &scene).as_deref(), Some("Cube.002"));
    }

    #[test]
    fn test_non_creation_untouched() {
        let mut scene = MemoryScene::new();
        scene.add_primitive(PrimitiveShape::Cube, Vec3::ZERO, None).unwrap();
        let mut op = add_cube();
        op.kind = OperationKind::Translate { offset: Vec3::ONE, constraint: AxisMask::NONE };
        assert_eq!(Transformer::new().resolve(&mut op, &scene), None);

        let mut edit_add = add_cube();
        edit_add.mode = EditMode::EditLevel;
        assert_eq!(Transformer::new().resolve(&mut edit_add, &scene), None);
    }
}
