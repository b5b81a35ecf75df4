//! Mechanical model: a tree of typed containers plus the sketch kernel that holds the
//! board geometry.
//!
//! Containers live in a generational arena. A [`ContainerId`] stays valid until its
//! container is removed; after that the slot may be reused, and the stale id is rejected
//! instead of resolving to the newcomer.

use crate::error::SyncError;
use crate::kernel::SketchKernel;
use crate::model::board::{BoardInfo, Layer, Model3d, ShapeKind};
use crate::registry::Registry;
use crate::units::{length_to_model, Point3};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ContainerId {
    index: u32,
    generation: u32,
}

/// What a container stands for. Decided when the container is created.
#[derive(Clone, Debug, PartialEq)]
pub enum ContainerRole {
    Board,
    BoardGeometry,
    Drawings,
    Vias,
    Footprints,
    Layer(Layer),
    Footprint {
        reference: String,
        library_id: String,
        sequence_id: u32,
    },
    PadGroup,
    Pad {
        number: String,
    },
    Drawing {
        shape: ShapeKind,
    },
    Via,
    Model3d(Model3d),
    /// Solid made by extruding the board outline sketch by `length` model units.
    Extrusion {
        length: f64,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Placement {
    pub base: Point3,
    /// Rotation about the board normal, degrees.
    pub rotation_z_deg: f64,
    /// Rotated 180 degrees about the x axis (mounted on the bottom side).
    pub flipped: bool,
}

impl Placement {
    pub fn rotate_z(&mut self, delta_deg: f64) {
        self.rotation_z_deg += delta_deg;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Container {
    pub label: String,
    pub role: ContainerRole,
    pub placement: Placement,
    parent: Option<ContainerId>,
    children: Vec<ContainerId>,
}

impl Container {
    pub fn new(label: impl Into<String>, role: ContainerRole) -> Self {
        Self {
            label: label.into(),
            role,
            placement: Placement::default(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn parent(&self) -> Option<ContainerId> {
        self.parent
    }

    pub fn children(&self) -> &[ContainerId] {
        &self.children
    }
}

#[derive(Clone, Debug, Default)]
struct Slot {
    generation: u32,
    container: Option<Container>,
}

#[derive(Clone, Debug, Default)]
pub struct Containers {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Containers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `container` under `parent` (or as a root).
    pub fn insert(&mut self, mut container: Container, parent: Option<ContainerId>) -> ContainerId {
        container.parent = parent;
        container.children.clear();

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.container = Some(container);
                ContainerId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    container: Some(container),
                });
                ContainerId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };

        if let Some(parent) = parent.and_then(|parent| self.get_mut(parent).ok()) {
            parent.children.push(id);
        }
        id
    }

    pub fn get(&self, id: ContainerId) -> Result<&Container, SyncError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.container.as_ref())
            .ok_or(SyncError::UnknownContainer)
    }

    pub fn get_mut(&mut self, id: ContainerId) -> Result<&mut Container, SyncError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.container.as_mut())
            .ok_or(SyncError::UnknownContainer)
    }

    pub fn contains(&self, id: ContainerId) -> bool {
        self.get(id).is_ok()
    }

    /// Removes `id` and everything below it.
    pub fn remove(&mut self, id: ContainerId) -> Result<(), SyncError> {
        let parent = self.get(id)?.parent;
        if let Some(parent) = parent.and_then(|parent| self.get_mut(parent).ok()) {
            parent.children.retain(|child| *child != id);
        }

        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let slot = &mut self.slots[current.index as usize];
            if slot.generation != current.generation {
                continue;
            }
            if let Some(container) = slot.container.take() {
                pending.extend(container.children);
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(current.index);
            }
        }
        Ok(())
    }

    /// Moves `id` under `new_parent`.
    pub fn reparent(&mut self, id: ContainerId, new_parent: ContainerId) -> Result<(), SyncError> {
        self.get(new_parent)?;
        let old_parent = self.get(id)?.parent;
        if let Some(old) = old_parent.and_then(|parent| self.get_mut(parent).ok()) {
            old.children.retain(|child| *child != id);
        }

        self.get_mut(id)?.parent = Some(new_parent);
        self.get_mut(new_parent)?.children.push(id);
        Ok(())
    }

    /// Children of `id` whose role matches `predicate`.
    pub fn children_where(
        &self,
        id: ContainerId,
        predicate: impl Fn(&ContainerRole) -> bool,
    ) -> Result<Vec<ContainerId>, SyncError> {
        Ok(self
            .get(id)?
            .children
            .iter()
            .copied()
            .filter(|child| {
                self.get(*child)
                    .map(|container| predicate(&container.role))
                    .unwrap_or(false)
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.container.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed containers created for every board.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoardLayout {
    pub board: ContainerId,
    pub geometry: ContainerId,
    pub drawings: ContainerId,
    pub vias: ContainerId,
    pub extrusion: ContainerId,
    pub footprints: ContainerId,
    pub top: ContainerId,
    pub bot: ContainerId,
}

impl BoardLayout {
    fn build(containers: &mut Containers, info: &BoardInfo) -> Self {
        let pcb_id = &info.pcb_id;
        let board = containers.insert(
            Container::new(format!("{}_{pcb_id}", info.pcb_name), ContainerRole::Board),
            None,
        );
        let geometry = containers.insert(
            Container::new(format!("Board_Geoms_{pcb_id}"), ContainerRole::BoardGeometry),
            Some(board),
        );
        let drawings = containers.insert(
            Container::new(format!("Drawings_{pcb_id}"), ContainerRole::Drawings),
            Some(geometry),
        );
        let vias = containers.insert(
            Container::new(format!("Vias_{pcb_id}"), ContainerRole::Vias),
            Some(geometry),
        );
        let extrusion = containers.insert(
            Container::new(
                format!("Board_{pcb_id}"),
                ContainerRole::Extrusion {
                    length: -length_to_model(info.thickness),
                },
            ),
            Some(geometry),
        );
        let footprints = containers.insert(
            Container::new(format!("Footprints_{pcb_id}"), ContainerRole::Footprints),
            Some(board),
        );
        let top = containers.insert(
            Container::new(format!("Top_{pcb_id}"), ContainerRole::Layer(Layer::Top)),
            Some(footprints),
        );
        let bot = containers.insert(
            Container::new(format!("Bot_{pcb_id}"), ContainerRole::Layer(Layer::Bot)),
            Some(footprints),
        );

        Self {
            board,
            geometry,
            drawings,
            vias,
            extrusion,
            footprints,
            top,
            bot,
        }
    }

    pub fn layer(&self, layer: Layer) -> ContainerId {
        match layer {
            Layer::Top => self.top,
            Layer::Bot => self.bot,
        }
    }
}

/// The board's mechanical representation: sketch, containers and identity bookkeeping.
#[derive(Debug)]
pub struct MechanicalModel<K> {
    pub kernel: K,
    pub containers: Containers,
    pub registry: Registry,
    pub layout: BoardLayout,
    pub pcb_id: String,
    /// Board thickness in model units.
    pub thickness: f64,
}

impl<K: SketchKernel> MechanicalModel<K> {
    /// Creates the fixed board containers around an empty `kernel`.
    pub fn new(kernel: K, info: &BoardInfo) -> Self {
        let mut containers = Containers::new();
        let layout = BoardLayout::build(&mut containers, info);
        Self {
            kernel,
            containers,
            registry: Registry::new(),
            layout,
            pcb_id: info.pcb_id.clone(),
            thickness: length_to_model(info.thickness),
        }
    }

    /// Out-of-plane height of a footprint's base on `layer`.
    pub fn layer_height(&self, layer: Layer) -> f64 {
        match layer {
            Layer::Top => 0.0,
            Layer::Bot => -self.thickness,
        }
    }

    /// Placement of a 3D model relative to its footprint.
    ///
    /// Offsets are millimetres with Y not mirrored. Bottom-side models are flipped and sit
    /// below the board.
    pub fn model_placement(&self, model: &Model3d, layer: Layer) -> Placement {
        let [x, y, z] = model.offset;
        match layer {
            Layer::Top => Placement {
                base: Point3::new(x, y, z),
                rotation_z_deg: -model.rot[2],
                flipped: false,
            },
            Layer::Bot => Placement {
                base: Point3::new(x, y, -self.thickness - z),
                rotation_z_deg: -model.rot[2],
                flipped: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Container, ContainerRole, Containers, MechanicalModel};
    use crate::error::SyncError;
    use crate::kernel::MemorySketch;
    use crate::model::board::{BoardInfo, Layer, Model3d};

    #[test]
    fn removed_container_id_goes_stale() {
        let mut containers = Containers::new();
        let root = containers.insert(Container::new("root", ContainerRole::Board), None);
        let child = containers.insert(Container::new("child", ContainerRole::PadGroup), Some(root));
        let grandchild = containers.insert(
            Container::new("pad", ContainerRole::Pad { number: "1".to_string() }),
            Some(child),
        );

        containers.remove(child).expect("remove should succeed");
        assert!(containers.get(root).expect("root stays").children().is_empty());
        assert!(matches!(containers.get(grandchild), Err(SyncError::UnknownContainer)));

        let reused = containers.insert(Container::new("new", ContainerRole::Via), Some(root));
        assert!(matches!(containers.get(child), Err(SyncError::UnknownContainer)));
        assert_eq!(containers.get(reused).expect("new container").label, "new");
    }

    #[test]
    fn reparent_moves_between_layers() {
        let info = BoardInfo {
            pcb_name: "demo".to_string(),
            pcb_id: "ab12".to_string(),
            thickness: 1_600_000,
        };
        let mut model = MechanicalModel::new(MemorySketch::new(), &info);
        let footprint = model.containers.insert(
            Container::new(
                "1_J1_ab12",
                ContainerRole::Footprint {
                    reference: "J1".to_string(),
                    library_id: "lib:fp".to_string(),
                    sequence_id: 1,
                },
            ),
            Some(model.layout.top),
        );

        model
            .containers
            .reparent(footprint, model.layout.layer(Layer::Bot))
            .expect("reparent should succeed");

        let bot = model.containers.get(model.layout.bot).expect("bot layer exists");
        assert_eq!(bot.children(), &[footprint]);
        assert!(model
            .containers
            .get(model.layout.top)
            .expect("top layer exists")
            .children()
            .is_empty());
        assert_eq!(model.layer_height(Layer::Bot), -1.6);
    }

    #[test]
    fn bottom_models_are_flipped_below_the_board() {
        let info = BoardInfo {
            pcb_name: "demo".to_string(),
            pcb_id: "ab12".to_string(),
            thickness: 1_600_000,
        };
        let model = MechanicalModel::new(MemorySketch::new(), &info);
        let part = Model3d {
            model_id: "000".to_string(),
            filename: "/Connector.3dshapes/Pin".to_string(),
            offset: [0.5, 0.0, 0.25],
            scale: [1.0, 1.0, 1.0],
            rot: [0.0, 0.0, 90.0],
        };

        let top = model.model_placement(&part, Layer::Top);
        assert!(!top.flipped);
        assert_eq!(top.base.z, 0.25);

        let bot = model.model_placement(&part, Layer::Bot);
        assert!(bot.flipped);
        assert!((bot.base.z + 1.85).abs() < 1e-12);
    }
}
