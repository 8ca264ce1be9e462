//! Scene-side data the bridge hands to the acoustic engine, and the host
//! queries it consumes.

pub mod geometry;
pub mod material;
pub mod mesh;
pub mod ray_tracer;

pub use geometry::{StaticGeometry, StaticMesh};
pub use material::AudioMaterial;
pub use mesh::{MeshSurface, StaticMeshData};
pub use ray_tracer::{EmptyWorld, RayHit, RayTracer};
