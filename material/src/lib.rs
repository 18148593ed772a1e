//! Materials and their compilation against a [`Mapping`](smudge_atlas::Mapping).
//!
//! A [`Material`] describes an effect: a WGSL `main_image` function and a set of uniforms that
//! every text gets its own copy of. The [`MaterialCompiler`] generates the complete program for
//! a specific mapping and hands it to a [`ProgramCompiler`], which results in a
//! [`MappingMaterial`].

mod compiler;
mod mapping_material;
mod material;
mod program;
mod schema;
mod uniform;

pub use compiler::*;
pub use mapping_material::*;
pub use material::*;
pub use program::*;
pub use schema::*;
pub use uniform::*;
