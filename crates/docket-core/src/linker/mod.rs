//! Bounded fuzzy linking of recognized bounding boxes to text chunks.
//!
//! Associates each chunk with the ids of the boxes whose text plausibly
//! belongs to it, so a citation in a chunk can be highlighted on the page.
//! The linker is pure and holds no state between calls: many documents can be
//! linked concurrently, each bounded by its batch size and deadline.

mod link;
mod similarity;
mod types;

pub use link::{link, link_with_progress};
pub use types::{
    BoundingBox, Chunk, Geometry, LinkConfig, LinkError, LinkProgress, LinkResult, LinkStats,
};

#[cfg(test)]
mod tests;
