//! Job operations, split into reads, writes and in-memory lifecycle rules.

mod lifecycle;
mod read;
mod write;
