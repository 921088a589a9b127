pub mod checkpoint;
pub mod in_memory;
