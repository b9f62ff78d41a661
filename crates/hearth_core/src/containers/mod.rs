//! # Containers
//!
//! Generic containers over plain-old-data elements, allocated through the
//! [`MemorySystem`](crate::memory::MemorySystem).

mod darray;
pub mod hash;
mod hashmap;

pub use darray::{DArray, DEFAULT_CAPACITY};
pub use hashmap::{HashFn, HashMap, KeyEqFn, Slot};
