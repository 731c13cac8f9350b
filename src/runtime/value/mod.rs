//! Values stored in and built from heap blocks.

pub mod boxed;
pub mod bytes;
pub mod datatype;
pub mod function;
pub mod open;
pub mod reference;
pub mod vector;

pub use boxed::{Boxed, SMALL_INT_MAX, SMALL_INT_MIN, Unboxed};
pub use bytes::{Bytes, CPtr};
pub use datatype::Datatype;
pub use function::{FunCode, Function, function_id, function_null};
pub use open::{LazyOpenTag, OpenTag};
pub use reference::Ref;
pub use vector::Vector;
