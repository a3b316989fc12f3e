//! In-memory representation of repository objects
//!
//! Everything the engine reads from or writes to a repository flows through
//! these types: entity identifiers (`Fmri`), typed values, layered property
//! contributions, property-group contents and snapshot levels.

pub mod fmri;
pub mod layer;
pub mod names;
pub mod pg;
pub mod property;
pub mod snapshot;
pub mod value;
pub mod wellknown;

pub use fmri::{EntityKind, Fmri};
pub use layer::{Decoration, Layer};
pub use pg::{PgContents, PgFlags};
pub use property::{Contribution, PropertyContents};
pub use snapshot::{Snaplevel, SnapshotRef};
pub use value::{Value, ValueType};
