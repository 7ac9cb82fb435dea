//! Substructs used by `Recipe` and `DeploymentSpec`, one file per concept,
//! following the same one-struct-per-file convention as `structs/gate.rs`
//! in the library this is descended from.

mod resources;
pub use self::resources::Resources;

mod distributed;
pub use self::distributed::Distributed;

mod replica;
pub use self::replica::ReplicaConfig;
