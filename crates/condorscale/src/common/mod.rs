pub mod cli;
pub mod cmdutils;
pub mod error;
pub mod idcounter;
pub mod setup;
pub mod timeutils;
pub mod wrapped;

pub type Map<K, V> = hashbrown::HashMap<K, V>;
pub type Set<T> = hashbrown::HashSet<T>;

pub use wrapped::WrappedRcRefCell;
