//! Ordered key/value model shared by the structured codecs.

pub mod entry;
pub mod grammar;
pub mod jvm;
pub mod properties;
pub mod store;

pub use entry::{substitute, Entry};
pub use grammar::Grammar;
pub use jvm::{JvmGrammar, JvmKey, JvmOptionKind};
pub use properties::PropertiesGrammar;
pub use store::{KvStore, UnparsableLine};
