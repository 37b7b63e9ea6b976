pub mod loader;
pub mod schema;

pub use loader::{load_from_path, load_from_str, ConfigError, ProfileOrigin};
pub use schema::{CodecOverride, FilterConfig, ProfileConfig, ValidationError, ValidationIssue};
