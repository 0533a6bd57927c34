mod eula;
mod flavor;
mod properties;
mod version;

pub use eula::fix_eula;
pub use flavor::*;
pub use properties::{apply_properties, sync_server_properties, SERVER_PROPERTIES};
pub use version::{latest_release, GameVersion, Release};
