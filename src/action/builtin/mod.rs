//! Stages shipped with the kernel.
//!
//! Stages exchange data through well-known [`keys`] in the
//! [`Environment`](crate::action::Environment).

mod boxes;
mod call;
mod index_update;
mod message;
mod recover;

pub use boxes::{BoxAdd, BoxRemove, HandleBox};
pub use call::Call;
pub use index_update::IndexUpdate;
pub use message::Message;
pub use recover::Recover;

/// Name of the sequence that installs a box.
pub const BOX_ADD_ACTION: &str = "box_add";

/// Name of the sequence that removes installed boxes.
pub const BOX_REMOVE_ACTION: &str = "box_remove";

/// Environment keys used by the built-in stages.
pub mod keys {
    /// [`BoxCollection`](crate::boxes::BoxCollection) to operate on.
    pub const BOX_COLLECTION: &str = "box_collection";
    /// [`MachineIndex`](crate::index::MachineIndex) to record machines in.
    pub const MACHINE_INDEX: &str = "machine_index";

    /// `String`: file path, URL or catalog location of a box.
    pub const BOX_URL: &str = "box_url";
    /// `String`: box name.
    pub const BOX_NAME: &str = "box_name";
    /// `String`: version for direct adds, constraint otherwise.
    pub const BOX_VERSION: &str = "box_version";
    /// `Vec<String>`: acceptable providers, in order of preference.
    pub const BOX_PROVIDERS: &str = "box_providers";
    /// `bool`: replace installed boxes, remove boxes in use.
    pub const BOX_FORCE: &str = "box_force";
    /// [`Checksum`](crate::util::hash::Checksum) of a direct box source.
    pub const BOX_CHECKSUM: &str = "box_checksum";

    /// [`InstalledBox`](crate::boxes::InstalledBox) set by `BoxAdd`.
    pub const BOX_ADDED: &str = "box_added";
    /// `Vec<InstalledBox>` set by `BoxRemove`.
    pub const BOX_REMOVED: &str = "box_removed";
    /// [`InstalledBox`](crate::boxes::InstalledBox) resolved for the machine.
    pub const BOX: &str = "box";
    /// [`Entry`](crate::index::Entry) of the machine being acted on.
    pub const MACHINE: &str = "machine";
}
