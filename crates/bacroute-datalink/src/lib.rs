pub mod bip;
pub mod traits;

pub use bip::admin::BbmdAdmin;
pub use bip::bbmd::Bbmd;
pub use bip::foreign::{ForeignDevice, RegistrationStatus};
pub use bip::link::BipLink;
pub use bip::tables::{BdtEntry, FdtEntry};
pub use traits::{Link, LinkDestination, LinkError};
