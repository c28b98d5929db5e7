pub mod merge;
pub mod zipnum;

pub use merge::KwayMerger;
pub use zipnum::{IdxEntry, LocMap, ZipNumParams};
