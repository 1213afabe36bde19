pub mod aggregate;
pub mod error;
pub mod generations;
pub mod merge;
pub mod normalize;
pub mod partition;
pub mod pedigree;
#[cfg(feature = "plotting")]
pub mod plotting;
pub mod types;
pub mod vcf_source;

pub use error::{RelFitError, Result};
