pub mod aligner;
pub mod reading_store;
pub mod resampler;

pub use aligner::{derive_name, find_reference, AlignedRow, AlignedTable, Aligner};
pub use reading_store::{ReadingStore, HIGH_VALUE, LOW_VALUE};
pub use resampler::{keeps_grid, round_to_bucket, ResampledSeries, Resampler};
