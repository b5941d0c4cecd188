pub mod aggregate;
pub mod driver;
pub mod export;
pub mod filter;
pub mod gather;
pub mod interactions;
pub mod sample;
pub mod source;
pub mod state;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use aggregate::{aggregate, merge_timeline_files, merge_timelines, AggregatedRecord};
pub use driver::{
    crawl_source, run_cycle, run_job, CrawlOptions, CycleReport, JobRequest, JobRun,
    SourceOutcome, SourceState,
};
pub use export::{append_records_csv, export_timelines, ExportFormat, ExportOptions, ExportStats};
pub use filter::{RecordFilter, OPT_OUT_TAGS};
pub use interactions::{gather_interactions, InteractionKind, InteractionRow, StatusInteractions};
pub use sample::{date_windows, run_sample, SampleReport, SampleRequest};
pub use source::MastodonSource;
pub use state::{JobState, StateError};
pub use traits::{
    AccountDirectory, InteractionSource, Page, SourceClient, SourceFailure, Timeline,
};
