pub mod backup;
pub mod cipher;
pub mod config;
pub mod detector;
pub mod error;
pub mod frontier;
pub mod models;
pub mod path_map;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod snapshot;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use backup::BackupArchiver;
pub use cipher::SnapshotCipher;
pub use config::MirrorConfig;
pub use error::{AppError, ErrorKind};
pub use models::{
    AuditEntry, AuditFact, CrawlReport, FetchStrategy, FetchedContent, MirrorStats, Page,
    PageLinks, PageSummary, UpdateReport, Version, compute_hash,
};
pub use retention::{RetentionPolicy, RetentionReport};
pub use scheduler::{
    MaintenanceJob, Scheduler, SchedulerConfig, SchedulerEvent, SchedulerReporter,
    TracingSchedulerReporter,
};
pub use service::{CrawlSettings, MirrorService, PlainFetchers, UpdateOutcome};
pub use snapshot::SnapshotFiles;
pub use traits::{
    AuditSink, Clock, Fetcher, LinkExtractor, NoRenderer, RendererLauncher,
    SnapshotStore, SystemClock,
};
