//! Sync services

pub mod legacy_archive;
pub mod orchestrator;
pub mod puller;
pub mod remote_gateway;
pub mod staleness;

pub use legacy_archive::{HttpLegacyArchive, LegacyArchive, LegacyChannel, LegacyError, LegacyTrack, SnapshotSource};
pub use orchestrator::{
    AnalysisReport, BatchSyncReport, ChannelAnalysis, ChannelFailure, FullSyncReport,
    SyncOptions, SyncOrchestrator,
};
pub use puller::{PullReport, Puller};
pub use remote_gateway::{GatewayError, HttpRemoteGateway, RemoteChannel, RemoteGateway, RemoteTrack};
pub use staleness::StalenessDetector;
