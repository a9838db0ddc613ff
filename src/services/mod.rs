pub mod auth_service;
pub mod auth_service_impl;
pub use auth_service::{
    AccountUpdate, ApiKeyInfo, AuthError, AuthService, CreatedApiKey, LoginResult, NewKeyRequest,
    Registration, UserInfo,
};
pub use auth_service_impl::DefaultAuthService;

pub mod exec;
pub use exec::{ExecError, ExecErrorKind, ExecOutput, RemoteExecutor};

pub mod lifecycle;
pub use lifecycle::{
    CreateOutcome, DeleteReport, LifecycleError, LifecycleOrchestrator, ServerState, WorkloadState,
};

pub mod network;
pub use network::{
    ExposureDetails, ExposureError, ExposureMode, ExposureRequest, NetworkExposureManager,
    ServiceSummary,
};
