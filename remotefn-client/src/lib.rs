pub mod cache;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod hooks;
pub mod lifecycle;
pub mod logging;
pub mod navigation;
pub mod refresh;
pub mod resource;

pub use cache::{ConsumerGuard, ResourceCache};
pub use client::{
    CommandFunction, PrerenderFunction, QueryFunction, RemoteClient, RemoteClientBuilder,
};
pub use config::ClientConfig;
pub use dispatch::Dispatcher;
pub use hooks::{HandleRemote, HookOutcome, RemoteCall};
pub use lifecycle::{
    ConsumerScope, FlushScheduler, ManualFlush, SchedulerUnavailable, Scope, ScopeUnavailable,
    Task, TokioTick, Untracked,
};
pub use navigation::{Location, MemoryNavigator, Navigator};
pub use refresh::{apply_refresh, release_overrides, Update};
pub use resource::{Loader, LoadFuture, Override, Resource, ResourceState};

pub use remotefn_core::{CacheKey, Codec, RemoteError, RemoteId, TypeHook};
pub use remotefn_transport::{Fetch, FetchResponse, RequestInit, TransportError};
