//! # Ember
//!
//! The event-dispatch core of a bot framework.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ push  ┌──────────────────────┐      ┌──────────────────────────┐
//! │   Source    │──────▶│ EventListenerManager │─────▶│ continuous sessions      │ (consume?)
//! │ (adapter)   │       │                      │─────▶│ process interceptors     │
//! └─────────────┘       └──────────────────────┘      │   └─ listeners by        │
//!                                                     │      priority, each with │
//!                                                     │      listener intercep-  │
//!                                                     │      tors + normalizer   │
//!                                                     └──────────────────────────┘
//! ```
//!
//! - **Core** ([`core`]): event kinds, typed attributes and scopes, result model
//! - **Framework** ([`framework`]): listeners, interceptors, registry, sessions, dispatch
//! - **Runtime** ([`runtime`]): configuration, logging, dedicated worker runtime
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ember::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let echo = FnListener::builder("echo")
//!         .on(message_kind())
//!         .handle(|ctx: Arc<ListenerContext>| async move {
//!             EventResult::of(ctx.plain_text().unwrap_or_default().to_string())
//!         });
//!
//!     let runtime = EmberRuntime::builder()
//!         .manager(|m| m.listener(echo))
//!         .build()?;
//!
//!     let result = runtime.push(BoxedEvent::new(incoming)).await?;
//!     result.wait_async().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `reactive-stream` *(default)*: materialize stream results
//! - `reactive-tokio` *(default)*: materialize task and channel results
//! - `toml-config` *(default)* / `yaml-config`: configuration file formats
//! - `json-log`: JSON log output

pub use ember_core as core;
pub use ember_framework as framework;
pub use ember_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use ember::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime - main entry point
    pub use ember_runtime::EmberRuntime;

    // Events, attributes and results
    pub use ember_core::{
        Attribute, BoxError, BoxedEvent, Event, EventKind, EventResult, Reactive, Scope,
    };

    // Dispatch
    pub use ember_framework::async_trait;
    pub use ember_framework::{
        EventListener, EventListenerManager, FnListener, ListenerContext, ProcessingContext,
        ProcessingResult, ServiceListener,
    };

    // Interceptors
    pub use ember_framework::{
        FnListenerInterceptor, FnProcessingInterceptor, ListenerInterceptor, ListenerInvocation,
        ListenerPoint, ProcessingInterceptor, ProcessingInvocation,
    };

    // Sessions
    pub use ember_framework::{SessionError, SessionProvider, SessionReceiver};

    // Logging macros
    pub use ember_runtime::prelude::*;
}
