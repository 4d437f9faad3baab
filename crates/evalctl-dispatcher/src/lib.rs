//! Dispatcher (C6): provisions isolated workloads, watches them to
//! completion, and reports lifecycle transitions onto the event bus.

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod image;
pub mod kube_dispatcher;
pub mod types;
pub mod workload;

pub use client::ResilientClusterClient;
pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use image::ImageCache;
pub use kube_dispatcher::KubeDispatcher;
pub use types::{ExecuteAck, ExecuteRequest, WorkloadState};
