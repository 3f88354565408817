//! ESS Infra Planner
//!
//! Declares the network, private service connection and Cloud SQL
//! resources of one stack as a typed, validated dependency graph, and
//! renders it as a program for the declarative provisioning engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dag;
pub mod declare;
pub mod diff;
pub mod render;
pub mod resolve;
pub mod resource;
pub mod validate;
pub mod value;

pub use config::{ConfigLoader, ConfigOverrides, StackConfig, StackConfigBuilder};
pub use dag::{Dag, Edge, EdgeKind};
pub use declare::{Declaration, declare};
pub use diff::{ChangeType, DeclarationDiff, OutputChange, ResourceChange, diff};
pub use render::{Format, Program, preview};
pub use resolve::{RealizedState, ResolvedOutput, Resolver};
pub use resource::{Cidr, Resource, ResourceKind};
pub use validate::{ValidationError, Validator};
pub use value::{OutputValue, Reference, Value};
