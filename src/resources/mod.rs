//! Resource generation module.
//!
//! Generates the Kubernetes objects owned by a RabbitmqCluster.
//!
//! ## Resources Generated
//!
//! | Resource | Name | Purpose |
//! |----------|------|---------|
//! | StatefulSet | `<name>-server` | Broker pods with one volume claim template |
//! | ConfigMap | `<name>-server-conf` | `rabbitmq.conf` and `enabled_plugins` |
//! | Secret | `<name>-admin` | Administrative credentials |
//! | Secret | `<name>-erlang-cookie` | Erlang distribution cookie |
//! | Service | `<name>-ingress` | Client access endpoint |
//! | Headless Service | `<name>-headless` | Peer discovery (publishNotReadyAddresses) |
//! | ServiceAccount | `<name>-server` | Pod identity |
//! | Role | `<name>-endpoint-discovery` | Endpoint reads for peer discovery |
//! | RoleBinding | `<name>-server` | Grants the Role to the ServiceAccount |

pub mod builder;
pub mod common;
pub mod config_map;
pub mod naming;
pub mod quantity;
pub mod rbac;
pub mod secrets;
pub mod services;
pub mod statefulset;

pub use builder::DesiredState;
pub use common::{owner_reference, standard_labels};
