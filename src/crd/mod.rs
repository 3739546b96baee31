//! Custom Resource Definitions (CRDs) for rabbitmq-operator.
//!
//! - `RabbitmqCluster`: Deploy and manage a clustered RabbitMQ broker

mod rabbitmq_cluster;

pub use rabbitmq_cluster::*;
