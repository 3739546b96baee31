//! Child object name suffixes.
//!
//! Every child is named `<cluster name>-<suffix>`. The suffixes are part of
//! the operator's external contract and must never change.

/// StatefulSet, ServiceAccount and RoleBinding.
pub const SERVER: &str = "server";
/// Broker configuration ConfigMap.
pub const SERVER_CONF: &str = "server-conf";
/// Administrative credentials Secret.
pub const ADMIN: &str = "admin";
/// Erlang distribution cookie Secret.
pub const ERLANG_COOKIE: &str = "erlang-cookie";
/// Client-facing Service.
pub const INGRESS: &str = "ingress";
/// Headless per-replica Service.
pub const HEADLESS: &str = "headless";
/// Role granting what peer discovery needs.
pub const ENDPOINT_DISCOVERY: &str = "endpoint-discovery";

/// `<cluster>-<suffix>`
pub fn child_name(cluster: &str, suffix: &str) -> String {
    format!("{cluster}-{suffix}")
}
