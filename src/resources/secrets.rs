//! Generated Secrets: administrative credentials and the Erlang cookie.
//!
//! The generators here only describe the Secret objects; the payload is
//! produced by [`generate_payload`] exactly once, when the engine first
//! creates the Secret. Existing payloads are never touched again because
//! regenerating them would lock running nodes and clients out.

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::BTreeMap;

use crate::crd::RabbitmqCluster;
use crate::resources::common::child_metadata;
use crate::resources::naming;

pub const ADMIN_USERNAME_KEY: &str = "username";
pub const ADMIN_PASSWORD_KEY: &str = "password";
pub const ERLANG_COOKIE_KEY: &str = ".erlang.cookie";

const USERNAME_LENGTH: usize = 24;
const PASSWORD_LENGTH: usize = 24;
const COOKIE_LENGTH: usize = 32;

/// Which generated Secret.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretKind {
    Admin,
    ErlangCookie,
}

fn opaque_secret(resource: &RabbitmqCluster, suffix: &str) -> Secret {
    Secret {
        metadata: child_metadata(resource, suffix),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Generate the admin credentials Secret descriptor (no payload).
pub fn generate_admin_secret(resource: &RabbitmqCluster) -> Secret {
    opaque_secret(resource, naming::ADMIN)
}

/// Generate the Erlang cookie Secret descriptor (no payload).
pub fn generate_erlang_cookie_secret(resource: &RabbitmqCluster) -> Secret {
    opaque_secret(resource, naming::ERLANG_COOKIE)
}

fn random_string<R: Rng>(rng: &mut R, length: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Fresh random payload for a Secret of the given kind.
pub fn generate_payload_with<R: Rng>(kind: SecretKind, rng: &mut R) -> BTreeMap<String, ByteString> {
    let entries = match kind {
        SecretKind::Admin => vec![
            (ADMIN_USERNAME_KEY, random_string(rng, USERNAME_LENGTH)),
            (ADMIN_PASSWORD_KEY, random_string(rng, PASSWORD_LENGTH)),
        ],
        SecretKind::ErlangCookie => vec![(ERLANG_COOKIE_KEY, random_string(rng, COOKIE_LENGTH))],
    };
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), ByteString(value.into_bytes())))
        .collect()
}

/// [`generate_payload_with`] using the thread-local RNG.
pub fn generate_payload(kind: SecretKind) -> BTreeMap<String, ByteString> {
    generate_payload_with(kind, &mut rand::thread_rng())
}
