//! Session identity derivation.
//!
//! A session key is SHA-256 over `tenant`, `OriginID` and `OriginHost`,
//! separated by NUL bytes. Nodes never exchange keys for calls they have not
//! seen; each recomputes the key from the event it was handed.

use callstate_types::{CgrEvent, SESSION_KEY_LENGTH, SessionKey, fields};
use sha2::{Digest, Sha256};

use crate::error::{SessionError, SessionResult};

/// Derives the session key for `event`.
///
/// Fails with [`SessionError::MissingIdentity`] when the tenant or the origin
/// id is absent or empty. An absent origin host hashes as the empty string.
pub fn derive_key(event: &CgrEvent) -> SessionResult<SessionKey> {
    let tenant = event
        .tenant()
        .ok_or(SessionError::MissingIdentity(fields::TENANT))?;
    let origin_id = event
        .string_field(fields::ORIGIN_ID)
        .ok_or(SessionError::MissingIdentity(fields::ORIGIN_ID))?;
    let origin_host = event.string_field(fields::ORIGIN_HOST).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(tenant.as_bytes());
    hasher.update([0u8]);
    hasher.update(origin_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(origin_host.as_bytes());

    let digest: [u8; SESSION_KEY_LENGTH] = hasher.finalize().into();
    Ok(SessionKey::from_digest(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn event(tenant: &str, origin_id: &str) -> CgrEvent {
        CgrEvent::new(tenant, "ev").with_field(fields::ORIGIN_ID, origin_id)
    }

    #[test]
    fn non_identity_fields_do_not_change_key() {
        let base = event("cgrates.org", "123451");
        let richer = base
            .clone()
            .with_field(fields::USAGE, Duration::from_secs(90))
            .with_field(fields::ACCOUNT, "1001");
        assert_eq!(derive_key(&base).unwrap(), derive_key(&richer).unwrap());
    }

    #[test]
    fn origin_host_participates() {
        let base = event("cgrates.org", "123451");
        let hosted = base.clone().with_field(fields::ORIGIN_HOST, "10.0.0.1");
        assert_ne!(derive_key(&base).unwrap(), derive_key(&hosted).unwrap());

        let empty_host = base.clone().with_field(fields::ORIGIN_HOST, "");
        assert_eq!(derive_key(&base).unwrap(), derive_key(&empty_host).unwrap());
    }

    #[test]
    fn separators_prevent_field_bleed() {
        let a = event("ab", "c");
        let b = event("a", "bc");
        assert_ne!(derive_key(&a).unwrap(), derive_key(&b).unwrap());
    }

    #[test]
    fn missing_identity_fields() {
        assert!(matches!(
            derive_key(&event("", "1")),
            Err(SessionError::MissingIdentity(fields::TENANT))
        ));
        assert!(matches!(
            derive_key(&CgrEvent::new("cgrates.org", "ev")),
            Err(SessionError::MissingIdentity(fields::ORIGIN_ID))
        ));
        assert!(matches!(
            derive_key(&event("cgrates.org", "")),
            Err(SessionError::MissingIdentity(fields::ORIGIN_ID))
        ));
    }

    #[test]
    fn tenant_attribute_is_used_without_envelope() {
        let attr = CgrEvent::new("", "ev")
            .with_field(fields::TENANT, "cgrates.org")
            .with_field(fields::ORIGIN_ID, "123451");
        assert_eq!(
            derive_key(&attr).unwrap(),
            derive_key(&event("cgrates.org", "123451")).unwrap()
        );
    }

    proptest! {
        /// Two events built independently for the same call agree on the key.
        #[test]
        fn prop_key_is_deterministic(
            tenant in "[a-z.]{1,16}",
            origin_id in "[0-9a-f]{1,32}",
            host in proptest::option::of("[0-9.]{1,15}"),
        ) {
            let build = || {
                let mut ev = event(&tenant, &origin_id);
                if let Some(h) = &host {
                    ev = ev.with_field(fields::ORIGIN_HOST, h.as_str());
                }
                ev
            };
            prop_assert_eq!(derive_key(&build()).unwrap(), derive_key(&build()).unwrap());
        }
    }
}
