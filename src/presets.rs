//! Stock policy set.
//!
//! The deployment this library grew out of shipped three policies: a tight
//! credential-endpoint limit, the same limit for ordinary authenticated
//! traffic, and a looser one for admin tooling. They are provided here as a
//! convenience; most hosts will register their own.

use std::time::Duration;

use crate::policy::{Policy, PolicyError};
use crate::registry::{PolicyRegistry, RegistryError};

/// Policy name for login/register-style endpoints.
pub const AUTH_POLICY: &str = "auth";
/// Policy name for ordinary authenticated endpoints.
pub const USER_POLICY: &str = "user";
/// Policy name for admin endpoints.
pub const ADMIN_POLICY: &str = "admin";

/// Errors from installing presets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresetError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// The stock policies:
/// `auth` (capacity 2, +1/60 s, credential-sniffing), `user` (capacity 2,
/// +1/60 s), `admin` (capacity 20, +5/30 s).
pub fn standard_policies() -> Result<Vec<Policy>, PolicyError> {
    Ok(vec![
        Policy::new(AUTH_POLICY, 2, 1, Duration::from_secs(60))?.credential(),
        Policy::new(USER_POLICY, 2, 1, Duration::from_secs(60))?,
        Policy::new(ADMIN_POLICY, 20, 5, Duration::from_secs(30))?,
    ])
}

/// Register the stock policies on `registry`.
pub fn install(registry: &dyn PolicyRegistry) -> Result<(), PresetError> {
    for policy in standard_policies()? {
        registry.register(policy)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyKind;
    use crate::registry::InMemoryPolicyRegistry;

    #[test]
    fn install_registers_all_three_policies() {
        let registry = InMemoryPolicyRegistry::new();
        install(&registry).unwrap();

        let auth = registry.resolve(AUTH_POLICY).unwrap();
        assert_eq!(auth.capacity(), 2);
        assert_eq!(auth.refill_amount(), 1);
        assert_eq!(auth.refill_period(), Duration::from_secs(60));
        assert_eq!(auth.kind(), PolicyKind::Credential);

        let user = registry.resolve(USER_POLICY).unwrap();
        assert_eq!(user.kind(), PolicyKind::Standard);

        let admin = registry.resolve(ADMIN_POLICY).unwrap();
        assert_eq!(admin.capacity(), 20);
        assert_eq!(admin.refill_amount(), 5);
        assert_eq!(admin.refill_period(), Duration::from_secs(30));
    }

    #[test]
    fn installing_twice_is_a_configuration_error() {
        let registry = InMemoryPolicyRegistry::new();
        install(&registry).unwrap();
        let err = install(&registry).unwrap_err();
        assert_eq!(
            err,
            PresetError::Registry(RegistryError::DuplicatePolicy { name: AUTH_POLICY.into() })
        );
    }
}
