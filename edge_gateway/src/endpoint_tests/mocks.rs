use mockall::mock;

use crate::{
    errors::IdentityError,
    identity::{IdentityAuthority, ResolvedIdentity},
};

mock! {
    pub Authority {}
    impl IdentityAuthority for Authority {
        async fn whoami(&self, authorization: &[u8]) -> Result<ResolvedIdentity, IdentityError>;
    }
}

/// An authority that must never be asked anything.
pub fn silent_authority() -> MockAuthority {
    let mut authority = MockAuthority::new();
    authority.expect_whoami().times(0);
    authority
}

/// An authority that vouches for `Bearer good-token`, exactly once.
pub fn good_token_authority() -> MockAuthority {
    let mut authority = MockAuthority::new();
    authority
        .expect_whoami()
        .withf(|auth| auth.to_vec() == b"Bearer good-token")
        .times(1)
        .returning(|_| Ok(ResolvedIdentity::new("42", "a@b.com", "user")));
    authority
}

/// An authority that fails once with `err`.
pub fn failing_authority(err: IdentityError) -> MockAuthority {
    let mut authority = MockAuthority::new();
    authority.expect_whoami().times(1).returning(move |_| Err(err.clone()));
    authority
}
