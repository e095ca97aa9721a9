//! Stateless HelloRetryRequest cookies.
//!
//! A server that answers the first ClientHello with a HelloRetryRequest can
//! forget the connection entirely: everything it needs to continue is sealed
//! into the cookie the client must echo.
//!
//! ```text
//! version(1)=1 || digest_len(1) || digest || cipher_suite(2) || group(2)
//!     || session_id_len(1) || session_id || tag(32)
//!
//! tag = HMAC-SHA256(secret, everything before the tag)
//! ```
//!
//! [`RetryCookieGuard`] owns the secrets. It rotates them on a fixed
//! interval and keeps the previous secret valid for a grace period, so
//! cookies handed out just before a rotation still verify.

use crate::cipher::CipherSuite;
use crate::codec::{put_vec_u8, Reader};
use crate::error::{Error, Result};
use bytes::{BufMut, BytesMut};
use sectls_crypto::{CryptoProvider, HashAlgorithm};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

/// Cookie format version.
pub const COOKIE_VERSION: u8 = 1;

/// Cookie secret size (32 bytes for HMAC-SHA256).
pub const COOKIE_SECRET_SIZE: usize = 32;

const COOKIE_TAG_SIZE: usize = 32;

/// Negotiated parameters carried in a cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieParams {
    /// Suite selected for the HelloRetryRequest
    pub cipher_suite: CipherSuite,
    /// Group requested in the HelloRetryRequest (0 when none)
    pub group: u16,
    /// Echoed legacy_session_id
    pub session_id: Vec<u8>,
}

/// Build a cookie over the first ClientHello's transcript digest.
pub fn create_cookie(
    provider: &dyn CryptoProvider,
    transcript_digest: &[u8],
    params: &CookieParams,
    secret: &[u8],
) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    buf.put_u8(COOKIE_VERSION);
    put_vec_u8(&mut buf, transcript_digest)?;
    buf.put_u16(params.cipher_suite.to_u16());
    buf.put_u16(params.group);
    put_vec_u8(&mut buf, &params.session_id)?;

    let mut mac = provider.hmac(HashAlgorithm::Sha256, secret)?;
    mac.update(&buf);
    buf.put_slice(&mac.finalize());
    Ok(buf.to_vec())
}

/// Check a cookie's tag and recover the digest and parameters.
pub fn verify_cookie(
    provider: &dyn CryptoProvider,
    cookie: &[u8],
    secret: &[u8],
) -> Result<(Vec<u8>, CookieParams)> {
    let body_len = cookie
        .len()
        .checked_sub(COOKIE_TAG_SIZE)
        .ok_or_else(|| Error::HrrCookieError("cookie too short".into()))?;
    let (body, tag) = cookie.split_at(body_len);

    let mut mac = provider.hmac(HashAlgorithm::Sha256, secret)?;
    mac.update(body);
    if !mac.verify(tag) {
        return Err(Error::HrrCookieError("cookie tag mismatch".into()));
    }

    parse_cookie_body(body).map_err(|e| match e {
        Error::HrrCookieError(_) => e,
        other => Error::HrrCookieError(other.to_string()),
    })
}

fn parse_cookie_body(body: &[u8]) -> Result<(Vec<u8>, CookieParams)> {
    let mut r = Reader::new(body);
    let version = r.u8("cookie version")?;
    if version != COOKIE_VERSION {
        return Err(Error::HrrCookieError(format!(
            "unknown cookie version {}",
            version
        )));
    }
    let digest = r.vec_u8("cookie digest")?.to_vec();
    if digest.len() != HashAlgorithm::Sha256.output_size()
        && digest.len() != HashAlgorithm::Sha384.output_size()
    {
        return Err(Error::HrrCookieError(format!(
            "digest length {}",
            digest.len()
        )));
    }
    let raw_suite = r.u16("cookie cipher suite")?;
    let cipher_suite = CipherSuite::from_u16(raw_suite)
        .ok_or_else(|| Error::HrrCookieError(format!("cipher suite {:#06x}", raw_suite)))?;
    let group = r.u16("cookie group")?;
    let session_id = r.vec_u8("cookie session id")?.to_vec();
    r.finish("cookie")?;
    Ok((
        digest,
        CookieParams {
            cipher_suite,
            group,
            session_id,
        },
    ))
}

struct CookieSecret {
    secret: Zeroizing<Vec<u8>>,
    created_at: Instant,
}

struct PreviousSecret {
    secret: Zeroizing<Vec<u8>>,
    retired_at: Instant,
}

struct GuardInner {
    current: CookieSecret,
    previous: Option<PreviousSecret>,
    rotation_interval: Duration,
    grace_period: Duration,
    rotation_count: u64,
}

impl GuardInner {
    fn needs_rotation(&self) -> bool {
        self.current.created_at.elapsed() >= self.rotation_interval
    }

    fn previous_valid(&self) -> Option<&[u8]> {
        self.previous
            .as_ref()
            .filter(|p| p.retired_at.elapsed() < self.grace_period)
            .map(|p| p.secret.as_slice())
    }
}

/// Cookie secret holder shared by every connection of a server.
#[derive(Clone)]
pub struct RetryCookieGuard {
    provider: Arc<dyn CryptoProvider>,
    inner: Arc<Mutex<GuardInner>>,
}

impl std::fmt::Debug for RetryCookieGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCookieGuard")
            .field("rotation_interval", &self.rotation_interval())
            .field("rotation_count", &self.rotation_count())
            .finish_non_exhaustive()
    }
}

impl RetryCookieGuard {
    /// Create a guard with a fresh secret. The grace period is a tenth of
    /// the rotation interval, at least one minute.
    pub fn new(provider: Arc<dyn CryptoProvider>, rotation_interval: Duration) -> Result<Self> {
        let grace_period = (rotation_interval / 10).max(Duration::from_secs(60));
        Self::with_grace_period(provider, rotation_interval, grace_period)
    }

    /// Create a guard with an explicit grace period.
    pub fn with_grace_period(
        provider: Arc<dyn CryptoProvider>,
        rotation_interval: Duration,
        grace_period: Duration,
    ) -> Result<Self> {
        let secret = Zeroizing::new(provider.random().generate(COOKIE_SECRET_SIZE)?);
        let inner = GuardInner {
            current: CookieSecret {
                secret,
                created_at: Instant::now(),
            },
            previous: None,
            rotation_interval,
            grace_period,
            rotation_count: 0,
        };
        Ok(Self {
            provider,
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuardInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retire the current secret and generate a new one. The retired
    /// secret stays valid for the grace period; the one before it is
    /// dropped.
    pub fn rotate(&self) -> Result<()> {
        let secret = Zeroizing::new(self.provider.random().generate(COOKIE_SECRET_SIZE)?);
        let mut inner = self.lock();
        let retired = std::mem::replace(
            &mut inner.current,
            CookieSecret {
                secret,
                created_at: Instant::now(),
            },
        );
        inner.previous = Some(PreviousSecret {
            secret: retired.secret,
            retired_at: Instant::now(),
        });
        inner.rotation_count += 1;
        tracing::info!(rotations = inner.rotation_count, "cookie secret rotated");
        Ok(())
    }

    /// Rotate if the current secret is older than the interval.
    pub fn rotate_if_needed(&self) -> Result<bool> {
        if self.lock().needs_rotation() {
            self.rotate()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Issue a cookie under the current secret.
    pub fn create(&self, transcript_digest: &[u8], params: &CookieParams) -> Result<Vec<u8>> {
        self.rotate_if_needed()?;
        let inner = self.lock();
        create_cookie(
            self.provider.as_ref(),
            transcript_digest,
            params,
            &inner.current.secret,
        )
    }

    /// Verify a cookie against the current secret, then against the
    /// previous one while it is within its grace period.
    pub fn verify(&self, cookie: &[u8]) -> Result<(Vec<u8>, CookieParams)> {
        let inner = self.lock();
        match verify_cookie(self.provider.as_ref(), cookie, &inner.current.secret) {
            Ok(found) => Ok(found),
            Err(err) => match inner.previous_valid() {
                Some(previous) => verify_cookie(self.provider.as_ref(), cookie, previous),
                None => Err(err),
            },
        }
    }

    /// Number of rotations so far.
    pub fn rotation_count(&self) -> u64 {
        self.lock().rotation_count
    }

    /// Rotation interval.
    pub fn rotation_interval(&self) -> Duration {
        self.lock().rotation_interval
    }

    /// Grace period for the previous secret.
    pub fn grace_period(&self) -> Duration {
        self.lock().grace_period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sectls_crypto_mock::MockCryptoProvider;
    use std::thread;

    fn params() -> CookieParams {
        CookieParams {
            cipher_suite: CipherSuite::Aes128GcmSha256,
            group: 0x0017,
            session_id: vec![7; 32],
        }
    }

    #[test]
    fn test_cookie_roundtrip() {
        let provider = MockCryptoProvider::new();
        let cookie = create_cookie(&provider, &[0x11; 32], &params(), &[1; 32]).unwrap();
        assert_eq!(cookie[0], COOKIE_VERSION);
        assert_eq!(cookie.len(), 1 + 1 + 32 + 2 + 2 + 1 + 32 + 32);

        let (digest, recovered) = verify_cookie(&provider, &cookie, &[1; 32]).unwrap();
        assert_eq!(digest, vec![0x11; 32]);
        assert_eq!(recovered, params());
    }

    #[test]
    fn test_cookie_wrong_secret() {
        let provider = MockCryptoProvider::new();
        let cookie = create_cookie(&provider, &[0x11; 32], &params(), &[1; 32]).unwrap();
        assert!(matches!(
            verify_cookie(&provider, &cookie, &[2; 32]),
            Err(Error::HrrCookieError(_))
        ));
    }

    #[test]
    fn test_cookie_tampered() {
        let provider = MockCryptoProvider::new();
        let cookie = create_cookie(&provider, &[0x11; 32], &params(), &[1; 32]).unwrap();
        for i in [0, 5, 34, cookie.len() - 1] {
            let mut bad = cookie.clone();
            bad[i] ^= 0x80;
            assert!(matches!(
                verify_cookie(&provider, &bad, &[1; 32]),
                Err(Error::HrrCookieError(_))
            ));
        }
        assert!(verify_cookie(&provider, &cookie[..20], &[1; 32]).is_err());
    }

    #[test]
    fn test_guard_rotation_grace() {
        let provider = Arc::new(MockCryptoProvider::new());
        let guard = RetryCookieGuard::new(provider, Duration::from_secs(3600)).unwrap();
        assert_eq!(guard.grace_period(), Duration::from_secs(360));

        let cookie = guard.create(&[3; 32], &params()).unwrap();
        guard.rotate().unwrap();
        assert!(guard.verify(&cookie).is_ok());

        guard.rotate().unwrap();
        assert!(matches!(
            guard.verify(&cookie),
            Err(Error::HrrCookieError(_))
        ));
        assert_eq!(guard.rotation_count(), 2);
    }

    #[test]
    fn test_guard_grace_expired() {
        let provider = Arc::new(MockCryptoProvider::new());
        let guard = RetryCookieGuard::with_grace_period(
            provider,
            Duration::from_secs(3600),
            Duration::from_millis(10),
        )
        .unwrap();
        let cookie = guard.create(&[3; 32], &params()).unwrap();
        guard.rotate().unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(guard.verify(&cookie).is_err());
    }

    #[test]
    fn test_guard_shared_across_threads() {
        let provider = Arc::new(MockCryptoProvider::new());
        let guard = RetryCookieGuard::new(provider, Duration::from_secs(3600)).unwrap();
        let cookie = guard.create(&[9; 48], &params()).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let guard = guard.clone();
                let cookie = cookie.clone();
                thread::spawn(move || guard.verify(&cookie).is_ok())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
