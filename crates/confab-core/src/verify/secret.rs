//! Verification secrets and PIN generation.

use crate::error::{Error, Result};
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Give up after this many rejected samples. Only a broken source gets here.
const MAX_PIN_ATTEMPTS: usize = 64;

/// A shared secret typed or generated for a comparison. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret supplied by the user.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The secret text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the user supplied nothing.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

/// Generate a zero-padded numeric PIN, uniform over `[0, 10^digits)`.
///
/// Uses the fallible fill so an unavailable source surfaces as
/// [`Error::SecretGenerationFailed`] instead of a panic.
pub fn generate_pin<R: RngCore + ?Sized>(rng: &mut R, digits: u32) -> Result<Secret> {
    if !(1..=9).contains(&digits) {
        return Err(Error::SecretGenerationFailed(format!(
            "unsupported pin width {}",
            digits
        )));
    }
    let bound = 10u32.pow(digits);
    // Largest multiple of `bound` that fits; samples at or above it are rejected.
    let zone = u32::MAX - (u32::MAX % bound);

    for _ in 0..MAX_PIN_ATTEMPTS {
        let mut buf = [0u8; 4];
        rng.try_fill_bytes(&mut buf)
            .map_err(|e| Error::SecretGenerationFailed(e.to_string()))?;
        let sample = u32::from_le_bytes(buf);
        if sample < zone {
            let pin = format!("{:0width$}", sample % bound, width = digits as usize);
            return Ok(Secret(pin));
        }
    }
    Err(Error::SecretGenerationFailed(
        "random source kept producing out-of-range samples".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    struct Exhausted;

    impl RngCore for Exhausted {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, _dest: &mut [u8]) {}
        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "entropy source closed",
            )))
        }
    }

    struct Fixed(u32);

    impl RngCore for Fixed {
        fn next_u32(&mut self) -> u32 {
            self.0
        }
        fn next_u64(&mut self) -> u64 {
            self.0 as u64
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.copy_from_slice(&self.0.to_le_bytes()[..dest.len()]);
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    #[test]
    fn test_pin_is_six_zero_padded_digits() {
        for _ in 0..200 {
            let pin = generate_pin(&mut OsRng, 6).expect("pin");
            assert_eq!(pin.as_str().len(), 6);
            assert!(pin.as_str().chars().all(|c| c.is_ascii_digit()));
            assert!(pin.as_str() >= "000000" && pin.as_str() <= "999999");
        }
    }

    #[test]
    fn test_small_values_are_padded() {
        let pin = generate_pin(&mut Fixed(42), 6).expect("pin");
        assert_eq!(pin.as_str(), "000042");
    }

    #[test]
    fn test_out_of_zone_samples_rejected() {
        let err = generate_pin(&mut Fixed(u32::MAX), 6).unwrap_err();
        assert!(matches!(err, Error::SecretGenerationFailed(_)));
    }

    #[test]
    fn test_exhausted_source_fails() {
        let err = generate_pin(&mut Exhausted, 6).unwrap_err();
        assert!(matches!(err, Error::SecretGenerationFailed(_)));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        assert_eq!(format!("{:?}", Secret::new("1234")), "Secret([REDACTED])");
    }
}
