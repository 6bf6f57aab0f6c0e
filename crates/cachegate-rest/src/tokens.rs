//! Rotating access tokens.
//!
//! Two slots are valid at any time. Rotation pushes a fresh token into slot
//! 0 and drops slot 1, so a token stays valid for between one and two
//! rotation periods.

use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;

pub const TOKEN_LENGTH: usize = 32;

/// Generate a random alphanumeric token.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

pub struct TokenRing {
    slots: RwLock<[String; 2]>,
}

impl Default for TokenRing {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenRing {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new([generate_token(), generate_token()]),
        }
    }

    /// The newest token, handed out at login and on refresh.
    pub fn current(&self) -> String {
        self.slots.read()[0].clone()
    }

    pub fn rotate(&self) {
        let fresh = generate_token();
        let mut slots = self.slots.write();
        slots[1] = std::mem::replace(&mut slots[0], fresh);
    }

    /// Constant-time check against both slots.
    pub fn verify(&self, token: &str) -> bool {
        let slots = self.slots.read();
        let mut valid = false;
        for slot in slots.iter() {
            // length is not secret: every token has the same length
            if slot.len() == token.len() {
                valid |= bool::from(slot.as_bytes().ct_eq(token.as_bytes()));
            }
        }
        valid
    }
}

/// Rotate `ring` every `period` until the returned handle is aborted.
pub fn spawn_rotation(ring: Arc<TokenRing>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            ring.rotate();
            tracing::debug!("Access tokens rotated");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_alphanumeric() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_both_slots_accepted_until_rotated_out() {
        let ring = TokenRing::new();
        let first = ring.current();
        assert!(ring.verify(&first));

        ring.rotate();
        let second = ring.current();
        assert_ne!(first, second);
        assert!(ring.verify(&first));
        assert!(ring.verify(&second));

        ring.rotate();
        assert!(!ring.verify(&first));
        assert!(ring.verify(&second));
    }

    #[test]
    fn test_rejects_garbage() {
        let ring = TokenRing::new();
        assert!(!ring.verify(""));
        assert!(!ring.verify("not-a-token"));
        let mut almost = ring.current();
        almost.pop();
        assert!(!ring.verify(&almost));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_task() {
        let ring = Arc::new(TokenRing::new());
        let first = ring.current();
        let handle = spawn_rotation(ring.clone(), Duration::from_secs(300));

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(ring.current(), first);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_ne!(ring.current(), first);
        assert!(ring.verify(&first));

        handle.abort();
    }
}
