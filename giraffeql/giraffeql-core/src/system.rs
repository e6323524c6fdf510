use std::sync::Arc;

use rand::Rng;

/// System-specific functionality used by the engine and the data store.
#[cfg_attr(feature = "unimock", unimock::unimock(api = SystemApiMock))]
pub trait SystemAPI: Sync {
    /// Get the system's current time.
    fn current_time(&self) -> chrono::DateTime<chrono::Utc>;

    /// Generate a random primary key candidate of `len` characters from `[0-9a-z]`.
    fn generate_id(&self, len: usize) -> String;
}

/// A [SystemAPI] in an [Arc].
pub type ArcSystemApi = Arc<dyn SystemAPI + Send + Sync>;

/// The system used outside of tests.
pub struct RealSystem;

impl SystemAPI for RealSystem {
    fn current_time(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    fn generate_id(&self, len: usize) -> String {
        random_id(&mut rand::thread_rng(), len)
    }
}

const ID_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn random_id(rng: &mut impl Rng, len: usize) -> String {
    (0..len)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn random_ids_are_lowercase_alphanumeric() {
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..100 {
            let id = random_id(&mut rng, 8);
            assert_eq!(8, id.len());
            assert!(
                id.chars()
                    .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()),
                "{id}"
            );
        }
    }
}
