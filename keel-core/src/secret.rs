//! Generated credentials

use rand::Rng;

/// Length of generated database master passwords
pub const PASSWORD_LENGTH: usize = 32;

/// Random alphanumeric password.
///
/// Alphanumeric only, so it is accepted by both RDS and ElastiCache without
/// quoting.
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_has_requested_length_and_charset() {
        let password = generate_password(PASSWORD_LENGTH);
        assert_eq!(password.len(), PASSWORD_LENGTH);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn passwords_differ() {
        assert_ne!(generate_password(32), generate_password(32));
    }
}
