//! Session identifiers.
//!
//! Identifiers are four dash-separated groups of five alphanumeric characters,
//! e.g. `aB3dE-fG5hI-jK7lM-nO9pQ`. Short enough to read out loud, random enough
//! that collisions are not checked for here (the registry rejects duplicates).

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Characters per group
pub const GROUP_LEN: usize = 5;
/// Number of groups
pub const GROUP_COUNT: usize = 4;

/// Generate a new session identifier
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..GROUP_COUNT)
        .map(|_| random_group(&mut rng))
        .collect::<Vec<_>>()
        .join("-")
}

fn random_group<R: Rng>(rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(GROUP_LEN)
        .map(char::from)
        .collect()
}

/// Check that a string has the identifier shape
pub fn is_valid(id: &str) -> bool {
    let groups: Vec<&str> = id.split('-').collect();
    groups.len() == GROUP_COUNT
        && groups
            .iter()
            .all(|g| g.len() == GROUP_LEN && g.chars().all(|c| c.is_ascii_alphanumeric()))
}
