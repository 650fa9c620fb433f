/// Maps an identifier onto `0..modulus` deterministically.
///
/// The scheme is MD5 of the identifier's UTF-8 bytes, first 8 hex characters
/// parsed as an unsigned 32-bit integer, mod `modulus`. Every bucketing
/// decision in the engine (cohort rollout groups, flag percentage rollouts,
/// variant selection) goes through this one function, and it must stay
/// bit-for-bit stable: changing it would silently shift every user's bucket
/// across a deploy.
pub fn hash_bucket(identifier: &str, modulus: u32) -> u32 {
    let digest = md5::compute(identifier.as_bytes());
    let hex = format!("{digest:x}");
    // The digest always renders as 32 hex characters
    let value = u32::from_str_radix(&hex[..8], 16).unwrap();
    value % modulus
}

/// Whether `user_id` falls inside a percentage rollout. The bucket is a
/// function of the user id alone, so the same user lands in the same bucket
/// for every flag, process, and restart.
pub fn is_in_rollout_percentage(user_id: &str, percentage: f64) -> bool {
    (hash_bucket(user_id, 100) as f64) < percentage
}
