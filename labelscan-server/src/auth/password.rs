use rand::Rng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

const ITERATIONS: u32 = 100_000;
const HASH_LEN: usize = 32;

fn derive(salt: &[u8], password: &str, iterations: u32) -> [u8; HASH_LEN] {
    let mut hash = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut hash);
    hash
}

/// Hash a password as `pbkdf2:sha256:<iterations>$<salt hex>$<hash hex>`.
pub fn hash_password(password: &str) -> String {
    let salt: [u8; 16] = rand::thread_rng().gen();
    format!(
        "pbkdf2:sha256:{}${}${}",
        ITERATIONS,
        hex::encode(salt),
        hex::encode(derive(&salt, password, ITERATIONS))
    )
}

/// Check a password against a stored hash. Malformed hashes never match.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(method), Some(salt), Some(expected), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let Some(iterations) = method.strip_prefix("pbkdf2:sha256:") else {
        return false;
    };
    let (Ok(iterations), Ok(salt), Ok(expected)) = (
        iterations.parse::<u32>(),
        hex::decode(salt),
        hex::decode(expected),
    ) else {
        return false;
    };
    if iterations == 0 {
        return false;
    }
    let actual = derive(&salt, password, iterations);
    actual[..].ct_eq(&expected[..]).into()
}
