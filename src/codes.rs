use rand::rngs::OsRng;
use rand::RngCore;

/// Child codes double as bearer credentials for a student's grades, so both
/// code kinds are drawn from the OS CSPRNG, never a seeded generator.
fn random_hex_upper(n_bytes: usize) -> String {
    let mut buf = vec![0u8; n_bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode_upper(buf)
}

/// 16-character uppercase hex token identifying one student.
pub fn generate_child_code() -> String {
    random_hex_upper(8)
}

/// 12-character uppercase hex one-time signup token for one parent record.
pub fn generate_signup_code() -> String {
    random_hex_upper(6)
}

/// Draws candidates until `taken` confirms one free. Collisions are
/// astronomically unlikely, but acceptance still requires the explicit check;
/// the UNIQUE constraint at insert time closes the remaining race.
pub fn unique_code<G, T>(mut generate: G, mut taken: T) -> anyhow::Result<String>
where
    G: FnMut() -> String,
    T: FnMut(&str) -> anyhow::Result<bool>,
{
    loop {
        let code = generate();
        if !taken(&code)? {
            return Ok(code);
        }
    }
}
