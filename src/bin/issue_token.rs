use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

fn main() {
    let Some(user_id) = std::env::args().nth(1) else {
        eprintln!("Usage: issue_token <user_id uuid> [ttl_hours]");
        std::process::exit(2);
    };
    let ttl_hours: u32 = std::env::args()
        .nth(2)
        .and_then(|h| h.parse().ok())
        .unwrap_or(24);

    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    let token = URL_SAFE_NO_PAD.encode(raw);
    let hash = hex::encode(Sha256::digest(token.as_bytes()));

    println!("token: {token}");
    println!();
    println!(
        "INSERT INTO session_token (session_token_id, user_id, session_token_hash, expires_at)\n\
         VALUES (gen_random_uuid(), '{user_id}', '{hash}', now() + interval '{ttl_hours} hours');"
    );
}
