use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use wallette_shared::auth::{sign_auth_data, AuthData, AuthProof};
use wallette_shared::crypto::KeyPair;
use wallette_shared::Identity;

pub fn proof_for(identity: &Identity) -> AuthProof {
    let signing = SigningKey::generate(&mut OsRng);
    sign_auth_data(
        &signing,
        AuthData {
            wallet_address: identity.clone(),
            chain_id: "0x1".into(),
            nonce: "7".into(),
            session_id: format!("session-{}", identity.short()),
            public_key: KeyPair::generate().public_key_hex(),
            signing_key: String::new(),
            screen_name: identity.short().to_string(),
        },
    )
}
